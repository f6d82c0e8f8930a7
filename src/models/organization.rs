//! Organization model.

use crate::error::AppError;
use crate::models::UpsertOutcome;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A synced source-control organization.
///
/// Organizations are created on first sync mention and updated on each
/// subsequent sync; they are never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    /// Local row id.
    pub id: i64,

    /// Source-owned organization id (immutable).
    pub external_id: i64,

    /// Source login slug used in API routes (e.g., "acme").
    pub login: String,

    /// Display name.
    pub name: String,

    /// Avatar image URL.
    pub avatar_url: Option<String>,

    /// Installation handle from the authorization flow. Owned by the
    /// credential subsystem; sync reads it but never writes it.
    pub installation_id: Option<i64>,
}

const ORG_COLUMNS: &str = "id, external_id, login, name, avatar_url, installation_id";

/// Look up an organization by local id.
pub async fn get_organization(
    pool: &sqlx::SqlitePool,
    id: i64,
) -> Result<Option<Organization>, AppError> {
    let org = sqlx::query_as::<_, Organization>(&format!(
        "SELECT {} FROM organizations WHERE id = ?",
        ORG_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(org)
}

/// Look up an organization by its external id.
pub async fn get_by_external_id(
    pool: &sqlx::SqlitePool,
    external_id: i64,
) -> Result<Option<Organization>, AppError> {
    let org = sqlx::query_as::<_, Organization>(&format!(
        "SELECT {} FROM organizations WHERE external_id = ?",
        ORG_COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(org)
}

/// Reconcile a remote organization snapshot into the store.
///
/// Sync owns `login`, `name` and `avatar_url`. `installation_id` belongs
/// to the authorization flow and is preserved verbatim on update.
pub async fn upsert_organization(
    pool: &sqlx::SqlitePool,
    external_id: i64,
    login: &str,
    name: &str,
    avatar_url: Option<&str>,
) -> Result<(Organization, UpsertOutcome), AppError> {
    let existing = get_by_external_id(pool, external_id).await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO organizations (external_id, login, name, avatar_url) VALUES (?, ?, ?, ?)",
            )
            .bind(external_id)
            .bind(login)
            .bind(name)
            .bind(avatar_url)
            .execute(pool)
            .await?;

            let org = get_by_external_id(pool, external_id)
                .await?
                .ok_or_else(|| AppError::internal("organization vanished after insert"))?;
            Ok((org, UpsertOutcome::Inserted))
        }
        Some(org)
            if org.login == login
                && org.name == name
                && org.avatar_url.as_deref() == avatar_url =>
        {
            Ok((org, UpsertOutcome::Unchanged))
        }
        Some(org) => {
            sqlx::query(
                "UPDATE organizations SET login = ?, name = ?, avatar_url = ?, updated_at = strftime('%s', 'now')
                 WHERE id = ?",
            )
            .bind(login)
            .bind(name)
            .bind(avatar_url)
            .bind(org.id)
            .execute(pool)
            .await?;

            let org = get_organization(pool, org.id)
                .await?
                .ok_or_else(|| AppError::internal("organization vanished after update"))?;
            Ok((org, UpsertOutcome::Updated))
        }
    }
}

/// Record an installation handle for an organization.
///
/// Called by the embedder after the authorization flow completes; not part
/// of the sync path.
pub async fn set_installation_id(
    pool: &sqlx::SqlitePool,
    id: i64,
    installation_id: Option<i64>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE organizations SET installation_id = ? WHERE id = ?")
        .bind(installation_id)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
