//! Repository model.

use crate::error::AppError;
use crate::models::UpsertOutcome;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A synced repository belonging to an organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    /// Local row id.
    pub id: i64,

    /// Source-owned repository id (immutable).
    pub external_id: i64,

    /// Owning organization (local id).
    pub organization_id: i64,

    /// Short name (e.g., "widgets").
    pub name: String,

    /// Full qualified name (e.g., "acme/widgets").
    pub full_name: String,

    /// Whether the repository is private at the source.
    pub private: bool,

    /// Whether pull requests are ingested for this repository. Owned by
    /// the settings subsystem; sync reads it but never writes it.
    pub is_tracked: bool,

    /// When the last successful pull-request sync for this repository
    /// finished (Unix seconds).
    pub last_synced_at: Option<i64>,
}

/// Look up a repository by local id.
pub async fn get_repository(
    pool: &sqlx::SqlitePool,
    id: i64,
) -> Result<Option<Repository>, AppError> {
    let repo = sqlx::query_as::<_, Repository>(
        "SELECT id, external_id, organization_id, name, full_name, private, is_tracked, last_synced_at
         FROM repositories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(repo)
}

/// Look up a repository by its external id.
pub async fn get_by_external_id(
    pool: &sqlx::SqlitePool,
    external_id: i64,
) -> Result<Option<Repository>, AppError> {
    let repo = sqlx::query_as::<_, Repository>(
        "SELECT id, external_id, organization_id, name, full_name, private, is_tracked, last_synced_at
         FROM repositories WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(repo)
}

/// List all repositories for an organization.
pub async fn list_for_organization(
    pool: &sqlx::SqlitePool,
    organization_id: i64,
) -> Result<Vec<Repository>, AppError> {
    let repos = sqlx::query_as::<_, Repository>(
        "SELECT id, external_id, organization_id, name, full_name, private, is_tracked, last_synced_at
         FROM repositories WHERE organization_id = ? ORDER BY full_name",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(repos)
}

/// List tracked repositories for an organization.
pub async fn list_tracked(
    pool: &sqlx::SqlitePool,
    organization_id: i64,
) -> Result<Vec<Repository>, AppError> {
    let repos = sqlx::query_as::<_, Repository>(
        "SELECT id, external_id, organization_id, name, full_name, private, is_tracked, last_synced_at
         FROM repositories WHERE organization_id = ? AND is_tracked = 1 ORDER BY full_name",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(repos)
}

/// Reconcile a remote repository snapshot into the store.
///
/// Sync owns `name`, `full_name` and `private`. `is_tracked` belongs to
/// the settings subsystem and is preserved verbatim (new repositories
/// start untracked).
pub async fn upsert_repository(
    pool: &sqlx::SqlitePool,
    external_id: i64,
    organization_id: i64,
    name: &str,
    full_name: &str,
    private: bool,
) -> Result<(Repository, UpsertOutcome), AppError> {
    let existing = get_by_external_id(pool, external_id).await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO repositories (external_id, organization_id, name, full_name, private)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(external_id)
            .bind(organization_id)
            .bind(name)
            .bind(full_name)
            .bind(private)
            .execute(pool)
            .await?;

            let repo = get_by_external_id(pool, external_id)
                .await?
                .ok_or_else(|| AppError::internal("repository vanished after insert"))?;
            Ok((repo, UpsertOutcome::Inserted))
        }
        Some(repo)
            if repo.name == name && repo.full_name == full_name && repo.private == private =>
        {
            Ok((repo, UpsertOutcome::Unchanged))
        }
        Some(repo) => {
            sqlx::query(
                "UPDATE repositories SET name = ?, full_name = ?, private = ?, updated_at = strftime('%s', 'now')
                 WHERE id = ?",
            )
            .bind(name)
            .bind(full_name)
            .bind(private)
            .bind(repo.id)
            .execute(pool)
            .await?;

            let repo = get_repository(pool, repo.id)
                .await?
                .ok_or_else(|| AppError::internal("repository vanished after update"))?;
            Ok((repo, UpsertOutcome::Updated))
        }
    }
}

/// Flip the tracked flag. Settings-subsystem entry point, not sync.
pub async fn set_tracked(
    pool: &sqlx::SqlitePool,
    id: i64,
    is_tracked: bool,
) -> Result<(), AppError> {
    sqlx::query("UPDATE repositories SET is_tracked = ? WHERE id = ?")
        .bind(is_tracked)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record the completion time of a pull-request sync pass.
pub async fn set_last_synced_at(
    pool: &sqlx::SqlitePool,
    id: i64,
    timestamp: i64,
) -> Result<(), AppError> {
    sqlx::query("UPDATE repositories SET last_synced_at = ? WHERE id = ?")
        .bind(timestamp)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
