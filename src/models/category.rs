//! Category model.
//!
//! A fixed set of default categories is seeded once and shared across all
//! organizations. Custom categories are organization-scoped and must not
//! collide case-insensitively with other custom categories in the same
//! organization.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A pull request category.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    /// Local row id.
    pub id: i64,

    /// Owning organization; None for shared defaults.
    pub organization_id: Option<i64>,

    /// Display name.
    pub name: String,

    /// Description shown in pickers.
    pub description: Option<String>,

    /// Display color (hex).
    pub color: Option<String>,

    /// Whether this is a seeded default.
    pub is_default: bool,
}

/// The shared default taxonomy, seeded once.
const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    ("Feature", "New functionality or capability", "#3fb950"),
    ("Bug Fix", "Corrects defective behavior", "#f85149"),
    ("Refactor", "Restructures code without changing behavior", "#a371f7"),
    ("Documentation", "Docs, comments and examples", "#58a6ff"),
    ("Testing", "Adds or improves tests", "#d29922"),
    ("Chore", "Tooling, dependencies and housekeeping", "#8b949e"),
];

/// Seed the shared default categories. Idempotent.
pub async fn seed_defaults(pool: &sqlx::SqlitePool) -> Result<(), AppError> {
    let existing: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM categories WHERE is_default = 1")
            .fetch_one(pool)
            .await?;

    if existing.0 > 0 {
        return Ok(());
    }

    for (name, description, color) in DEFAULT_CATEGORIES {
        sqlx::query(
            "INSERT INTO categories (organization_id, name, description, color, is_default)
             VALUES (NULL, ?, ?, ?, 1)",
        )
        .bind(name)
        .bind(description)
        .bind(color)
        .execute(pool)
        .await?;
    }

    Ok(())
}

/// Look up a category by id.
pub async fn get_category(
    pool: &sqlx::SqlitePool,
    id: i64,
) -> Result<Option<Category>, AppError> {
    let category = sqlx::query_as::<_, Category>(
        "SELECT id, organization_id, name, description, color, is_default
         FROM categories WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(category)
}

/// List the categories visible to an organization: the shared defaults
/// plus its own custom ones.
pub async fn list_for_organization(
    pool: &sqlx::SqlitePool,
    organization_id: i64,
) -> Result<Vec<Category>, AppError> {
    let categories = sqlx::query_as::<_, Category>(
        "SELECT id, organization_id, name, description, color, is_default
         FROM categories
         WHERE is_default = 1 OR organization_id = ?
         ORDER BY is_default DESC, name",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(categories)
}

/// Create a custom category for an organization.
///
/// The name must not collide case-insensitively with another custom
/// category in the same organization; defaults are exempt from the check.
pub async fn create_category(
    pool: &sqlx::SqlitePool,
    organization_id: i64,
    name: &str,
    description: Option<&str>,
    color: Option<&str>,
) -> Result<Category, AppError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::validation("category name must not be empty"));
    }

    let result = sqlx::query(
        "INSERT INTO categories (organization_id, name, description, color, is_default)
         VALUES (?, ?, ?, ?, 0)",
    )
    .bind(organization_id)
    .bind(name)
    .bind(description)
    .bind(color)
    .execute(pool)
    .await;

    match result {
        Ok(done) => {
            let id = done.last_insert_rowid();
            get_category(pool, id)
                .await?
                .ok_or_else(|| AppError::internal("category vanished after insert"))
        }
        Err(err) => {
            let app_err = AppError::from(err);
            if matches!(app_err, AppError::Conflict { .. }) {
                Err(AppError::conflict(format!(
                    "category '{}' already exists in this organization",
                    name
                )))
            } else {
                Err(app_err)
            }
        }
    }
}

/// Delete a custom category. Defaults cannot be deleted.
pub async fn delete_category(pool: &sqlx::SqlitePool, id: i64) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM categories WHERE id = ? AND is_default = 0")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found_with_id("Category", id.to_string()));
    }

    Ok(())
}
