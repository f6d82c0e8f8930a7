//! User model.
//!
//! Users share the source's identifier space and are created lazily the
//! first time an author or reviewer is observed.

use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A referenced user (PR author or reviewer).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Source-owned user id.
    pub id: i64,

    /// Display name or login.
    pub name: Option<String>,

    /// Email address, unique when present.
    pub email: Option<String>,

    /// Avatar image URL.
    pub avatar_url: Option<String>,
}

/// Look up a user by id.
pub async fn get_user(pool: &sqlx::SqlitePool, id: i64) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>(
        "SELECT id, name, email, avatar_url FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// Ensure a user row exists for the given source id.
///
/// Inserts a placeholder when the user has never been seen. On conflict,
/// only fields that are still NULL are filled in: richer data observed
/// later wins, and existing data is never degraded back to a placeholder.
pub async fn ensure_user(
    pool: &sqlx::SqlitePool,
    id: i64,
    name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO users (id, name, avatar_url) VALUES (?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = COALESCE(users.name, excluded.name),
           avatar_url = COALESCE(users.avatar_url, excluded.avatar_url)",
    )
    .bind(id)
    .bind(name)
    .bind(avatar_url)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use tempfile::tempdir;

    async fn setup_test_db() -> sqlx::SqlitePool {
        let dir = tempdir().unwrap().keep();
        db::initialize(&dir.join("test.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_ensure_creates_placeholder() {
        let pool = setup_test_db().await;

        ensure_user(&pool, 42, None, None).await.unwrap();

        let user = get_user(&pool, 42).await.unwrap().unwrap();
        assert_eq!(user.id, 42);
        assert!(user.name.is_none());
    }

    #[tokio::test]
    async fn test_richer_data_fills_placeholder() {
        let pool = setup_test_db().await;

        ensure_user(&pool, 42, None, None).await.unwrap();
        ensure_user(&pool, 42, Some("octocat"), Some("https://a.test/cat.png"))
            .await
            .unwrap();

        let user = get_user(&pool, 42).await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("octocat"));
        assert_eq!(user.avatar_url.as_deref(), Some("https://a.test/cat.png"));
    }

    #[tokio::test]
    async fn test_existing_data_is_not_degraded() {
        let pool = setup_test_db().await;

        ensure_user(&pool, 42, Some("octocat"), None).await.unwrap();
        // A later placeholder sighting must not clear the name
        ensure_user(&pool, 42, None, None).await.unwrap();

        let user = get_user(&pool, 42).await.unwrap().unwrap();
        assert_eq!(user.name.as_deref(), Some("octocat"));
    }
}
