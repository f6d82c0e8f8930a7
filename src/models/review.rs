//! Review model.

use crate::error::AppError;
use crate::models::UpsertOutcome;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// State of a submitted review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Dismissed,
}

impl From<&str> for ReviewState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "approved" => Self::Approved,
            "changes_requested" => Self::ChangesRequested,
            "dismissed" => Self::Dismissed,
            _ => Self::Commented,
        }
    }
}

impl std::fmt::Display for ReviewState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => write!(f, "approved"),
            Self::ChangesRequested => write!(f, "changes_requested"),
            Self::Commented => write!(f, "commented"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// A synced pull request review.
///
/// A pull request may have many reviews; its "first review" is the one
/// with the minimum submission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Local row id.
    pub id: i64,

    /// Source-owned review id (immutable).
    pub external_id: i64,

    /// Owning pull request (local id).
    pub pull_request_id: i64,

    /// Reviewer user id; None when the reviewer account is gone.
    pub reviewer_id: Option<i64>,

    /// State: `approved`, `changes_requested`, `commented`, `dismissed`.
    pub state: String,

    /// Submission timestamp (Unix).
    pub submitted_at: Option<i64>,
}

impl Review {
    /// Parse the state string into an enum.
    pub fn state_enum(&self) -> ReviewState {
        ReviewState::from(self.state.as_str())
    }
}

/// Look up a review by its external id.
pub async fn get_by_external_id(
    pool: &sqlx::SqlitePool,
    external_id: i64,
) -> Result<Option<Review>, AppError> {
    let review = sqlx::query_as::<_, Review>(
        "SELECT id, external_id, pull_request_id, reviewer_id, state, submitted_at
         FROM reviews WHERE external_id = ?",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(review)
}

/// List reviews for a pull request in submission order.
pub async fn list_for_pull_request(
    pool: &sqlx::SqlitePool,
    pull_request_id: i64,
) -> Result<Vec<Review>, AppError> {
    let reviews = sqlx::query_as::<_, Review>(
        "SELECT id, external_id, pull_request_id, reviewer_id, state, submitted_at
         FROM reviews WHERE pull_request_id = ? ORDER BY submitted_at",
    )
    .bind(pull_request_id)
    .fetch_all(pool)
    .await?;

    Ok(reviews)
}

/// Earliest review of a pull request by submission time, if any.
pub async fn first_review(
    pool: &sqlx::SqlitePool,
    pull_request_id: i64,
) -> Result<Option<Review>, AppError> {
    let review = sqlx::query_as::<_, Review>(
        "SELECT id, external_id, pull_request_id, reviewer_id, state, submitted_at
         FROM reviews WHERE pull_request_id = ? AND submitted_at IS NOT NULL
         ORDER BY submitted_at ASC LIMIT 1",
    )
    .bind(pull_request_id)
    .fetch_optional(pool)
    .await?;

    Ok(review)
}

/// Reconcile a remote review snapshot into the store.
///
/// Sync owns `state`, `submitted_at` and `reviewer_id`.
pub async fn upsert_review(
    pool: &sqlx::SqlitePool,
    external_id: i64,
    pull_request_id: i64,
    reviewer_id: Option<i64>,
    state: ReviewState,
    submitted_at: Option<i64>,
) -> Result<(Review, UpsertOutcome), AppError> {
    let existing = get_by_external_id(pool, external_id).await?;

    match existing {
        None => {
            sqlx::query(
                "INSERT INTO reviews (external_id, pull_request_id, reviewer_id, state, submitted_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(external_id)
            .bind(pull_request_id)
            .bind(reviewer_id)
            .bind(state.to_string())
            .bind(submitted_at)
            .execute(pool)
            .await?;

            let review = get_by_external_id(pool, external_id)
                .await?
                .ok_or_else(|| AppError::internal("review vanished after insert"))?;
            Ok((review, UpsertOutcome::Inserted))
        }
        Some(review)
            if review.state == state.to_string()
                && review.submitted_at == submitted_at
                && review.reviewer_id == reviewer_id =>
        {
            Ok((review, UpsertOutcome::Unchanged))
        }
        Some(review) => {
            sqlx::query("UPDATE reviews SET reviewer_id = ?, state = ?, submitted_at = ? WHERE id = ?")
                .bind(reviewer_id)
                .bind(state.to_string())
                .bind(submitted_at)
                .bind(review.id)
                .execute(pool)
                .await?;

            let review = get_by_external_id(pool, external_id)
                .await?
                .ok_or_else(|| AppError::internal("review vanished after update"))?;
            Ok((review, UpsertOutcome::Updated))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::pull_request::{self, NewPullRequest, PullRequestState};
    use crate::models::{organization, repository};
    use tempfile::tempdir;

    async fn setup_test_db() -> (sqlx::SqlitePool, i64) {
        let dir = tempdir().unwrap().keep();
        let pool = db::initialize(&dir.join("test.db")).await.unwrap();
        let (org, _) = organization::upsert_organization(&pool, 1, "acme", "Acme", None)
            .await
            .unwrap();
        let (repo, _) =
            repository::upsert_repository(&pool, 10, org.id, "widgets", "acme/widgets", false)
                .await
                .unwrap();
        let (pr, _) = pull_request::upsert_pull_request(
            &pool,
            &NewPullRequest {
                external_id: 100,
                repository_id: repo.id,
                number: 1,
                title: "Add widget pooling".to_string(),
                author_id: None,
                state: PullRequestState::Open,
                draft: false,
                created_at: Some(1_700_000_000),
                updated_at: Some(1_700_000_100),
                closed_at: None,
                merged_at: None,
                additions: None,
                deletions: None,
                changed_files: None,
            },
        )
        .await
        .unwrap();
        (pool, pr.id)
    }

    #[tokio::test]
    async fn test_upsert_and_reread() {
        let (pool, pr_id) = setup_test_db().await;

        let (review, outcome) = upsert_review(
            &pool,
            7000,
            pr_id,
            None,
            ReviewState::Approved,
            Some(1_700_001_000),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);
        assert_eq!(review.state_enum(), ReviewState::Approved);

        // Identical snapshot: no change
        let (_, outcome) = upsert_review(
            &pool,
            7000,
            pr_id,
            None,
            ReviewState::Approved,
            Some(1_700_001_000),
        )
        .await
        .unwrap();
        assert_eq!(outcome, UpsertOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_first_review_is_earliest() {
        let (pool, pr_id) = setup_test_db().await;

        upsert_review(&pool, 7001, pr_id, None, ReviewState::Commented, Some(2_000))
            .await
            .unwrap();
        upsert_review(&pool, 7002, pr_id, None, ReviewState::Approved, Some(1_000))
            .await
            .unwrap();
        upsert_review(&pool, 7003, pr_id, None, ReviewState::ChangesRequested, Some(3_000))
            .await
            .unwrap();

        let first = first_review(&pool, pr_id).await.unwrap().unwrap();
        assert_eq!(first.external_id, 7002);
        assert_eq!(first.submitted_at, Some(1_000));
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            ReviewState::Approved,
            ReviewState::ChangesRequested,
            ReviewState::Commented,
            ReviewState::Dismissed,
        ] {
            assert_eq!(ReviewState::from(state.to_string().as_str()), state);
        }
        assert_eq!(ReviewState::from("unknown"), ReviewState::Commented);
    }
}
