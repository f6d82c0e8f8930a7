//! Pull request model.

use crate::error::AppError;
use crate::models::UpsertOutcome;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle state of a pull request.
///
/// `open -> {closed, merged}`; both non-open states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

impl From<&str> for PullRequestState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "merged" => Self::Merged,
            "closed" => Self::Closed,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// A synced pull request.
///
/// The categorization fields (`category_id`, `category_confidence`,
/// `processing_status`, `processing_error`) are owned by the
/// categorization subsystem; sync preserves them verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    /// Local row id.
    pub id: i64,

    /// Source-owned pull request id (immutable).
    pub external_id: i64,

    /// Owning repository (local id).
    pub repository_id: i64,

    /// Sequence number, unique per repository.
    pub number: i64,

    /// Title.
    pub title: String,

    /// Author user id; None until the author has been observed.
    pub author_id: Option<i64>,

    /// Current state: `open`, `closed`, `merged`.
    pub state: String,

    /// Draft flag.
    pub draft: bool,

    /// Creation timestamp (Unix).
    pub created_at: Option<i64>,

    /// Last update timestamp (Unix).
    pub updated_at: Option<i64>,

    /// Close timestamp (Unix); set iff state is closed or merged.
    pub closed_at: Option<i64>,

    /// Merge timestamp (Unix); set iff state is merged.
    pub merged_at: Option<i64>,

    /// Lines added.
    pub additions: Option<i64>,

    /// Lines deleted.
    pub deletions: Option<i64>,

    /// Files changed.
    pub changed_files: Option<i64>,

    /// Assigned category, if any.
    pub category_id: Option<i64>,

    /// Confidence of the category assignment (0.0 - 1.0).
    pub category_confidence: Option<f64>,

    /// Asynchronous categorization status, if any.
    pub processing_status: Option<String>,

    /// Last categorization error, if any.
    pub processing_error: Option<String>,
}

impl PullRequest {
    /// Parse the state string into an enum.
    pub fn state_enum(&self) -> PullRequestState {
        PullRequestState::from(self.state.as_str())
    }

    /// Check if the PR is open.
    pub fn is_open(&self) -> bool {
        self.state_enum() == PullRequestState::Open
    }

    /// Total diff size (additions + deletions, missing counters as 0).
    pub fn diff_size(&self) -> i64 {
        self.additions.unwrap_or(0) + self.deletions.unwrap_or(0)
    }
}

/// Sync-owned fields of a pull request, as read from the remote source.
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub external_id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub title: String,
    pub author_id: Option<i64>,
    pub state: PullRequestState,
    pub draft: bool,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub closed_at: Option<i64>,
    pub merged_at: Option<i64>,
    pub additions: Option<i64>,
    pub deletions: Option<i64>,
    pub changed_files: Option<i64>,
}

impl NewPullRequest {
    /// Check state/timestamp coherence of a remote snapshot.
    ///
    /// Invariants: merged_at set iff merged; closed_at set iff closed or
    /// merged. A snapshot violating them is malformed and the single
    /// record is skipped, not the sync run.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.state {
            PullRequestState::Merged => {
                if self.merged_at.is_none() {
                    return Err(AppError::validation(format!(
                        "merged pull request #{} has no merged_at",
                        self.number
                    )));
                }
            }
            PullRequestState::Open => {
                if self.merged_at.is_some() || self.closed_at.is_some() {
                    return Err(AppError::validation(format!(
                        "open pull request #{} carries terminal timestamps",
                        self.number
                    )));
                }
            }
            PullRequestState::Closed => {
                if self.merged_at.is_some() {
                    return Err(AppError::validation(format!(
                        "closed pull request #{} carries a merged_at",
                        self.number
                    )));
                }
            }
        }
        Ok(())
    }

    fn matches(&self, row: &PullRequest) -> bool {
        row.title == self.title
            && row.author_id == self.author_id
            && row.state == self.state.to_string()
            && row.draft == self.draft
            && row.created_at == self.created_at
            && row.updated_at == self.updated_at
            && row.closed_at == self.closed_at
            && row.merged_at == self.merged_at
            && row.additions == self.additions
            && row.deletions == self.deletions
            && row.changed_files == self.changed_files
    }
}

const PR_COLUMNS: &str = "id, external_id, repository_id, number, title, author_id, state, draft, \
     created_at, updated_at, closed_at, merged_at, additions, deletions, changed_files, \
     category_id, category_confidence, processing_status, processing_error";

/// Look up a pull request by its external id.
pub async fn get_by_external_id(
    pool: &sqlx::SqlitePool,
    external_id: i64,
) -> Result<Option<PullRequest>, AppError> {
    let pr = sqlx::query_as::<_, PullRequest>(&format!(
        "SELECT {} FROM pull_requests WHERE external_id = ?",
        PR_COLUMNS
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(pr)
}

/// Look up a pull request by (repository, number).
pub async fn get_by_number(
    pool: &sqlx::SqlitePool,
    repository_id: i64,
    number: i64,
) -> Result<Option<PullRequest>, AppError> {
    let pr = sqlx::query_as::<_, PullRequest>(&format!(
        "SELECT {} FROM pull_requests WHERE repository_id = ? AND number = ?",
        PR_COLUMNS
    ))
    .bind(repository_id)
    .bind(number)
    .fetch_optional(pool)
    .await?;

    Ok(pr)
}

/// List pull requests for a repository, newest update first.
pub async fn list_for_repository(
    pool: &sqlx::SqlitePool,
    repository_id: i64,
) -> Result<Vec<PullRequest>, AppError> {
    let prs = sqlx::query_as::<_, PullRequest>(&format!(
        "SELECT {} FROM pull_requests WHERE repository_id = ? ORDER BY updated_at DESC",
        PR_COLUMNS
    ))
    .bind(repository_id)
    .fetch_all(pool)
    .await?;

    Ok(prs)
}

/// Reconcile a remote pull request snapshot into the store.
///
/// Inserts when the external id is unseen, updates sync-owned fields when
/// the snapshot differs, and reports `Unchanged` otherwise. The
/// categorization fields are never written here.
///
/// A UNIQUE violation on `(repository_id, number)` means a concurrent run
/// inserted the same pull request between our read and write; it is
/// resolved by re-reading the existing row, never surfaced.
pub async fn upsert_pull_request(
    pool: &sqlx::SqlitePool,
    snap: &NewPullRequest,
) -> Result<(PullRequest, UpsertOutcome), AppError> {
    snap.validate()?;

    let existing = get_by_external_id(pool, snap.external_id).await?;

    match existing {
        None => {
            let inserted = sqlx::query(
                "INSERT INTO pull_requests (
                    external_id, repository_id, number, title, author_id, state, draft,
                    created_at, updated_at, closed_at, merged_at,
                    additions, deletions, changed_files
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(snap.external_id)
            .bind(snap.repository_id)
            .bind(snap.number)
            .bind(&snap.title)
            .bind(snap.author_id)
            .bind(snap.state.to_string())
            .bind(snap.draft)
            .bind(snap.created_at)
            .bind(snap.updated_at)
            .bind(snap.closed_at)
            .bind(snap.merged_at)
            .bind(snap.additions)
            .bind(snap.deletions)
            .bind(snap.changed_files)
            .execute(pool)
            .await;

            match inserted {
                Ok(_) => {
                    let pr = get_by_external_id(pool, snap.external_id)
                        .await?
                        .ok_or_else(|| AppError::internal("pull request vanished after insert"))?;
                    Ok((pr, UpsertOutcome::Inserted))
                }
                Err(err) => {
                    // Duplicate (repository_id, number) from a racing run:
                    // benign, resolve by re-read.
                    let app_err = AppError::from(err);
                    if matches!(app_err, AppError::Conflict { .. }) {
                        let pr = get_by_number(pool, snap.repository_id, snap.number)
                            .await?
                            .ok_or_else(|| {
                                AppError::conflict(format!(
                                    "pull request #{} conflicted but is absent",
                                    snap.number
                                ))
                            })?;
                        Ok((pr, UpsertOutcome::Unchanged))
                    } else {
                        Err(app_err)
                    }
                }
            }
        }
        Some(pr) if snap.matches(&pr) => Ok((pr, UpsertOutcome::Unchanged)),
        Some(pr) => {
            sqlx::query(
                "UPDATE pull_requests SET
                    title = ?, author_id = ?, state = ?, draft = ?,
                    created_at = ?, updated_at = ?, closed_at = ?, merged_at = ?,
                    additions = ?, deletions = ?, changed_files = ?
                 WHERE id = ?",
            )
            .bind(&snap.title)
            .bind(snap.author_id)
            .bind(snap.state.to_string())
            .bind(snap.draft)
            .bind(snap.created_at)
            .bind(snap.updated_at)
            .bind(snap.closed_at)
            .bind(snap.merged_at)
            .bind(snap.additions)
            .bind(snap.deletions)
            .bind(snap.changed_files)
            .bind(pr.id)
            .execute(pool)
            .await?;

            let pr = get_by_external_id(pool, snap.external_id)
                .await?
                .ok_or_else(|| AppError::internal("pull request vanished after update"))?;
            Ok((pr, UpsertOutcome::Updated))
        }
    }
}

/// Assign a category. Categorization-subsystem entry point, not sync.
pub async fn set_category(
    pool: &sqlx::SqlitePool,
    id: i64,
    category_id: Option<i64>,
    confidence: Option<f64>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE pull_requests SET category_id = ?, category_confidence = ? WHERE id = ?")
        .bind(category_id)
        .bind(confidence)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Record asynchronous categorization progress or failure.
pub async fn set_processing_status(
    pool: &sqlx::SqlitePool,
    id: i64,
    status: Option<&str>,
    error: Option<&str>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE pull_requests SET processing_status = ?, processing_error = ? WHERE id = ?")
        .bind(status)
        .bind(error)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
