//! Sync orchestrator.
//!
//! Drives a full or incremental synchronization for one organization or
//! one repository:
//! - organization sync: refresh org metadata, reconcile its repositories,
//!   then ingest pull requests and reviews for the tracked ones
//! - repository sync: reconcile that repository's pull requests and their
//!   reviews, newest update first
//!
//! Entity-level failures are accumulated per resource and never abort
//! sibling processing; only a missing installation credential aborts the
//! whole run. Every upsert commits independently, so a failure deep in a
//! run does not discard earlier progress.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::pull_request::{self, NewPullRequest, PullRequestState};
use crate::models::review::{self, ReviewState};
use crate::models::{organization, repository, user, Repository, UpsertOutcome};
use crate::services::github_client::{
    parse_timestamp, RemotePullRequest, RemoteReview, SourceApi,
};
use crate::services::retry::{RetrySchedule, DEFAULT_MAX_ATTEMPTS};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Attempts per remote fetch before the resource is recorded as failed.
    pub max_attempts: u32,

    /// How many repositories may sync concurrently. Pages within one
    /// repository always stay sequential to keep cursors correct.
    pub max_concurrent_repos: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_concurrent_repos: 4,
        }
    }
}

/// Sync mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Re-read everything the source returns.
    Full,
    /// Stop a repository's pagination at the first already-seen,
    /// unchanged pull request. Purely an optimization; upserts are
    /// idempotent either way.
    Incremental,
}

/// State of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl From<&str> for SyncRunStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "running" => Self::Running,
            "completed" => Self::Completed,
            "completed_with_errors" => Self::CompletedWithErrors,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::CompletedWithErrors => write!(f, "completed_with_errors"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One failed resource within an otherwise continuing run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncErrorEntry {
    /// Resource identifier (repository full name, `PR #n`, ...).
    pub resource: String,

    /// Failure description.
    pub reason: String,
}

/// Structured result of a sync run.
///
/// Partial success is the expected outcome: `synced` and `errors` report
/// per-resource results side by side. `Failed` never appears here; the
/// fatal missing-authorization precondition surfaces as an `Err` instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Final run state.
    pub status: SyncRunStatus,

    /// Identifiers of successfully synced repositories.
    pub synced: Vec<String>,

    /// Records inserted for the first time.
    pub new_count: i64,

    /// Records whose sync-owned fields changed.
    pub updated_count: i64,

    /// Per-resource failures.
    pub errors: Vec<SyncErrorEntry>,
}

impl SyncOutcome {
    fn empty() -> Self {
        Self {
            status: SyncRunStatus::Running,
            synced: Vec::new(),
            new_count: 0,
            updated_count: 0,
            errors: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.status = if self.errors.is_empty() {
            SyncRunStatus::Completed
        } else {
            SyncRunStatus::CompletedWithErrors
        };
        self
    }

    fn record(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.new_count += 1,
            UpsertOutcome::Updated => self.updated_count += 1,
            UpsertOutcome::Unchanged => {}
        }
    }
}

/// Counters for one repository's pull-request pass.
#[derive(Debug, Default)]
struct RepoSyncStats {
    new_count: i64,
    updated_count: i64,
    errors: Vec<SyncErrorEntry>,
}

/// Sync engine.
///
/// Holds the store handle and the injected source implementation; both
/// are constructed by the process entry point.
pub struct SyncEngine {
    pool: DbPool,
    source: Arc<dyn SourceApi>,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new sync engine with default configuration.
    pub fn new(pool: DbPool, source: Arc<dyn SourceApi>) -> Self {
        Self::with_config(pool, source, SyncConfig::default())
    }

    /// Create a new sync engine with explicit configuration.
    pub fn with_config(pool: DbPool, source: Arc<dyn SourceApi>, config: SyncConfig) -> Self {
        Self {
            pool,
            source,
            config,
        }
    }

    /// Synchronize one organization: metadata, repositories, then pull
    /// requests and reviews for the tracked repositories.
    pub async fn sync_organization(
        &self,
        organization_id: i64,
        mode: SyncMode,
    ) -> Result<SyncOutcome, AppError> {
        let org = organization::get_organization(&self.pool, organization_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found_with_id("Organization", organization_id.to_string())
            })?;

        // Fatal precondition: without an installation handle there is no
        // credential to act under.
        if org.installation_id.is_none() {
            return Err(AppError::missing_authorization(organization_id));
        }

        let mut result = SyncOutcome::empty();

        // Refresh organization metadata. Not fatal unless authorization
        // itself is broken.
        match self
            .fetch_with_retry(&org.login, || self.source.get_organization(&org.login))
            .await
        {
            Ok(remote) => {
                let display_name = remote.name.clone().unwrap_or_else(|| remote.login.clone());
                let (_, outcome) = organization::upsert_organization(
                    &self.pool,
                    remote.id,
                    &remote.login,
                    &display_name,
                    remote.avatar_url.as_deref(),
                )
                .await?;
                result.record(outcome);
            }
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                result.errors.push(SyncErrorEntry {
                    resource: org.login.clone(),
                    reason: e.to_string(),
                });
            }
        }

        // Reconcile the repository list.
        let mut page = 1u32;
        loop {
            let fetched = self
                .fetch_with_retry(&org.login, || self.source.list_repositories(&org.login, page))
                .await;

            let repos_page = match fetched {
                Ok(p) => p,
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    result.errors.push(SyncErrorEntry {
                        resource: format!("{} repositories", org.login),
                        reason: e.to_string(),
                    });
                    break;
                }
            };

            for remote in &repos_page.items {
                let (_, outcome) = repository::upsert_repository(
                    &self.pool,
                    remote.id,
                    org.id,
                    &remote.name,
                    &remote.full_name,
                    remote.private,
                )
                .await?;
                result.record(outcome);
            }

            match repos_page.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        // Ingest pull requests for tracked repositories, concurrently
        // across repositories.
        let tracked = repository::list_tracked(&self.pool, org.id).await?;
        log::info!(
            "Syncing {} tracked repositories for {}",
            tracked.len(),
            org.login
        );

        let mut repo_results = stream::iter(tracked)
            .map(|repo| async move {
                let stats = self.sync_repository_pulls(&repo, mode).await;
                (repo, stats)
            })
            .buffer_unordered(self.config.max_concurrent_repos.max(1))
            .collect::<Vec<_>>()
            .await;

        // Deterministic reporting order regardless of completion order
        repo_results.sort_by(|a, b| a.0.full_name.cmp(&b.0.full_name));

        for (repo, stats) in repo_results {
            match stats {
                Ok(stats) => {
                    result.new_count += stats.new_count;
                    result.updated_count += stats.updated_count;
                    result.errors.extend(stats.errors);
                    result.synced.push(repo.full_name);
                }
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    result.errors.push(SyncErrorEntry {
                        resource: repo.full_name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(result.finish())
    }

    /// Synchronize one repository's pull requests and reviews.
    pub async fn sync_repository(
        &self,
        repository_id: i64,
        mode: SyncMode,
    ) -> Result<SyncOutcome, AppError> {
        let repo = repository::get_repository(&self.pool, repository_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found_with_id("Repository", repository_id.to_string())
            })?;
        let org = organization::get_organization(&self.pool, repo.organization_id)
            .await?
            .ok_or_else(|| {
                AppError::not_found_with_id("Organization", repo.organization_id.to_string())
            })?;

        if org.installation_id.is_none() {
            return Err(AppError::missing_authorization(org.id));
        }

        let mut result = SyncOutcome::empty();

        match self.sync_repository_pulls(&repo, mode).await {
            Ok(stats) => {
                result.new_count = stats.new_count;
                result.updated_count = stats.updated_count;
                result.errors = stats.errors;
                result.synced.push(repo.full_name.clone());
            }
            Err(e) if e.is_fatal_for_run() => return Err(e),
            Err(e) => {
                result.errors.push(SyncErrorEntry {
                    resource: repo.full_name.clone(),
                    reason: e.to_string(),
                });
            }
        }

        Ok(result.finish())
    }

    /// Page through one repository's pull requests in descending update
    /// order and reconcile each, together with its reviews.
    async fn sync_repository_pulls(
        &self,
        repo: &Repository,
        mode: SyncMode,
    ) -> Result<RepoSyncStats, AppError> {
        let mut stats = RepoSyncStats::default();
        let mut page = 1u32;
        let mut stop_early = false;

        loop {
            let prs_page = self
                .fetch_with_retry(&repo.full_name, || {
                    self.source.list_pull_requests(&repo.full_name, page)
                })
                .await?;

            for remote in &prs_page.items {
                match self.sync_pull_request(repo, remote, mode).await {
                    Ok(PullSyncStep::Continue(outcome)) => {
                        match outcome {
                            UpsertOutcome::Inserted => stats.new_count += 1,
                            UpsertOutcome::Updated => stats.updated_count += 1,
                            UpsertOutcome::Unchanged => {}
                        }
                    }
                    Ok(PullSyncStep::StopPagination) => {
                        stop_early = true;
                        break;
                    }
                    Err(e) if e.is_fatal_for_run() => return Err(e),
                    Err(e) => {
                        // One malformed or failing pull request must not
                        // abort its siblings.
                        stats.errors.push(SyncErrorEntry {
                            resource: format!("{}#{}", repo.full_name, remote.number),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            if stop_early {
                break;
            }

            match prs_page.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        repository::set_last_synced_at(&self.pool, repo.id, chrono::Utc::now().timestamp())
            .await?;

        Ok(stats)
    }

    /// Reconcile one remote pull request and, when it changed, its reviews.
    async fn sync_pull_request(
        &self,
        repo: &Repository,
        remote: &RemotePullRequest,
        mode: SyncMode,
    ) -> Result<PullSyncStep, AppError> {
        // Make sure the author exists locally before wiring the reference
        if let Some(author) = &remote.user {
            user::ensure_user(
                &self.pool,
                author.id,
                Some(&author.login),
                author.avatar_url.as_deref(),
            )
            .await?;
        }

        let snapshot = map_pull_request(repo.id, remote);
        let (pr, outcome) = pull_request::upsert_pull_request(&self.pool, &snapshot).await?;

        if mode == SyncMode::Incremental && outcome == UpsertOutcome::Unchanged {
            // Descending update order: everything after this point was
            // already seen unchanged.
            return Ok(PullSyncStep::StopPagination);
        }

        // An unchanged pull request cannot have unseen reviews (a new
        // review bumps updated_at upstream), so skip the fetch unless the
        // record changed or we are doing a full pass.
        if outcome.changed() || mode == SyncMode::Full {
            self.sync_reviews(repo, remote.number, pr.id).await?;
        }

        Ok(PullSyncStep::Continue(outcome))
    }

    /// Page through one pull request's reviews and reconcile each.
    async fn sync_reviews(
        &self,
        repo: &Repository,
        number: i64,
        pull_request_id: i64,
    ) -> Result<(), AppError> {
        let mut page = 1u32;

        loop {
            let reviews_page = self
                .fetch_with_retry(&repo.full_name, || {
                    self.source.list_reviews(&repo.full_name, number, page)
                })
                .await?;

            for remote in &reviews_page.items {
                if let Some(reviewer) = &remote.user {
                    user::ensure_user(
                        &self.pool,
                        reviewer.id,
                        Some(&reviewer.login),
                        reviewer.avatar_url.as_deref(),
                    )
                    .await?;
                }

                let (_, _) = review::upsert_review(
                    &self.pool,
                    remote.id,
                    pull_request_id,
                    remote.user.as_ref().map(|u| u.id),
                    map_review_state(remote),
                    remote.submitted_at.as_deref().and_then(parse_timestamp),
                )
                .await?;
            }

            match reviews_page.next_page {
                Some(next) => page = next,
                None => break,
            }
        }

        Ok(())
    }

    /// Run a remote fetch through the bounded retry schedule.
    ///
    /// Rate-limit hints from the source take precedence over the
    /// exponential backoff; exhaustion returns the last error so the
    /// caller can record it for that resource and move on.
    async fn fetch_with_retry<T, F, Fut>(&self, resource: &str, mut fetch: F) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        let mut schedule = RetrySchedule::new(self.config.max_attempts);

        loop {
            match fetch().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    let hint = e.retry_after_secs().map(Duration::from_secs);
                    match schedule.next_delay(hint) {
                        Some(delay) => {
                            log::warn!(
                                "Retrying {} in {:?} after: {}",
                                resource,
                                delay,
                                e
                            );
                            tokio::time::sleep(delay).await;
                        }
                        None => {
                            log::warn!(
                                "Giving up on {} after {} attempts: {}",
                                resource,
                                schedule.attempts_made(),
                                e
                            );
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Per-pull-request control flow inside the pagination loop.
enum PullSyncStep {
    Continue(UpsertOutcome),
    StopPagination,
}

/// Map a remote pull request payload to the sync-owned snapshot.
///
/// The source reports `state` as open/closed only; a closed pull request
/// with `merged_at` set was merged.
fn map_pull_request(repository_id: i64, remote: &RemotePullRequest) -> NewPullRequest {
    let merged_at = remote.merged_at.as_deref().and_then(parse_timestamp);
    let state = if merged_at.is_some() {
        PullRequestState::Merged
    } else {
        PullRequestState::from(remote.state.as_str())
    };

    NewPullRequest {
        external_id: remote.id,
        repository_id,
        number: remote.number,
        title: remote.title.clone(),
        author_id: remote.user.as_ref().map(|u| u.id),
        state,
        draft: remote.draft,
        created_at: remote.created_at.as_deref().and_then(parse_timestamp),
        updated_at: remote.updated_at.as_deref().and_then(parse_timestamp),
        closed_at: remote.closed_at.as_deref().and_then(parse_timestamp),
        merged_at,
        additions: remote.additions,
        deletions: remote.deletions,
        changed_files: remote.changed_files,
    }
}

/// Map a remote review state (`APPROVED`, ...) to the stored enum.
fn map_review_state(remote: &RemoteReview) -> ReviewState {
    ReviewState::from(remote.state.as_str())
}
