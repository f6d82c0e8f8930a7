//! Business logic services.
//!
//! This module contains the core pipeline: the remote source client, the
//! bounded retry schedule, the sync orchestrator and the metrics engine.
//!
//! Services are independent of any embedding shell; the store handle and
//! the source implementation are injected at construction.

pub mod github_client;
pub mod metrics;
pub mod retry;
pub mod sync_engine;

pub use github_client::{GithubClient, GithubClientConfig, SourceApi};
pub use metrics::{ContributorStats, MetricsSummary, TimeSeriesPoint};
pub use sync_engine::{SyncConfig, SyncEngine, SyncMode, SyncOutcome, SyncRunStatus};
