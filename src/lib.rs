//! gitpulse - engineering-activity ingestion and metrics.
//!
//! Ingests organizations, repositories, pull requests and reviews from
//! the GitHub API into a normalized local SQLite store, then derives
//! engineering-performance metrics (cycle time, review latency,
//! throughput, categorization coverage) from that store.
//!
//! The crate is embedder-agnostic: the process entry point owns the
//! database pool and the source client and injects both. A typical setup:
//!
//! ```no_run
//! use std::sync::Arc;
//! use gitpulse::services::github_client::{GithubClient, GithubClientConfig};
//! use gitpulse::services::sync_engine::{SyncEngine, SyncMode};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = gitpulse::db::initialize(std::path::Path::new("gitpulse.db")).await?;
//! let client = GithubClient::new(GithubClientConfig {
//!     token: "<installation token>".to_string(),
//!     ..Default::default()
//! })?;
//!
//! let engine = SyncEngine::new(pool.clone(), Arc::new(client));
//! let outcome = engine.sync_organization(1, SyncMode::Incremental).await?;
//! println!("synced {} repos, {} errors", outcome.synced.len(), outcome.errors.len());
//!
//! let summary = gitpulse::services::metrics::summary(&pool, 1, 30).await?;
//! println!("merge rate: {}%", summary.merge_rate);
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::AppError;
