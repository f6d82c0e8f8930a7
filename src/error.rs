//! Application error types.
//!
//! One crate-wide error enum shared by the source client, the store layer
//! and the sync orchestrator. All variants serialize to a structured JSON
//! object so embedders can report them without string parsing.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by the ingestion and metrics core.
///
/// The remote-facing variants (`Unauthorized`, `RateLimited`, `NotFound`,
/// `Transient`, `Validation`) map one-to-one onto source API failure kinds.
/// `Conflict` is only produced by upsert races and is resolved internally;
/// it never reaches sync callers.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Access credential is invalid, expired or revoked. Fatal for the run.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// The source API throttled us. Carries the server's retry hint.
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The remote resource no longer exists.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Network failure or server-side 5xx. Safe to retry.
    #[error("Transient error: {message}")]
    Transient { message: String },

    /// Malformed remote payload. Skip the record, continue siblings.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// Benign upsert race (duplicate key from a concurrent writer).
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// The organization has no installation credential. Fatal for the run.
    #[error("Missing authorization for organization {organization_id}")]
    MissingAuthorization { organization_id: i64 },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create an unauthorized error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a rate-limited error with a retry hint in seconds.
    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a missing-authorization error.
    pub fn missing_authorization(organization_id: i64) -> Self {
        Self::MissingAuthorization { organization_id }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    /// Retry hint in seconds, when the source provided one.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Whether this error aborts a whole sync run rather than one resource.
    pub fn is_fatal_for_run(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. } | Self::MissingAuthorization { .. }
        )
    }
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::conflict(db.message().to_string())
            }
            _ => Self::database(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transient("Request timed out")
        } else if err.is_connect() {
            Self::transient("Failed to connect to server")
        } else if err.is_decode() {
            Self::validation(format!("Malformed response body: {}", err))
        } else {
            Self::transient(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("JSON error: {}", err))
    }
}
