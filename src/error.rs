//! Error types for status-sentinel
//!
//! This module provides the error taxonomy for the polling engine:
//! - Request failures (abort, HTTP status, rate limit) that the scheduler absorbs
//!   into the [`ErrorClassifier`](crate::classifier::ErrorClassifier)
//! - Notification module failures, wrapped with the module name
//! - Persistence failures, which are fatal to the poll loop

use crate::classifier::ErrorCategory;
use thiserror::Error;

/// Result type alias for status-sentinel operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for status-sentinel
///
/// Each variant includes enough context to log the failure at the per-account
/// boundary without re-deriving it.
#[derive(Debug, Error)]
pub enum Error {
    /// Request was aborted (deadline expired, connection refused or reset)
    #[error("request aborted: {message} ({url})")]
    Abort {
        /// Human-readable reason the request was aborted
        message: String,
        /// The URL that was being requested
        url: String,
    },

    /// Non-2xx response that is not a rate limit
    #[error("HTTP {status} from {url}")]
    Http {
        /// HTTP status code returned by the API
        status: u16,
        /// The URL that was requested
        url: String,
    },

    /// The API answered 429
    #[error("rate limited (global: {global:?}, reset: {reset_secs:?}s)")]
    RateLimit {
        /// Whether the API reported the limit as global to the key
        global: Option<bool>,
        /// Seconds until the limit resets, if the API sent a hint
        reset_secs: Option<u64>,
    },

    /// A notification module failed while handling a delta
    #[error("module {module_name} failed: {source}")]
    Module {
        /// Name of the module that failed
        module_name: String,
        /// The error the module returned
        #[source]
        source: Box<Error>,
    },

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "key_fraction")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error that is neither a timeout nor a connection failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error (API payload or persisted JSON column)
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Account not registered
    #[error("account not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

impl Error {
    /// Create a configuration error for a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// Failure category this error is recorded under in the classifier
    ///
    /// Connection and deadline failures are aborts, 5xx responses are HTTP
    /// failures, 429 is a rate limit, everything else (404 included) is generic.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Abort { .. } => ErrorCategory::Abort,
            Error::Http { status, .. } if *status >= 500 => ErrorCategory::Http,
            Error::RateLimit { .. } => ErrorCategory::RateLimit,
            Error::Network(e) if e.is_timeout() || e.is_connect() => ErrorCategory::Abort,
            Error::Http { .. }
            | Error::Module { .. }
            | Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Network(_)
            | Error::Serialization(_)
            | Error::NotFound(_)
            | Error::Other(_) => ErrorCategory::Generic,
        }
    }

    /// Returns true if the same request may succeed if re-issued after backoff
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::Abort | ErrorCategory::Http | ErrorCategory::RateLimit => true,
            ErrorCategory::Generic => false,
        }
    }

    /// Returns true if the poll loop cannot continue after this error
    ///
    /// Persistence is the only collaborator the loop cannot work around.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Database(_) | Error::Sqlx(_) => true,
            Error::Module { source, .. } => source.is_fatal(),
            _ => false,
        }
    }
}
