//! # status-sentinel
//!
//! Polling engine that watches a rate-limited game-status API for a set of
//! registered accounts and hands every observed change to pluggable
//! notification modules.
//!
//! ## Design Philosophy
//!
//! status-sentinel is designed to be:
//! - **Polite to the API** - One shared key, a configurable share of its quota,
//!   and per-category exponential backoff
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Pluggable** - Persistence, notification modules and visibility notices
//!   are traits the embedding application implements
//!
//! ## Quick Start
//!
//! ```no_run
//! use status_sentinel::{Config, Database, ModuleDispatcher, PollScheduler, run_until_signal};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.api.api_key = std::env::var("API_KEY")?;
//!
//!     let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!     let mut scheduler = PollScheduler::new(&config, db, ModuleDispatcher::new())?;
//!
//!     // Runs until SIGTERM/SIGINT or a fatal persistence error
//!     run_until_signal(&mut scheduler).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Exponential backoff timer
pub mod backoff;
/// Shared API key quota
pub mod budget;
/// Failure classification and unified backoff
pub mod classifier;
/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Change detection and history
pub mod diff;
/// Notification module dispatch
pub mod dispatch;
/// Error types
pub mod error;
/// HTTP client with deadline and retry
pub mod http;
/// Poll performance history
pub mod metrics;
/// Main poll loop
pub mod scheduler;
/// Core types
pub mod types;

// Re-export commonly used types
pub use backoff::BackoffTimer;
pub use budget::KeyBudget;
pub use classifier::{ErrorCategory, ErrorClassifier};
pub use config::{Config, ConfigHandle, RuntimeConfig};
pub use db::{Database, UserStore};
pub use diff::{DiffEngine, DiffOutcome, compute_delta};
pub use dispatch::{
    DispatchFailure, DispatchReport, Module, ModuleContext, ModuleDispatcher, Notice, NoticeSink,
};
pub use error::{DatabaseError, Error, Result};
pub use http::{HttpClient, RequestOptions};
pub use scheduler::{CycleSummary, PollScheduler};
pub use types::{
    AccountId, Delta, Field, FieldValue, HistoryEntry, NewUser, PlayerData, UserRecord, UserUpdate,
};

/// Run the poll loop until a termination signal arrives.
///
/// Returns `Ok(())` after a signal and the scheduler's error if the loop
/// stopped on a fatal error first. An in-flight request is dropped.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub async fn run_until_signal(scheduler: &mut PollScheduler) -> Result<()> {
    tokio::select! {
        result = scheduler.run() => result,
        _ = wait_for_signal() => {
            tracing::info!("Stopping poll scheduler");
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
