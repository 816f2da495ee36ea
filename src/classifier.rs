//! Failure classification and unified backoff
//!
//! The [`ErrorClassifier`] keeps one [`BackoffTimer`] per [`ErrorCategory`].
//! Categories recover independently: a burst of connection aborts does not
//! lengthen the HTTP backoff, and a rate-limit reset announced by the API
//! replaces the exponential guess for that category.

use crate::backoff::{BackoffStatus, BackoffTimer};
use crate::config::BackoffConfig;
use crate::error::Error;
use serde::Serialize;
use std::time::Duration;

/// Category a failed request is recorded under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Deadline expired or the connection failed
    Abort,
    /// Server-side (5xx) failure
    Http,
    /// The API answered 429
    RateLimit,
    /// Anything else
    Generic,
}

impl ErrorCategory {
    /// All categories, in reporting order
    pub const ALL: [ErrorCategory; 4] = [
        ErrorCategory::Abort,
        ErrorCategory::Http,
        ErrorCategory::RateLimit,
        ErrorCategory::Generic,
    ];

    /// Timeout the category's timer starts from
    pub fn base_timeout(self) -> Duration {
        match self {
            ErrorCategory::Abort => Duration::ZERO,
            ErrorCategory::Http | ErrorCategory::RateLimit | ErrorCategory::Generic => {
                Duration::from_secs(30)
            }
        }
    }
}

/// Per-category backoff with a combined wait
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    abort: BackoffTimer,
    http: BackoffTimer,
    rate_limit: BackoffTimer,
    generic: BackoffTimer,
    is_global_rate_limit: bool,
}

/// Serializable view of the classifier for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierStatus {
    /// Combined wait the scheduler would sleep right now, in milliseconds
    pub timeout_ms: u64,
    /// Whether the last rate limit was reported as global to the key
    pub is_global_rate_limit: bool,
    /// Per-category timer state
    pub abort: BackoffStatus,
    /// Per-category timer state
    pub http: BackoffStatus,
    /// Per-category timer state
    pub rate_limit: BackoffStatus,
    /// Per-category timer state
    pub generic: BackoffStatus,
}

impl ErrorClassifier {
    /// Create a classifier whose timers share the configured bounds
    pub fn new(config: &BackoffConfig) -> Self {
        let timer = |category: ErrorCategory| {
            BackoffTimer::new(category.base_timeout(), config.max_timeout, config.grace)
        };
        Self {
            abort: timer(ErrorCategory::Abort),
            http: timer(ErrorCategory::Http),
            rate_limit: timer(ErrorCategory::RateLimit),
            generic: timer(ErrorCategory::Generic),
            is_global_rate_limit: false,
        }
    }

    /// Record an aborted request
    pub fn add_abort(&mut self) {
        self.abort.record_failure();
    }

    /// Record a server-side failure
    pub fn add_http(&mut self) {
        self.http.record_failure();
    }

    /// Record an unclassified failure
    pub fn add_generic(&mut self) {
        self.generic.record_failure();
    }

    /// Record a rate limit
    ///
    /// A reset hint from the API sets the pause to `reset + 1` seconds before
    /// the failure is recorded. `global` latches until
    /// [`clear_global_rate_limit`](Self::clear_global_rate_limit); `None`
    /// keeps the previous value.
    pub fn add_rate_limit(&mut self, global: Option<bool>, reset_secs: Option<u64>) {
        if let Some(reset) = reset_secs {
            self.rate_limit
                .set_next_timeout(Duration::from_secs(reset.saturating_add(1)));
        }
        self.rate_limit.record_failure();
        if let Some(global) = global {
            self.is_global_rate_limit = global;
        }
    }

    /// Record a failed request under its category
    pub fn record(&mut self, error: &Error) -> ErrorCategory {
        let category = error.category();
        match (category, error) {
            (ErrorCategory::RateLimit, Error::RateLimit { global, reset_secs }) => {
                self.add_rate_limit(*global, *reset_secs)
            }
            (ErrorCategory::RateLimit, _) => self.add_rate_limit(None, None),
            (ErrorCategory::Abort, _) => self.add_abort(),
            (ErrorCategory::Http, _) => self.add_http(),
            (ErrorCategory::Generic, _) => self.add_generic(),
        }
        category
    }

    /// Whether the last rate limit was global to the key
    pub fn is_global_rate_limit(&self) -> bool {
        self.is_global_rate_limit
    }

    /// Reset the global rate-limit latch
    pub fn clear_global_rate_limit(&mut self) {
        if self.is_global_rate_limit {
            tracing::info!("Global rate limit cleared");
        }
        self.is_global_rate_limit = false;
    }

    /// True if any category is pausing
    pub fn is_timeout(&self) -> bool {
        self.timers().iter().any(|t| t.is_timeout())
    }

    /// Wait that clears every active category
    ///
    /// Zero when no category is pausing, otherwise the longest pause among
    /// all four timers.
    pub fn get_timeout(&self) -> Duration {
        if !self.is_timeout() {
            return Duration::ZERO;
        }
        self.timers()
            .iter()
            .map(|t| t.pause_for())
            .max()
            .unwrap_or_default()
    }

    /// Timer for a category
    pub fn timer(&self, category: ErrorCategory) -> &BackoffTimer {
        match category {
            ErrorCategory::Abort => &self.abort,
            ErrorCategory::Http => &self.http,
            ErrorCategory::RateLimit => &self.rate_limit,
            ErrorCategory::Generic => &self.generic,
        }
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> ClassifierStatus {
        ClassifierStatus {
            timeout_ms: self.get_timeout().as_millis() as u64,
            is_global_rate_limit: self.is_global_rate_limit,
            abort: self.abort.status(),
            http: self.http.status(),
            rate_limit: self.rate_limit.status(),
            generic: self.generic.status(),
        }
    }

    fn timers(&self) -> [&BackoffTimer; 4] {
        [&self.abort, &self.http, &self.rate_limit, &self.generic]
    }
}
