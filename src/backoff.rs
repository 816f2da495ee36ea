//! Exponential cooldown for a single failure category
//!
//! A [`BackoffTimer`] grows its pause on every recorded failure and recovers on
//! its own once the pause has ended and a grace period passes without another
//! failure. Recovery is evaluated lazily against tokio's clock whenever the
//! timer is read or written, so no background task is needed.
//!
//! # Example
//!
//! ```
//! use status_sentinel::backoff::BackoffTimer;
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut timer = BackoffTimer::new(
//!     Duration::from_secs(30),
//!     Duration::from_secs(3600),
//!     Duration::from_secs(30),
//! );
//!
//! timer.record_failure();
//! assert!(timer.is_timeout());
//! assert_eq!(timer.pause_for(), Duration::from_secs(30));
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Smallest growth step when the base timeout is zero
///
/// Without it a zero-base timer would double 0 forever and never pause.
pub const ZERO_TIMEOUT_FLOOR: Duration = Duration::from_secs(30);

/// Window for the diagnostic failure counter
const FAILURE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Single-category exponential backoff with auto-decay
#[derive(Debug, Clone)]
pub struct BackoffTimer {
    /// Timeout the timer recovers to
    base_timeout: Duration,
    /// Upper bound for any pause
    max_timeout: Duration,
    /// Quiet period after `resume_at` before recovery
    grace: Duration,
    /// Growth function applied on every failure
    increment: fn(Duration) -> Duration,
    /// Pause the next failure will impose
    timeout: Duration,
    /// Pause imposed by the most recent failure
    pause_for: Duration,
    /// End of the current pause
    resume_at: Option<Instant>,
    /// Failure timestamps inside the trailing window, oldest first
    failures: VecDeque<Instant>,
}

/// Serializable view of a timer for diagnostics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackoffStatus {
    /// Pause the next failure will impose, in milliseconds
    pub timeout_ms: u64,
    /// Pause imposed by the most recent failure, in milliseconds
    pub pause_for_ms: u64,
    /// Wall-clock end of the current pause, if one is active
    pub resume_at: Option<DateTime<Utc>>,
    /// Failures recorded during the last hour
    pub failures_last_hour: usize,
}

impl BackoffTimer {
    /// Create a timer that starts at `base_timeout` and never pauses longer than `max_timeout`
    pub fn new(base_timeout: Duration, max_timeout: Duration, grace: Duration) -> Self {
        let base_timeout = base_timeout.min(max_timeout);
        Self {
            base_timeout,
            max_timeout,
            grace,
            increment: double,
            timeout: base_timeout,
            pause_for: Duration::ZERO,
            resume_at: None,
            failures: VecDeque::new(),
        }
    }

    /// Replace the growth function (doubling by default)
    #[must_use]
    pub fn with_increment(mut self, increment: fn(Duration) -> Duration) -> Self {
        self.increment = increment;
        self
    }

    /// Record a failure and start a pause
    ///
    /// The pause lasts for the current timeout; the timeout then grows for
    /// the next failure, bounded by `[base_timeout, max_timeout]`.
    pub fn record_failure(&mut self) {
        let now = Instant::now();
        self.recover_if_quiet(now);

        self.pause_for = self.timeout.min(self.max_timeout);
        self.resume_at = Some(now + self.pause_for);

        let mut next = (self.increment)(self.timeout)
            .max(self.base_timeout)
            .min(self.max_timeout);
        if next.is_zero() {
            next = ZERO_TIMEOUT_FLOOR.min(self.max_timeout);
        }
        self.timeout = next;

        self.prune_failures(now);
        self.failures.push_back(now);

        tracing::debug!(
            pause_ms = self.pause_for.as_millis() as u64,
            next_timeout_ms = self.timeout.as_millis() as u64,
            failures_last_hour = self.failures.len(),
            "Backoff failure recorded"
        );
    }

    /// Override the pause the next failure will impose
    ///
    /// Used when the remote side declares how long to wait.
    pub fn set_next_timeout(&mut self, timeout: Duration) {
        self.recover_if_quiet(Instant::now());
        self.timeout = timeout.min(self.max_timeout);
    }

    /// True while the most recent pause has not ended
    pub fn is_timeout(&self) -> bool {
        self.resume_at.is_some_and(|at| at > Instant::now())
    }

    /// Pause imposed by the most recent failure, zero once recovered
    pub fn pause_for(&self) -> Duration {
        if self.recovered(Instant::now()) {
            Duration::ZERO
        } else {
            self.pause_for
        }
    }

    /// Pause the next failure will impose
    pub fn timeout(&self) -> Duration {
        if self.recovered(Instant::now()) {
            self.base_timeout
        } else {
            self.timeout
        }
    }

    /// Time left in the current pause
    pub fn remaining(&self) -> Duration {
        self.resume_at
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or_default()
    }

    /// Failures recorded during the last hour
    pub fn failures_last_hour(&self) -> usize {
        let now = Instant::now();
        self.failures
            .iter()
            .filter(|&&at| now.duration_since(at) < FAILURE_WINDOW)
            .count()
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> BackoffStatus {
        let remaining = self.remaining();
        let resume_at = (!remaining.is_zero())
            .then(|| chrono::Duration::from_std(remaining).ok())
            .flatten()
            .map(|d| Utc::now() + d);

        BackoffStatus {
            timeout_ms: self.timeout().as_millis() as u64,
            pause_for_ms: self.pause_for().as_millis() as u64,
            resume_at,
            failures_last_hour: self.failures_last_hour(),
        }
    }

    fn recovered(&self, now: Instant) -> bool {
        match self.resume_at {
            Some(at) => now >= at + self.grace,
            None => true,
        }
    }

    fn recover_if_quiet(&mut self, now: Instant) {
        if self.resume_at.is_some() && self.recovered(now) {
            tracing::debug!(
                base_timeout_ms = self.base_timeout.as_millis() as u64,
                "Backoff recovered"
            );
            self.pause_for = Duration::ZERO;
            self.timeout = self.base_timeout;
            self.resume_at = None;
        }
    }

    fn prune_failures(&mut self, now: Instant) {
        while self
            .failures
            .front()
            .is_some_and(|&at| now.duration_since(at) >= FAILURE_WINDOW)
        {
            self.failures.pop_front();
        }
    }
}

fn double(timeout: Duration) -> Duration {
    timeout.saturating_mul(2)
}
