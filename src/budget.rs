//! Admission control for a shared, quota-limited API key
//!
//! The key allows `window_limit` requests per window across every process
//! that uses it. [`KeyBudget`] lets this process consume only `fraction` of
//! that quota, leaving the rest for the other consumers.
//!
//! # Algorithm
//!
//! - The allowance for a window is `floor(window_limit * fraction)`
//! - Every issued request counts against the window
//! - When the API reports `RateLimit-*` headers, the usage is replaced by the
//!   key-wide usage the API observed, so requests made by other consumers
//!   count too
//! - Once the usage reaches the allowance the caller waits for the window to
//!   roll over
//!
//! Counters are atomics so clones can be read from an admin surface while the
//! poll loop updates them.

use crate::config::BudgetConfig;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Key quota tracker shared between the poll loop and observers
#[derive(Clone, Debug)]
pub struct KeyBudget {
    /// Requests the key may issue per window
    window_limit: Arc<AtomicU64>,
    /// Requests counted against the current window
    window_usage: Arc<AtomicU64>,
    /// `f64` bits of the share this process may consume
    fraction: Arc<AtomicU64>,
    /// End of the current window (nanoseconds since `origin`)
    window_end: Arc<AtomicU64>,
    /// Default window length when the API sends no reset hint
    window: Duration,
    /// Clock origin for the nanosecond fields
    origin: Instant,
}

/// Serializable view of the budget
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    /// Requests the key may issue per window
    pub window_limit: u64,
    /// Share this process may consume
    pub fraction: f64,
    /// Requests this process may count per window
    pub allowance: u64,
    /// Requests counted in the current window
    pub window_usage: u64,
    /// Requests left before the loop must wait
    pub remaining: i64,
    /// Time until the window rolls over, in milliseconds
    pub resets_in_ms: u64,
}

impl KeyBudget {
    /// Create a budget with an empty first window
    pub fn new(config: &BudgetConfig, fraction: f64) -> Self {
        Self {
            window_limit: Arc::new(AtomicU64::new(config.window_limit)),
            window_usage: Arc::new(AtomicU64::new(0)),
            fraction: Arc::new(AtomicU64::new(fraction.to_bits())),
            window_end: Arc::new(AtomicU64::new(config.window.as_nanos() as u64)),
            window: config.window,
            origin: Instant::now(),
        }
    }

    /// Change the share this process may consume
    pub fn set_fraction(&self, fraction: f64) {
        let old = f64::from_bits(self.fraction.swap(fraction.to_bits(), Ordering::SeqCst));
        if old != fraction {
            tracing::info!(old, new = fraction, "Key budget fraction changed");
        }
    }

    /// Share this process may consume
    pub fn fraction(&self) -> f64 {
        f64::from_bits(self.fraction.load(Ordering::Relaxed))
    }

    /// Requests this process may count per window
    ///
    /// Never zero while the fraction is positive, so a tiny fraction still
    /// makes progress.
    pub fn allowance(&self) -> u64 {
        let limit = self.window_limit.load(Ordering::Relaxed);
        let share = (limit as f64 * self.fraction()).floor() as u64;
        if limit > 0 && self.fraction() > 0.0 {
            share.max(1)
        } else {
            share
        }
    }

    /// Requests left in the current window; the loop must wait when `<= 0`
    pub fn remaining(&self) -> i64 {
        self.roll_if_expired();
        self.allowance() as i64 - self.window_usage.load(Ordering::SeqCst) as i64
    }

    /// Count one issued request
    pub fn record_usage(&self) {
        self.roll_if_expired();
        self.window_usage.fetch_add(1, Ordering::SeqCst);
    }

    /// Adopt the key-wide counters reported by the API
    ///
    /// `limit` and `remaining` come from `RateLimit-Limit` and
    /// `RateLimit-Remaining`; `reset_secs` from `RateLimit-Reset`. Missing
    /// values leave the local bookkeeping in place.
    pub fn observe(&self, limit: Option<u64>, remaining: Option<u64>, reset_secs: Option<u64>) {
        if let Some(limit) = limit {
            self.window_limit.store(limit, Ordering::SeqCst);
        }
        if let Some(remaining) = remaining {
            let limit = self.window_limit.load(Ordering::SeqCst);
            self.window_usage
                .store(limit.saturating_sub(remaining), Ordering::SeqCst);
        }
        if let Some(reset) = reset_secs {
            let now = self.now_nanos();
            let end = now.saturating_add(Duration::from_secs(reset).as_nanos() as u64);
            self.window_end.store(end, Ordering::SeqCst);
        }
    }

    /// Time until the current window rolls over
    pub fn time_until_reset(&self) -> Duration {
        let end = self.window_end.load(Ordering::SeqCst);
        Duration::from_nanos(end.saturating_sub(self.now_nanos()))
    }

    /// Sleep until the current window rolls over, then start a new one
    pub async fn wait_for_window(&self) {
        let wait = self.time_until_reset();
        if !wait.is_zero() {
            tracing::info!(
                wait_ms = wait.as_millis() as u64,
                usage = self.window_usage.load(Ordering::Relaxed),
                allowance = self.allowance(),
                "Key budget exhausted, waiting for window reset"
            );
            tokio::time::sleep(wait).await;
        }
        self.roll_if_expired();
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> BudgetStatus {
        let remaining = self.remaining();
        BudgetStatus {
            window_limit: self.window_limit.load(Ordering::Relaxed),
            fraction: self.fraction(),
            allowance: self.allowance(),
            window_usage: self.window_usage.load(Ordering::Relaxed),
            remaining,
            resets_in_ms: self.time_until_reset().as_millis() as u64,
        }
    }

    fn roll_if_expired(&self) {
        let now = self.now_nanos();
        let end = self.window_end.load(Ordering::SeqCst);
        if now < end {
            return;
        }
        // Only the caller that moves the window end resets the counters
        let next_end = now.saturating_add(self.window.as_nanos() as u64);
        if self
            .window_end
            .compare_exchange(end, next_end, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.window_usage.store(0, Ordering::SeqCst);
        }
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}
