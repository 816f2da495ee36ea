//! Configuration types for status-sentinel
//!
//! [`Config`] holds settings fixed for the lifetime of the process.
//! [`RuntimeConfig`] holds the tunables an admin surface may change while the
//! poll loop is running; they are published through a [`ConfigHandle`] and
//! observed on the next cycle or request.

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;

use crate::error::{Error, Result};

/// Status API endpoint and credential
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the status API (default: "https://api.hypixel.net")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent with every request in the `API-Key` header
    #[serde(default)]
    pub api_key: String,

    /// User agent for outgoing requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            user_agent: default_user_agent(),
        }
    }
}

/// Bounds shared by every backoff timer in the classifier
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Upper bound for a single backoff pause (default: 12 hours)
    #[serde(default = "default_max_timeout", with = "duration_serde")]
    pub max_timeout: Duration,

    /// Quiet period after a pause ends before the timer fully recovers (default: 30 seconds)
    #[serde(default = "default_grace", with = "duration_serde")]
    pub grace: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_timeout: default_max_timeout(),
            grace: default_grace(),
        }
    }
}

/// Shared quota window of the API key
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Requests the key may issue per window across all consumers (default: 300)
    #[serde(default = "default_window_limit")]
    pub window_limit: u64,

    /// Length of the quota window (default: 300 seconds)
    #[serde(default = "default_window", with = "duration_serde")]
    pub window: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            window_limit: default_window_limit(),
            window: default_window(),
        }
    }
}

/// Poll loop pacing and retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Pause between two full passes over the account list (default: 0)
    #[serde(default, with = "duration_serde")]
    pub cycle_interval: Duration,

    /// Pause when no accounts are registered (default: 30 seconds)
    #[serde(default = "default_idle_interval", with = "duration_serde")]
    pub idle_interval: Duration,

    /// History entries kept per account, newest first (default: 10)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Performance records kept in memory (default: 50)
    #[serde(default = "default_metrics_limit")]
    pub metrics_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::ZERO,
            idle_interval: default_idle_interval(),
            history_limit: default_history_limit(),
            metrics_limit: default_metrics_limit(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./status-sentinel.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for the poll engine
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Status API endpoint and key
    #[serde(default)]
    pub api: ApiConfig,

    /// Settings that may change while running
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Backoff bounds
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Key quota window
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Loop pacing and retention
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check that the configuration can drive a poll loop
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.api.base_url)
            .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))?;
        if self.api.api_key.trim().is_empty() {
            return Err(Error::config("api.api_key", "API key must not be empty"));
        }
        if self.budget.window_limit == 0 {
            return Err(Error::config(
                "budget.window_limit",
                "window limit must be at least 1",
            ));
        }
        if self.budget.window.is_zero() {
            return Err(Error::config("budget.window", "window must be non-zero"));
        }
        if self.scheduler.history_limit == 0 {
            return Err(Error::config(
                "scheduler.history_limit",
                "history limit must be at least 1",
            ));
        }
        self.runtime.validate()
    }
}

/// Tunables observed by the poll loop on every cycle and request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Share of the key's quota this process may consume, in (0, 1] (default: 1.0)
    #[serde(default = "default_key_fraction")]
    pub key_fraction: f64,

    /// Deadline for a single HTTP attempt (default: 5000 ms)
    #[serde(default = "default_rest_request_timeout", with = "duration_ms_serde")]
    pub rest_request_timeout: Duration,

    /// Extra attempts the HTTP client makes on 5xx or abort (default: 2)
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,

    /// Consecutive aborts within one cycle that end the cycle early (default: 3)
    #[serde(default = "default_abort_threshold")]
    pub abort_threshold: u32,

    /// Extra polls of the same account within a cycle after a retryable failure (default: 0)
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            key_fraction: default_key_fraction(),
            rest_request_timeout: default_rest_request_timeout(),
            retry_limit: default_retry_limit(),
            abort_threshold: default_abort_threshold(),
            max_retries: 0,
        }
    }
}

impl RuntimeConfig {
    /// Reject values the poll loop cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(self.key_fraction > 0.0 && self.key_fraction <= 1.0) {
            return Err(Error::config(
                "key_fraction",
                format!("must be in (0, 1], got {}", self.key_fraction),
            ));
        }
        if self.rest_request_timeout.is_zero() {
            return Err(Error::config(
                "rest_request_timeout",
                "request timeout must be non-zero",
            ));
        }
        if self.abort_threshold == 0 {
            return Err(Error::config(
                "abort_threshold",
                "abort threshold must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Serialized setter and reader for [`RuntimeConfig`]
///
/// Clones share the same value. Updates are validated before they are
/// published, so readers never observe an invalid configuration.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    tx: Arc<watch::Sender<RuntimeConfig>>,
}

impl ConfigHandle {
    /// Create a handle holding `initial`
    pub fn new(initial: RuntimeConfig) -> Result<Self> {
        initial.validate()?;
        let (tx, _rx) = watch::channel(initial);
        Ok(Self { tx: Arc::new(tx) })
    }

    /// Copy of the current runtime configuration
    pub fn current(&self) -> RuntimeConfig {
        self.tx.borrow().clone()
    }

    /// Apply `change` to the runtime configuration
    ///
    /// The change is applied to a copy, validated, and only then published.
    /// Concurrent callers are serialized by the channel's write lock.
    pub fn update<F>(&self, change: F) -> Result<RuntimeConfig>
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let mut outcome = Ok(());
        self.tx.send_if_modified(|current| {
            let mut candidate = current.clone();
            change(&mut candidate);
            if let Err(e) = candidate.validate() {
                outcome = Err(e);
                return false;
            }
            if candidate == *current {
                return false;
            }
            *current = candidate;
            true
        });
        outcome?;

        let updated = self.current();
        tracing::info!(config = ?updated, "Runtime configuration updated");
        Ok(updated)
    }

    /// Receiver notified whenever the configuration changes
    pub fn subscribe(&self) -> watch::Receiver<RuntimeConfig> {
        self.tx.subscribe()
    }
}

fn default_base_url() -> String {
    "https://api.hypixel.net".to_string()
}

fn default_user_agent() -> String {
    concat!("status-sentinel/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_timeout() -> Duration {
    Duration::from_secs(12 * 60 * 60)
}

fn default_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_window_limit() -> u64 {
    300
}

fn default_window() -> Duration {
    Duration::from_secs(300)
}

fn default_idle_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_history_limit() -> usize {
    10
}

fn default_metrics_limit() -> usize {
    50
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./status-sentinel.db")
}

fn default_key_fraction() -> f64 {
    1.0
}

fn default_rest_request_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_retry_limit() -> u32 {
    2
}

fn default_abort_threshold() -> u32 {
    3
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
