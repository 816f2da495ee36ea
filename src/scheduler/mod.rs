//! Continuous poll loop over every registered account
//!
//! One cycle loads all accounts from the [`UserStore`] and polls them strictly
//! in order. Before each request the loop
//!
//! 1. sleeps while the [`ErrorClassifier`] reports an active backoff
//! 2. sleeps until the window rolls over when the [`KeyBudget`] is spent
//!
//! A successful response goes through the [`DiffEngine`] and then the
//! [`ModuleDispatcher`]. A failed request is recorded in the classifier and
//! the loop moves on to the next account. Persistence failures end
//! [`PollScheduler::run`] with an error.
//!
//! # Example
//!
//! ```no_run
//! use status_sentinel::config::Config;
//! use status_sentinel::db::Database;
//! use status_sentinel::dispatch::ModuleDispatcher;
//! use status_sentinel::scheduler::PollScheduler;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.api.api_key = "key".to_string();
//! let db = Arc::new(Database::new(&config.persistence.database_path).await?);
//!
//! let mut scheduler = PollScheduler::new(&config, db, ModuleDispatcher::new())?;
//! scheduler.run().await?;
//! # Ok(())
//! # }
//! ```

use crate::budget::{BudgetStatus, KeyBudget};
use crate::classifier::{ClassifierStatus, ErrorCategory, ErrorClassifier};
use crate::config::{ApiConfig, Config, ConfigHandle, RuntimeConfig, SchedulerConfig};
use crate::db::UserStore;
use crate::diff::DiffEngine;
use crate::dispatch::ModuleDispatcher;
use crate::error::{Error, Result};
use crate::http::{HttpClient, RequestOptions, header_u64};
use crate::metrics::{ModuleTiming, PerformanceHistory, PerformanceRecord};
use crate::types::{PlayerData, PlayerResponse, UserRecord};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info, warn};

/// Counters of one pass over the account list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Accounts loaded at the start of the cycle
    pub accounts: usize,
    /// Accounts fetched and processed
    pub succeeded: usize,
    /// Accounts whose fetch or processing failed
    pub failed: usize,
    /// Accounts with a non-empty delta
    pub changed: usize,
    /// Accounts where a module failed
    pub module_failures: usize,
    /// The cycle ended early after too many consecutive aborts
    pub cut_short: bool,
}

/// Diagnostic snapshot of the scheduler
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    /// Completed cycles
    pub cycles: u64,
    /// Result of the last completed cycle
    pub last_cycle: Option<CycleSummary>,
    /// Backoff state
    pub classifier: ClassifierStatus,
    /// Key quota state
    pub budget: BudgetStatus,
    /// Mean total time of the retained polls, in milliseconds
    pub average_poll_ms: u64,
}

/// Result of polling one account
#[derive(Debug)]
struct PollOutcome {
    changed: bool,
    module_failed: bool,
}

/// Body of a 429 response
#[derive(Debug, Default, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    global: Option<bool>,
}

/// Poll loop driving fetch, diff and dispatch for every account
pub struct PollScheduler {
    store: Arc<dyn UserStore>,
    http: HttpClient,
    classifier: ErrorClassifier,
    budget: KeyBudget,
    diff: DiffEngine,
    dispatcher: ModuleDispatcher,
    runtime: ConfigHandle,
    api: ApiConfig,
    settings: SchedulerConfig,
    metrics: PerformanceHistory,
    cycles: u64,
    last_cycle: Option<CycleSummary>,
}

impl PollScheduler {
    /// Create a scheduler from a validated configuration
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the configuration is invalid, or an error
    /// if the HTTP client cannot be created.
    pub fn new(
        config: &Config,
        store: Arc<dyn UserStore>,
        dispatcher: ModuleDispatcher,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = ConfigHandle::new(config.runtime.clone())?;
        let budget = KeyBudget::new(&config.budget, config.runtime.key_fraction);
        let http = HttpClient::new(&config.api, runtime.clone())?.with_budget(budget.clone());

        Ok(Self {
            diff: DiffEngine::new(store.clone(), config.scheduler.history_limit),
            store,
            http,
            classifier: ErrorClassifier::new(&config.backoff),
            budget,
            dispatcher,
            runtime,
            api: config.api.clone(),
            settings: config.scheduler.clone(),
            metrics: PerformanceHistory::new(config.scheduler.metrics_limit),
            cycles: 0,
            last_cycle: None,
        })
    }

    /// Handle for changing the runtime tunables while the loop runs
    pub fn config_handle(&self) -> ConfigHandle {
        self.runtime.clone()
    }

    /// Copy of the current runtime configuration
    pub fn runtime_config(&self) -> RuntimeConfig {
        self.runtime.current()
    }

    /// Shared view of the key budget
    pub fn budget(&self) -> KeyBudget {
        self.budget.clone()
    }

    /// Backoff state
    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Timings of recent successful polls
    pub fn metrics(&self) -> &PerformanceHistory {
        &self.metrics
    }

    /// Diagnostic snapshot
    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            cycles: self.cycles,
            last_cycle: self.last_cycle.clone(),
            classifier: self.classifier.status(),
            budget: self.budget.status(),
            average_poll_ms: self.metrics.average_total().as_millis() as u64,
        }
    }

    /// Poll every account, forever
    ///
    /// Only returns on a fatal (persistence) error.
    pub async fn run(&mut self) -> Result<()> {
        info!("Poll scheduler started");

        loop {
            let summary = match self.run_cycle().await {
                Ok(summary) => summary,
                Err(e) => {
                    error!(error = %e, "Poll scheduler stopped by fatal error");
                    return Err(e);
                }
            };

            if summary.accounts == 0 {
                debug!("No registered accounts, scheduler idle");
                sleep(self.settings.idle_interval).await;
                continue;
            }

            if !self.settings.cycle_interval.is_zero() {
                sleep(self.settings.cycle_interval).await;
            }
        }
    }

    /// Poll every account once
    ///
    /// # Errors
    /// Persistence errors, including those raised inside a module.
    pub async fn run_cycle(&mut self) -> Result<CycleSummary> {
        let runtime = self.runtime.current();
        self.budget.set_fraction(runtime.key_fraction);

        let users = self.store.get_all_users().await?;
        let mut summary = CycleSummary {
            accounts: users.len(),
            ..Default::default()
        };
        let mut consecutive_aborts = 0u32;

        for user in &users {
            match self.poll_account(user).await {
                Ok(outcome) => {
                    consecutive_aborts = 0;
                    summary.succeeded += 1;
                    if outcome.changed {
                        summary.changed += 1;
                    }
                    if outcome.module_failed {
                        summary.module_failures += 1;
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    summary.failed += 1;
                    if e.category() != ErrorCategory::Abort {
                        consecutive_aborts = 0;
                        continue;
                    }
                    consecutive_aborts += 1;
                    if consecutive_aborts >= runtime.abort_threshold {
                        warn!(
                            consecutive_aborts,
                            threshold = runtime.abort_threshold,
                            "Too many aborted requests, ending cycle early"
                        );
                        summary.cut_short = true;
                        break;
                    }
                }
            }
        }

        self.cycles += 1;
        info!(
            cycle = self.cycles,
            accounts = summary.accounts,
            succeeded = summary.succeeded,
            failed = summary.failed,
            changed = summary.changed,
            "Poll cycle complete"
        );
        self.last_cycle = Some(summary.clone());
        Ok(summary)
    }

    /// Fetch, diff and dispatch one account
    async fn poll_account(&mut self, user: &UserRecord) -> Result<PollOutcome> {
        let (data, fetch) = self.fetch_with_retries(user).await?;
        let started = Instant::now();

        let outcome = match self.diff.process(&user.id, data).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if !e.is_fatal() {
                    warn!(account = %user.id, error = %e, "Failed to process status");
                }
                return Err(e);
            }
        };
        let process = started.elapsed();

        let mut module_failed = false;
        let report = match self
            .dispatcher
            .dispatch(&outcome.delta, &outcome.snapshot)
            .await
        {
            Ok(report) => report,
            Err(failure) if failure.error.is_fatal() => return Err(failure.error),
            Err(failure) => {
                warn!(account = %user.id, error = %failure.error, "Notification module failed");
                module_failed = true;
                // Modules that ran before the failure keep their timings
                failure.report
            }
        };
        let modules = report
            .modules
            .into_iter()
            .map(|(name, elapsed)| ModuleTiming { name, elapsed })
            .collect();

        self.metrics.push(PerformanceRecord {
            account: user.id.to_string(),
            timestamp: Utc::now(),
            fetch,
            process,
            modules,
            total: fetch + started.elapsed(),
        });

        Ok(PollOutcome {
            changed: !outcome.delta.is_empty(),
            module_failed,
        })
    }

    /// Fetch one account, re-polling retryable failures up to `max_retries` times
    async fn fetch_with_retries(&mut self, user: &UserRecord) -> Result<(PlayerData, Duration)> {
        let mut retries = 0;

        loop {
            self.wait_for_admission().await;
            let runtime = self.runtime.current();

            let started = Instant::now();
            match self.fetch_status(&user.uuid).await {
                Ok(data) => {
                    self.classifier.clear_global_rate_limit();
                    return Ok((data, started.elapsed()));
                }
                Err(e) => {
                    let category = self.classifier.record(&e);
                    log_fetch_failure(user, &e, category);
                    if e.is_retryable() && retries < runtime.max_retries {
                        retries += 1;
                        debug!(account = %user.id, retries, "Re-polling account");
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Sleep until the classifier and the key budget both allow a request
    async fn wait_for_admission(&self) {
        let wait = self.classifier.get_timeout();
        if !wait.is_zero() {
            info!(
                wait_ms = wait.as_millis() as u64,
                global_rate_limit = self.classifier.is_global_rate_limit(),
                "Backing off before next request"
            );
            sleep(wait).await;
        }

        if self.budget.remaining() <= 0 {
            self.budget.wait_for_window().await;
        }
    }

    /// Request the status of one game account
    async fn fetch_status(&self, uuid: &str) -> Result<PlayerData> {
        let url = status_url(&self.api.base_url, uuid)?;
        let options = RequestOptions::default().header("API-Key", self.api.api_key.clone());

        let response = self.http.request(url.as_str(), &options).await?;
        self.budget.observe(
            header_u64(&response, "RateLimit-Limit"),
            header_u64(&response, "RateLimit-Remaining"),
            header_u64(&response, "RateLimit-Reset"),
        );

        let status = response.status();
        if status.is_success() {
            let body = self.http.read_body(response, url.as_str()).await?;
            let payload: PlayerResponse = serde_json::from_slice(&body)?;
            return Ok(payload.data);
        }

        if status.as_u16() == 429 {
            let reset_secs = header_u64(&response, "RateLimit-Reset")
                .or_else(|| header_u64(&response, "Retry-After"));
            let global = self
                .http
                .read_body(response, url.as_str())
                .await
                .ok()
                .and_then(|body| serde_json::from_slice::<RateLimitBody>(&body).ok())
                .and_then(|body| body.global);
            return Err(Error::RateLimit { global, reset_secs });
        }

        Err(Error::Http {
            status: status.as_u16(),
            url: url.to_string(),
        })
    }
}

/// `{base_url}/status?uuid=<uuid>`
fn status_url(base_url: &str, uuid: &str) -> Result<url::Url> {
    let endpoint = format!("{}/status", base_url.trim_end_matches('/'));
    url::Url::parse_with_params(&endpoint, &[("uuid", uuid)])
        .map_err(|e| Error::config("api.base_url", format!("invalid URL: {}", e)))
}

fn log_fetch_failure(user: &UserRecord, e: &Error, category: ErrorCategory) {
    match e {
        Error::Http { status: 404, .. } => {
            warn!(account = %user.id, uuid = %user.uuid, "Unknown account, status not found");
        }
        Error::RateLimit { global, reset_secs } => {
            warn!(
                account = %user.id,
                global = ?global,
                reset_secs = ?reset_secs,
                "Rate limited"
            );
        }
        _ => {
            warn!(account = %user.id, uuid = %user.uuid, ?category, error = %e, "Status fetch failed");
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
