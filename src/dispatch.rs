//! Notification module selection and dispatch
//!
//! Modules are registered once, in a fixed order. For each non-empty delta the
//! dispatcher runs, in registration order, every module that
//!
//! - the account enabled, and
//! - either does not need online-status timestamps, or the account exposes them
//!
//! After the modules ran, a change of online-status visibility is reported to
//! the [`NoticeSink`] as a [`Notice`].

use crate::error::{Error, Result};
use crate::types::{Delta, Field, UserRecord};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Everything a module sees for one account
#[derive(Debug, Clone, Copy)]
pub struct ModuleContext<'a> {
    /// Fields that changed in this poll
    pub delta: &'a Delta,
    /// The account after the change was persisted
    pub user: &'a UserRecord,
    /// Locale tag for rendering messages
    pub locale: &'a str,
}

/// Notification module
///
/// Implementations render and deliver notifications for one kind of change.
/// The engine only decides whether a module runs; message content is the
/// module's business.
#[async_trait]
pub trait Module: Send + Sync {
    /// Name accounts use to enable the module
    fn name(&self) -> &str;

    /// Whether the module reads `lastLogin`/`lastLogout`
    ///
    /// Such modules are skipped for accounts that hide their online status.
    fn requires_online_status(&self) -> bool;

    /// Handle one delta
    ///
    /// # Errors
    ///
    /// Any error stops the remaining modules for this account and is reported
    /// as [`Error::Module`].
    async fn execute(&self, ctx: &ModuleContext<'_>) -> Result<()>;
}

/// Direct notice about the account's online-status visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    /// Both timestamps were visible and one is now hidden
    VisibilityLost,
    /// A timestamp was hidden and both are now visible
    VisibilityRegained,
}

/// Receiver of visibility notices
#[async_trait]
pub trait NoticeSink: Send + Sync {
    /// Deliver a notice to the account owner
    async fn send(&self, user: &UserRecord, notice: Notice) -> Result<()>;
}

/// What a dispatch did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    /// Modules that ran, in order, with their execution time
    pub modules: Vec<(String, Duration)>,
    /// Notice sent after the modules, if any
    pub notice: Option<Notice>,
}

impl DispatchReport {
    /// Names of the modules that ran
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|(name, _)| name.as_str()).collect()
    }
}

/// A module failed part-way through a dispatch
#[derive(Debug)]
pub struct DispatchFailure {
    /// Modules that completed before the failure
    pub report: DispatchReport,
    /// [`Error::Module`] naming the failing module
    pub error: Error,
}

impl From<DispatchFailure> for Error {
    fn from(failure: DispatchFailure) -> Self {
        failure.error
    }
}

/// Runs the enabled modules for an account
#[derive(Clone, Default)]
pub struct ModuleDispatcher {
    modules: Vec<Arc<dyn Module>>,
    notices: Option<Arc<dyn NoticeSink>>,
}

impl ModuleDispatcher {
    /// Create a dispatcher with no modules
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module; registration order is execution order
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Set the receiver of visibility notices
    #[must_use]
    pub fn with_notice_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.notices = Some(sink);
        self
    }

    /// Names of the registered modules, in execution order
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    /// Modules that would run for `user`
    pub fn select(&self, user: &UserRecord) -> Vec<&Arc<dyn Module>> {
        let api_enabled = user.api_enabled();
        self.modules
            .iter()
            .filter(|m| user.has_module(m.name()))
            .filter(|m| !m.requires_online_status() || api_enabled)
            .collect()
    }

    /// Run the selected modules for `delta`, then report visibility changes
    ///
    /// `user` is the account as persisted after the delta was applied.
    ///
    /// # Errors
    ///
    /// [`DispatchFailure`] carrying [`Error::Module`] from the first failing
    /// module and the timings of the modules before it. Later modules and the
    /// visibility notice are skipped.
    pub async fn dispatch(
        &self,
        delta: &Delta,
        user: &UserRecord,
    ) -> std::result::Result<DispatchReport, DispatchFailure> {
        let mut report = DispatchReport::default();
        if delta.is_empty() {
            return Ok(report);
        }

        let ctx = ModuleContext {
            delta,
            user,
            locale: &user.locale,
        };

        for module in self.select(user) {
            let started = Instant::now();
            if let Err(e) = module.execute(&ctx).await {
                return Err(DispatchFailure {
                    report,
                    error: Error::Module {
                        module_name: module.name().to_string(),
                        source: Box::new(e),
                    },
                });
            }
            let elapsed = started.elapsed();
            tracing::debug!(
                account = %user.id,
                module = module.name(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Module executed"
            );
            report.modules.push((module.name().to_string(), elapsed));
        }

        report.notice = visibility_change(delta, user);
        if let (Some(notice), Some(sink)) = (report.notice, &self.notices) {
            tracing::info!(account = %user.id, ?notice, "Online status visibility changed");
            if let Err(e) = sink.send(user, notice).await {
                tracing::warn!(account = %user.id, error = %e, "Failed to send visibility notice");
            }
        }

        Ok(report)
    }
}

/// Visibility transition implied by `delta`, given the account after the change
fn visibility_change(delta: &Delta, user: &UserRecord) -> Option<Notice> {
    let now = user.api_enabled();
    let before = |field: Field, current: Option<i64>| -> bool {
        match delta.old_data.get(&field) {
            Some(old) => old.is_some(),
            None => current.is_some(),
        }
    };
    let was = before(Field::LastLogin, user.data.last_login)
        && before(Field::LastLogout, user.data.last_logout);

    match (was, now) {
        (true, false) => Some(Notice::VisibilityLost),
        (false, true) => Some(Notice::VisibilityRegained),
        _ => None,
    }
}
