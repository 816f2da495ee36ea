//! Recording module and notice sink implementations

use async_trait::async_trait;
use status_sentinel::{Field, Module, ModuleContext, Notice, NoticeSink, Result, UserRecord};
use std::sync::{Arc, Mutex};

/// One module execution as seen by [`RecordingModule`]
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub module: String,
    pub account: String,
    pub changed: Vec<Field>,
    pub api_enabled: bool,
}

/// Module that records every execution
pub struct RecordingModule {
    name: &'static str,
    requires_online_status: bool,
    log: Arc<Mutex<Vec<Execution>>>,
}

impl RecordingModule {
    pub fn new(
        name: &'static str,
        requires_online_status: bool,
        log: &Arc<Mutex<Vec<Execution>>>,
    ) -> Arc<dyn Module> {
        Arc::new(Self {
            name,
            requires_online_status,
            log: log.clone(),
        })
    }
}

#[async_trait]
impl Module for RecordingModule {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_online_status(&self) -> bool {
        self.requires_online_status
    }

    async fn execute(&self, ctx: &ModuleContext<'_>) -> Result<()> {
        self.log.lock().unwrap().push(Execution {
            module: self.name.to_string(),
            account: ctx.user.id.to_string(),
            changed: ctx.delta.new_data.keys().copied().collect(),
            api_enabled: ctx.user.api_enabled(),
        });
        Ok(())
    }
}

/// Notice sink that records every notice with its account
#[derive(Default)]
pub struct RecordingNotices {
    pub sent: Mutex<Vec<(String, Notice)>>,
}

#[async_trait]
impl NoticeSink for RecordingNotices {
    async fn send(&self, user: &UserRecord, notice: Notice) -> Result<()> {
        self.sent.lock().unwrap().push((user.id.to_string(), notice));
        Ok(())
    }
}
