//! Rolling per-account performance history

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Timings of one successful poll
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    /// Account that was polled
    pub account: String,
    /// When the poll finished
    pub timestamp: DateTime<Utc>,
    /// HTTP request and body decode
    #[serde(with = "millis")]
    pub fetch: Duration,
    /// Diff and persistence
    #[serde(with = "millis")]
    pub process: Duration,
    /// Module executions, in order
    pub modules: Vec<ModuleTiming>,
    /// Whole poll
    #[serde(with = "millis")]
    pub total: Duration,
}

/// Execution time of one module
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleTiming {
    /// Module name
    pub name: String,
    /// Time spent in the module
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

/// Bounded history of [`PerformanceRecord`]s, newest last
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceHistory {
    records: VecDeque<PerformanceRecord>,
    #[serde(skip)]
    limit: usize,
}

impl PerformanceHistory {
    /// Create an empty history that keeps at most `limit` records
    pub fn new(limit: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Append a record, dropping the oldest once full
    pub fn push(&mut self, record: PerformanceRecord) {
        if self.limit == 0 {
            return;
        }
        while self.records.len() >= self.limit {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Recorded polls, oldest first
    pub fn records(&self) -> impl Iterator<Item = &PerformanceRecord> {
        self.records.iter()
    }

    /// Most recent record
    pub fn latest(&self) -> Option<&PerformanceRecord> {
        self.records.back()
    }

    /// Number of retained records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was recorded yet
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Mean total poll time over the retained records
    pub fn average_total(&self) -> Duration {
        if self.records.is_empty() {
            return Duration::ZERO;
        }
        let sum: Duration = self.records.iter().map(|r| r.total).sum();
        sum / self.records.len() as u32
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }
}
