//! Change detection between consecutive polls of one account
//!
//! [`DiffEngine::process`] is the only writer of an account's remote fields
//! and history. Each successful fetch results in exactly one
//! [`UserStore::update_user`] call.

use crate::db::UserStore;
use crate::error::{Error, Result};
use crate::types::{AccountId, Delta, Field, HistoryEntry, PlayerData, UserRecord, UserUpdate};
use chrono::Utc;
use std::sync::Arc;

/// Result of processing one fresh snapshot
#[derive(Clone, Debug)]
pub struct DiffOutcome {
    /// Fields that changed
    pub delta: Delta,
    /// The account as persisted after the update
    pub snapshot: UserRecord,
}

/// Compares fresh snapshots with the persisted ones and keeps bounded history
#[derive(Clone)]
pub struct DiffEngine {
    store: Arc<dyn UserStore>,
    history_limit: usize,
}

/// Fields whose values differ between `old` and `new`
///
/// A field that goes from a value to absent appears with `None` in
/// `new_data`; the reverse appears with `None` in `old_data`.
pub fn compute_delta(old: &PlayerData, new: &PlayerData) -> Delta {
    let mut delta = Delta::default();
    for field in Field::ALL {
        let before = field.get(old);
        let after = field.get(new);
        if before != after {
            delta.new_data.insert(field, after);
            delta.old_data.insert(field, before);
        }
    }
    delta
}

impl DiffEngine {
    /// Create an engine that keeps at most `history_limit` entries per account
    pub fn new(store: Arc<dyn UserStore>, history_limit: usize) -> Self {
        Self {
            store,
            history_limit,
        }
    }

    /// History entries retained per account
    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Diff `fresh` against the persisted record and store the result
    ///
    /// # Errors
    /// [`Error::NotFound`] when the account is not registered; persistence
    /// errors are passed through.
    pub async fn process(&self, account_id: &AccountId, fresh: PlayerData) -> Result<DiffOutcome> {
        let mut record = self
            .store
            .get_user(account_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Account {} not found", account_id)))?;

        let delta = compute_delta(&record.data, &fresh);
        let now = Utc::now();

        let history = if delta.is_empty() {
            None
        } else {
            record.history.insert(
                0,
                HistoryEntry {
                    timestamp: now.timestamp_millis(),
                    changes: delta.new_data.clone(),
                },
            );
            record.history.truncate(self.history_limit);
            Some(record.history.clone())
        };

        self.store
            .update_user(
                account_id,
                UserUpdate {
                    data: Some(fresh.clone()),
                    last_updated: Some(now),
                    history,
                    ..Default::default()
                },
            )
            .await?;

        if !delta.is_empty() {
            tracing::debug!(
                account = %account_id,
                changed = delta.new_data.len(),
                history = record.history.len(),
                "Recorded status change"
            );
        }

        record.data = fresh;
        record.last_updated = Some(now);

        Ok(DiffOutcome {
            delta,
            snapshot: record,
        })
    }
}
