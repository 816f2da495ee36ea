//! Database layer for status-sentinel
//!
//! Handles SQLite persistence for registered accounts and their last-known
//! status.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - `migrations`: database lifecycle, schema migrations
//! - `users`: account CRUD backing the [`UserStore`] implementation
//!
//! Every column has a fixed type. The only JSON columns are `modules` and
//! `history`, and they are always decoded as JSON.

use crate::error::{Error, Result};
use crate::types::{AccountId, HistoryEntry, NewUser, PlayerData, UserRecord, UserUpdate};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod users;

/// Persistence collaborator of the poll engine
///
/// The engine needs CRUD by account id and a full listing, nothing more. One
/// `update_user` call must be applied atomically.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load one account
    async fn get_user(&self, id: &AccountId) -> Result<Option<UserRecord>>;

    /// Apply a partial update to one account
    ///
    /// # Errors
    /// [`Error::NotFound`] when the account is not registered
    async fn update_user(&self, id: &AccountId, update: UserUpdate) -> Result<()>;

    /// Register an account
    async fn new_user(&self, user: NewUser) -> Result<()>;

    /// Load every registered account
    async fn get_all_users(&self) -> Result<Vec<UserRecord>>;

    /// Deregister an account, returning whether it existed
    async fn delete_user(&self, id: &AccountId) -> Result<bool>;
}

/// Account record from database (raw from SQLite)
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    /// Registered account
    pub id: AccountId,
    /// Game account polled for this registration
    pub uuid: String,
    /// Locale tag
    pub locale: String,
    /// JSON array of enabled module names
    pub modules: String,
    /// First login, unix milliseconds
    pub first_login: Option<i64>,
    /// Last login, unix milliseconds
    pub last_login: Option<i64>,
    /// Last logout, unix milliseconds
    pub last_logout: Option<i64>,
    /// Client version
    pub version: Option<String>,
    /// In-game language
    pub language: Option<String>,
    /// Game type
    pub game_type: Option<String>,
    /// Game mode
    pub game_mode: Option<String>,
    /// Map
    pub game_map: Option<String>,
    /// Current reward streak
    pub reward_score: Option<i64>,
    /// Highest reward streak
    pub reward_high_score: Option<i64>,
    /// Rewards claimed
    pub total_rewards: Option<i64>,
    /// Daily rewards claimed
    pub total_daily_rewards: Option<i64>,
    /// Unix milliseconds of the last refresh
    pub last_updated: Option<i64>,
    /// JSON array of history entries, newest first
    pub history: String,
}

impl TryFrom<UserRow> for UserRecord {
    type Error = Error;

    fn try_from(row: UserRow) -> Result<Self> {
        let modules: Vec<String> = serde_json::from_str(&row.modules)?;
        let history: Vec<HistoryEntry> = serde_json::from_str(&row.history)?;

        Ok(UserRecord {
            id: row.id,
            uuid: row.uuid,
            locale: row.locale,
            modules,
            data: PlayerData {
                first_login: row.first_login,
                last_login: row.last_login,
                last_logout: row.last_logout,
                version: row.version,
                language: row.language,
                game_type: row.game_type,
                game_mode: row.game_mode,
                game_map: row.game_map,
                reward_score: row.reward_score,
                reward_high_score: row.reward_high_score,
                total_rewards: row.total_rewards,
                total_daily_rewards: row.total_daily_rewards,
            },
            last_updated: row
                .last_updated
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            history,
        })
    }
}

/// Database handle for status-sentinel
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl UserStore for Database {
    async fn get_user(&self, id: &AccountId) -> Result<Option<UserRecord>> {
        Database::get_user(self, id).await
    }

    async fn update_user(&self, id: &AccountId, update: UserUpdate) -> Result<()> {
        Database::update_user(self, id, &update).await
    }

    async fn new_user(&self, user: NewUser) -> Result<()> {
        self.insert_user(&user).await
    }

    async fn get_all_users(&self) -> Result<Vec<UserRecord>> {
        self.list_users().await
    }

    async fn delete_user(&self, id: &AccountId) -> Result<bool> {
        Database::delete_user(self, id).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
