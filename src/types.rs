//! Core types for status-sentinel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a registered account (the owner of the notifications)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    /// Create a new AccountId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for AccountId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for AccountId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AccountId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AccountId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Remote status fields of one account, as last reported by the API
///
/// Every field is nullable: the API hides timestamps when the player disables
/// online-status visibility, and omits counters it has never recorded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerData {
    /// First login, unix milliseconds
    pub first_login: Option<i64>,
    /// Last login, unix milliseconds
    pub last_login: Option<i64>,
    /// Last logout, unix milliseconds
    pub last_logout: Option<i64>,
    /// Client version last used
    pub version: Option<String>,
    /// Language selected in game
    pub language: Option<String>,
    /// Game type of the current or last session
    pub game_type: Option<String>,
    /// Game mode of the current or last session
    pub game_mode: Option<String>,
    /// Map of the current or last session
    pub game_map: Option<String>,
    /// Current daily reward streak
    pub reward_score: Option<i64>,
    /// Highest daily reward streak
    pub reward_high_score: Option<i64>,
    /// Rewards claimed in total
    pub total_rewards: Option<i64>,
    /// Daily rewards claimed in total
    pub total_daily_rewards: Option<i64>,
}

impl PlayerData {
    /// Both online-status timestamps have been observed
    pub fn api_enabled(&self) -> bool {
        self.last_login.is_some() && self.last_logout.is_some()
    }
}

/// Body of a successful status API response
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResponse {
    /// Game account the status belongs to
    #[serde(default)]
    pub uuid: Option<String>,
    /// Reported fields
    #[serde(flatten)]
    pub data: PlayerData,
}

/// Value of a single tracked field
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Timestamp or counter
    Int(i64),
    /// Free text
    Text(String),
}

/// Tracked field of [`PlayerData`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    /// [`PlayerData::first_login`]
    FirstLogin,
    /// [`PlayerData::last_login`]
    LastLogin,
    /// [`PlayerData::last_logout`]
    LastLogout,
    /// [`PlayerData::version`]
    Version,
    /// [`PlayerData::language`]
    Language,
    /// [`PlayerData::game_type`]
    GameType,
    /// [`PlayerData::game_mode`]
    GameMode,
    /// [`PlayerData::game_map`]
    GameMap,
    /// [`PlayerData::reward_score`]
    RewardScore,
    /// [`PlayerData::reward_high_score`]
    RewardHighScore,
    /// [`PlayerData::total_rewards`]
    TotalRewards,
    /// [`PlayerData::total_daily_rewards`]
    TotalDailyRewards,
}

impl Field {
    /// Every tracked field
    pub const ALL: [Field; 12] = [
        Field::FirstLogin,
        Field::LastLogin,
        Field::LastLogout,
        Field::Version,
        Field::Language,
        Field::GameType,
        Field::GameMode,
        Field::GameMap,
        Field::RewardScore,
        Field::RewardHighScore,
        Field::TotalRewards,
        Field::TotalDailyRewards,
    ];

    /// Read this field from `data`
    pub fn get(self, data: &PlayerData) -> Option<FieldValue> {
        let int = |v: Option<i64>| v.map(FieldValue::Int);
        let text = |v: &Option<String>| v.clone().map(FieldValue::Text);
        match self {
            Field::FirstLogin => int(data.first_login),
            Field::LastLogin => int(data.last_login),
            Field::LastLogout => int(data.last_logout),
            Field::Version => text(&data.version),
            Field::Language => text(&data.language),
            Field::GameType => text(&data.game_type),
            Field::GameMode => text(&data.game_mode),
            Field::GameMap => text(&data.game_map),
            Field::RewardScore => int(data.reward_score),
            Field::RewardHighScore => int(data.reward_high_score),
            Field::TotalRewards => int(data.total_rewards),
            Field::TotalDailyRewards => int(data.total_daily_rewards),
        }
    }
}

/// Changed fields mapped to their values (`None` = null)
pub type FieldMap = BTreeMap<Field, Option<FieldValue>>;

/// Fields that changed between two consecutive polls of one account
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delta {
    /// New values of the changed fields
    pub new_data: FieldMap,
    /// Previous values of the same fields
    pub old_data: FieldMap,
}

impl Delta {
    /// True when nothing changed
    pub fn is_empty(&self) -> bool {
        self.new_data.is_empty()
    }

    /// True when `field` changed
    pub fn changed(&self, field: Field) -> bool {
        self.new_data.contains_key(&field)
    }
}

/// One retained delta, newest first in [`UserRecord::history`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the change was observed, unix milliseconds
    pub timestamp: i64,
    /// New values of the fields that changed
    pub changes: FieldMap,
}

/// Persisted view of one registered account
#[derive(Clone, Debug, PartialEq)]
pub struct UserRecord {
    /// Registered account
    pub id: AccountId,
    /// Game account polled for this registration
    pub uuid: String,
    /// Locale tag handed to notification modules
    pub locale: String,
    /// Names of the notification modules the account enabled
    pub modules: Vec<String>,
    /// Last-known remote fields
    pub data: PlayerData,
    /// When the remote fields were last refreshed
    pub last_updated: Option<DateTime<Utc>>,
    /// Past deltas, newest first
    pub history: Vec<HistoryEntry>,
}

impl UserRecord {
    /// Both online-status timestamps have been observed
    pub fn api_enabled(&self) -> bool {
        self.data.api_enabled()
    }

    /// True when `module` is in the enabled list
    pub fn has_module(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m == module)
    }
}

/// Account to register
#[derive(Clone, Debug)]
pub struct NewUser {
    /// Registered account
    pub id: AccountId,
    /// Game account to poll
    pub uuid: String,
    /// Locale tag
    pub locale: String,
    /// Enabled notification modules
    pub modules: Vec<String>,
    /// Remote fields known at registration
    pub data: PlayerData,
}

/// Partial update of an account row; `None` leaves a column unchanged
#[derive(Clone, Debug, Default)]
pub struct UserUpdate {
    /// Replace the remote fields
    pub data: Option<PlayerData>,
    /// Replace the refresh timestamp
    pub last_updated: Option<DateTime<Utc>>,
    /// Replace the history
    pub history: Option<Vec<HistoryEntry>>,
    /// Replace the enabled modules
    pub modules: Option<Vec<String>>,
    /// Replace the locale
    pub locale: Option<String>,
}
