//! Account CRUD operations.

use crate::error::{DatabaseError, Error, Result};
use crate::types::{AccountId, NewUser, PlayerData, UserRecord, UserUpdate};
use sqlx::{QueryBuilder, Sqlite};

use super::{Database, UserRow};

const USER_COLUMNS: &str = "id, uuid, locale, modules, first_login, last_login, last_logout, \
     version, language, game_type, game_mode, game_map, reward_score, reward_high_score, \
     total_rewards, total_daily_rewards, last_updated, history";

fn push_data_columns(builder: &mut QueryBuilder<'_, Sqlite>, data: &PlayerData) {
    let mut set = builder.separated(", ");
    set.push("first_login = ").push_bind_unseparated(data.first_login);
    set.push("last_login = ").push_bind_unseparated(data.last_login);
    set.push("last_logout = ").push_bind_unseparated(data.last_logout);
    set.push("version = ").push_bind_unseparated(data.version.clone());
    set.push("language = ").push_bind_unseparated(data.language.clone());
    set.push("game_type = ").push_bind_unseparated(data.game_type.clone());
    set.push("game_mode = ").push_bind_unseparated(data.game_mode.clone());
    set.push("game_map = ").push_bind_unseparated(data.game_map.clone());
    set.push("reward_score = ").push_bind_unseparated(data.reward_score);
    set.push("reward_high_score = ")
        .push_bind_unseparated(data.reward_high_score);
    set.push("total_rewards = ").push_bind_unseparated(data.total_rewards);
    set.push("total_daily_rewards = ")
        .push_bind_unseparated(data.total_daily_rewards);
}

impl Database {
    /// Register a new account
    ///
    /// # Errors
    /// [`DatabaseError::ConstraintViolation`] when the id is already registered
    pub async fn insert_user(&self, user: &NewUser) -> Result<()> {
        let modules = serde_json::to_string(&user.modules)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO users (
                id, uuid, locale, modules,
                first_login, last_login, last_logout,
                version, language, game_type, game_mode, game_map,
                reward_score, reward_high_score, total_rewards, total_daily_rewards,
                created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.uuid)
        .bind(&user.locale)
        .bind(modules)
        .bind(user.data.first_login)
        .bind(user.data.last_login)
        .bind(user.data.last_logout)
        .bind(&user.data.version)
        .bind(&user.data.language)
        .bind(&user.data.game_type)
        .bind(&user.data.game_mode)
        .bind(&user.data.game_map)
        .bind(user.data.reward_score)
        .bind(user.data.reward_high_score)
        .bind(user.data.total_rewards)
        .bind(user.data.total_daily_rewards)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Error::Database(DatabaseError::ConstraintViolation(format!(
                    "Account {} is already registered",
                    user.id
                )))
            }
            e => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert user: {}",
                e
            ))),
        })?;

        tracing::debug!(account = %user.id, uuid = %user.uuid, "Registered account");
        Ok(())
    }

    /// Get an account by id
    pub async fn get_user(&self, id: &AccountId) -> Result<Option<UserRecord>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get user: {}",
                e
            )))
        })?;

        row.map(UserRecord::try_from).transpose()
    }

    /// List every account in registration order
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list users: {}",
                e
            )))
        })?;

        rows.into_iter().map(UserRecord::try_from).collect()
    }

    /// Apply a partial update in a single statement
    ///
    /// An empty update only checks that the account exists.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the account is not registered
    pub async fn update_user(&self, id: &AccountId, update: &UserUpdate) -> Result<()> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new("UPDATE users SET ");
        let mut any = false;

        if let Some(data) = &update.data {
            push_data_columns(&mut builder, data);
            any = true;
        }
        if let Some(last_updated) = update.last_updated {
            if any {
                builder.push(", ");
            }
            builder
                .push("last_updated = ")
                .push_bind(last_updated.timestamp_millis());
            any = true;
        }
        if let Some(history) = &update.history {
            if any {
                builder.push(", ");
            }
            builder
                .push("history = ")
                .push_bind(serde_json::to_string(history)?);
            any = true;
        }
        if let Some(modules) = &update.modules {
            if any {
                builder.push(", ");
            }
            builder
                .push("modules = ")
                .push_bind(serde_json::to_string(modules)?);
            any = true;
        }
        if let Some(locale) = &update.locale {
            if any {
                builder.push(", ");
            }
            builder.push("locale = ").push_bind(locale.clone());
            any = true;
        }

        if !any {
            return match self.get_user(id).await? {
                Some(_) => Ok(()),
                None => Err(Error::NotFound(format!("Account {} not found", id))),
            };
        }

        builder.push(" WHERE id = ").push_bind(id.clone());

        let result = builder.build().execute(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update user: {}",
                e
            )))
        })?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Account {} not found", id)));
        }

        Ok(())
    }

    /// Delete an account, returning whether a row was removed
    pub async fn delete_user(&self, id: &AccountId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete user: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    /// Number of registered accounts
    pub async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count users: {}",
                    e
                )))
            })?;
        Ok(count)
    }
}
