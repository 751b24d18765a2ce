// SQLite-backed moderation store.
//
// Tables:
// - guild_settings: per-guild policy row (one per guild)
// - warnings: durable warning ledger with optional expiration
// - infractions: append-only audit log of moderation decisions

use crate::core::moderation::{
    GuildPolicy, Infraction, InfractionAction, ModStore, ModerationError, NewInfraction, Warning,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

pub struct SqliteModStore {
    pool: Pool<Sqlite>,
}

fn storage_err(err: sqlx::Error) -> ModerationError {
    ModerationError::Storage(err.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ModerationError::Storage(format!("bad timestamp {raw:?}: {e}")))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, ModerationError> {
    raw.map(|s| parse_timestamp(&s)).transpose()
}

/// Bypass roles are stored as a sorted, deduplicated comma list.
fn parse_role_ids(raw: &str) -> Vec<u64> {
    let mut roles: Vec<u64> = raw
        .split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect();
    roles.sort_unstable();
    roles.dedup();
    roles
}

fn serialize_role_ids(role_ids: &[u64]) -> String {
    let mut roles = role_ids.to_vec();
    roles.sort_unstable();
    roles.dedup();
    roles
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl SqliteModStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Run database migrations to create required tables.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        // One statement per query; sqlx prepares single statements.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id INTEGER PRIMARY KEY,
                mod_log_channel_id INTEGER NULL,
                automod_log_channel_id INTEGER NULL,
                warn_timeout_threshold INTEGER NOT NULL DEFAULT 3,
                warn_ban_threshold INTEGER NOT NULL DEFAULT 5,
                warn_expiration_days INTEGER NOT NULL DEFAULT 60,
                warn_timeout_duration_minutes INTEGER NOT NULL DEFAULT 60,
                automod_enabled INTEGER NOT NULL DEFAULT 1,
                automod_anti_spam INTEGER NOT NULL DEFAULT 1,
                automod_anti_link INTEGER NOT NULL DEFAULT 1,
                automod_anti_mention_flood INTEGER NOT NULL DEFAULT 1,
                automod_spam_max_messages INTEGER NOT NULL DEFAULT 5,
                automod_spam_interval_seconds INTEGER NOT NULL DEFAULT 8,
                automod_mention_limit INTEGER NOT NULL DEFAULT 5,
                automod_bypass_role_ids TEXT NOT NULL DEFAULT ''
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warnings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                moderator_id INTEGER NOT NULL,
                reason TEXT NOT NULL,
                expires_at TEXT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_warnings_guild_user \
             ON warnings(guild_id, user_id, expires_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS infractions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                actor_id INTEGER NOT NULL,
                action TEXT NOT NULL,
                reason TEXT NOT NULL,
                related_warning_id INTEGER NULL,
                expires_at TEXT NULL,
                metadata TEXT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_infractions_guild_user \
             ON infractions(guild_id, user_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Create the defaults row for a guild if it doesn't exist yet.
    async fn ensure_guild_settings(&self, guild_id: u64) -> Result<(), ModerationError> {
        sqlx::query("INSERT OR IGNORE INTO guild_settings (guild_id) VALUES (?)")
            .bind(guild_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn warning_counts(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> Result<(u32, u32), ModerationError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN expires_at IS NULL OR expires_at > ? THEN 1 ELSE 0 END), 0)
                    AS active
            FROM warnings
            WHERE guild_id = ? AND user_id = ?
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        let total: i64 = row.get("total");
        let active: i64 = row.get("active");
        Ok((total as u32, active as u32))
    }

    fn decode_warning(row: &sqlx::sqlite::SqliteRow) -> Result<Warning, ModerationError> {
        Ok(Warning {
            id: row.get("id"),
            guild_id: row.get::<i64, _>("guild_id") as u64,
            user_id: row.get::<i64, _>("user_id") as u64,
            moderator_id: row.get::<i64, _>("moderator_id") as u64,
            reason: row.get("reason"),
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            expires_at: parse_optional_timestamp(row.get("expires_at"))?,
        })
    }

    fn decode_infraction(row: &sqlx::sqlite::SqliteRow) -> Result<Infraction, ModerationError> {
        let tag: String = row.get("action");
        let action = InfractionAction::from_tag(&tag)
            .ok_or_else(|| ModerationError::Storage(format!("unknown action tag {tag:?}")))?;

        let metadata = row
            .get::<Option<String>, _>("metadata")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| ModerationError::Storage(format!("bad infraction metadata: {e}")))?;

        Ok(Infraction {
            id: row.get("id"),
            guild_id: row.get::<i64, _>("guild_id") as u64,
            user_id: row.get::<i64, _>("user_id") as u64,
            actor_id: row.get::<i64, _>("actor_id") as u64,
            action,
            reason: row.get("reason"),
            related_warning_id: row.get("related_warning_id"),
            expires_at: parse_optional_timestamp(row.get("expires_at"))?,
            metadata,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
        })
    }
}

#[async_trait]
impl ModStore for SqliteModStore {
    async fn get_policy(&self, guild_id: u64) -> Result<GuildPolicy, ModerationError> {
        self.ensure_guild_settings(guild_id).await?;

        let row = sqlx::query("SELECT * FROM guild_settings WHERE guild_id = ?")
            .bind(guild_id as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(GuildPolicy {
            guild_id,
            mod_log_channel_id: row
                .get::<Option<i64>, _>("mod_log_channel_id")
                .map(|id| id as u64),
            automod_log_channel_id: row
                .get::<Option<i64>, _>("automod_log_channel_id")
                .map(|id| id as u64),
            warn_timeout_threshold: row.get::<i64, _>("warn_timeout_threshold") as u32,
            warn_ban_threshold: row.get::<i64, _>("warn_ban_threshold") as u32,
            warn_expiration_days: row.get::<i64, _>("warn_expiration_days") as u32,
            warn_timeout_duration_minutes: row.get::<i64, _>("warn_timeout_duration_minutes")
                as u32,
            automod_enabled: row.get::<i64, _>("automod_enabled") != 0,
            anti_spam: row.get::<i64, _>("automod_anti_spam") != 0,
            anti_link: row.get::<i64, _>("automod_anti_link") != 0,
            anti_mention_flood: row.get::<i64, _>("automod_anti_mention_flood") != 0,
            spam_max_messages: row.get::<i64, _>("automod_spam_max_messages") as u32,
            spam_interval_seconds: row.get::<i64, _>("automod_spam_interval_seconds") as u32,
            mention_limit: row.get::<i64, _>("automod_mention_limit") as u32,
            bypass_role_ids: parse_role_ids(&row.get::<String, _>("automod_bypass_role_ids")),
        })
    }

    async fn save_policy(&self, policy: &GuildPolicy) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO guild_settings (
                guild_id, mod_log_channel_id, automod_log_channel_id,
                warn_timeout_threshold, warn_ban_threshold, warn_expiration_days,
                warn_timeout_duration_minutes, automod_enabled, automod_anti_spam,
                automod_anti_link, automod_anti_mention_flood, automod_spam_max_messages,
                automod_spam_interval_seconds, automod_mention_limit, automod_bypass_role_ids
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                mod_log_channel_id = excluded.mod_log_channel_id,
                automod_log_channel_id = excluded.automod_log_channel_id,
                warn_timeout_threshold = excluded.warn_timeout_threshold,
                warn_ban_threshold = excluded.warn_ban_threshold,
                warn_expiration_days = excluded.warn_expiration_days,
                warn_timeout_duration_minutes = excluded.warn_timeout_duration_minutes,
                automod_enabled = excluded.automod_enabled,
                automod_anti_spam = excluded.automod_anti_spam,
                automod_anti_link = excluded.automod_anti_link,
                automod_anti_mention_flood = excluded.automod_anti_mention_flood,
                automod_spam_max_messages = excluded.automod_spam_max_messages,
                automod_spam_interval_seconds = excluded.automod_spam_interval_seconds,
                automod_mention_limit = excluded.automod_mention_limit,
                automod_bypass_role_ids = excluded.automod_bypass_role_ids
            "#,
        )
        .bind(policy.guild_id as i64)
        .bind(policy.mod_log_channel_id.map(|id| id as i64))
        .bind(policy.automod_log_channel_id.map(|id| id as i64))
        .bind(i64::from(policy.warn_timeout_threshold))
        .bind(i64::from(policy.warn_ban_threshold))
        .bind(i64::from(policy.warn_expiration_days))
        .bind(i64::from(policy.warn_timeout_duration_minutes))
        .bind(policy.automod_enabled as i64)
        .bind(policy.anti_spam as i64)
        .bind(policy.anti_link as i64)
        .bind(policy.anti_mention_flood as i64)
        .bind(i64::from(policy.spam_max_messages))
        .bind(i64::from(policy.spam_interval_seconds))
        .bind(i64::from(policy.mention_limit))
        .bind(serialize_role_ids(&policy.bypass_role_ids))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn insert_warning(
        &self,
        guild_id: u64,
        user_id: u64,
        moderator_id: u64,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<(i64, u32, u32), ModerationError> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO warnings (guild_id, user_id, moderator_id, reason, expires_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(moderator_id as i64)
        .bind(reason)
        .bind(expires_at.map(|at| at.to_rfc3339()))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        let warning_id = result.last_insert_rowid();
        let (total, active) = self.warning_counts(guild_id, user_id, now).await?;
        Ok((warning_id, total, active))
    }

    async fn count_warnings(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<(u32, u32), ModerationError> {
        self.warning_counts(guild_id, user_id, Utc::now()).await
    }

    async fn list_warnings(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<Warning>, ModerationError> {
        let safe_limit = limit.clamp(1, 50);
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, user_id, moderator_id, reason, expires_at, created_at
            FROM warnings
            WHERE guild_id = ? AND user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(i64::from(safe_limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::decode_warning).collect()
    }

    async fn delete_warnings(&self, guild_id: u64, user_id: u64) -> Result<u64, ModerationError> {
        let result = sqlx::query("DELETE FROM warnings WHERE guild_id = ? AND user_id = ?")
            .bind(guild_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn insert_infraction(&self, infraction: NewInfraction) -> Result<i64, ModerationError> {
        let metadata = infraction
            .metadata
            .as_ref()
            .map(|value| {
                serde_json::to_string(value)
                    .map_err(|e| ModerationError::Storage(format!("bad metadata: {e}")))
            })
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO infractions (
                guild_id, user_id, actor_id, action, reason,
                related_warning_id, expires_at, metadata, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(infraction.guild_id as i64)
        .bind(infraction.user_id as i64)
        .bind(infraction.actor_id as i64)
        .bind(infraction.action.as_tag())
        .bind(&infraction.reason)
        .bind(infraction.related_warning_id)
        .bind(infraction.expires_at.map(|at| at.to_rfc3339()))
        .bind(metadata)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn list_infractions(
        &self,
        guild_id: u64,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<Infraction>, ModerationError> {
        let safe_limit = limit.clamp(1, 100);
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, user_id, actor_id, action, reason,
                   related_warning_id, expires_at, metadata, created_at
            FROM infractions
            WHERE guild_id = ? AND user_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(guild_id as i64)
        .bind(user_id as i64)
        .bind(i64::from(safe_limit))
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(Self::decode_infraction).collect()
    }
}
