//! SQLite-backed identity and message store

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::{info, warn};

use super::{IdentityStore, MessageStore};
use crate::models::{ChatMessage, PresenceStatus, UserRecord};

pub struct SqliteStore {
    pool: SqlitePool,
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp {:?}", raw))?
        .with_timezone(&Utc))
}

/// Fixed-width UTC stamp, so stored values order correctly as text
fn stamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and ensure the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL {}", url))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", url))?;

        let store = Self { pool };
        store.init_db().await?;

        info!("[Store] SQLite ready at {}", url);
        Ok(store)
    }

    async fn init_db(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'offline',
                last_seen TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                last_message_id TEXT,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert an account row. Account management proper lives elsewhere; this
    /// exists for seeding and tests.
    pub async fn create_user(&self, user_id: &str, username: &str) -> Result<UserRecord> {
        let now = Utc::now();
        sqlx::query("INSERT INTO users (id, username, status, created_at) VALUES (?, ?, 'offline', ?)")
            .bind(user_id)
            .bind(username)
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create user {}", user_id))?;

        Ok(UserRecord {
            id: user_id.to_string(),
            username: username.to_string(),
            status: PresenceStatus::Offline,
            last_seen: None,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        let row: Option<(String, String, String, Option<String>)> =
            sqlx::query_as("SELECT id, username, status, last_seen FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some((id, username, status, last_seen)) = row else {
            return Ok(None);
        };

        let status = PresenceStatus::from_str(&status).unwrap_or_else(|e| {
            warn!("[Store] {}; treating {} as offline", e, id);
            PresenceStatus::Offline
        });
        let last_seen = last_seen.as_deref().map(parse_time).transpose()?;

        Ok(Some(UserRecord {
            id,
            username,
            status,
            last_seen,
        }))
    }

    async fn update_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let seen = stamp(&last_seen);
        sqlx::query(
            "UPDATE users SET status = ?, last_seen = ? WHERE id = ? AND (last_seen IS NULL OR last_seen <= ?)",
        )
        .bind(status.as_str())
        .bind(seen.clone())
        .bind(user_id)
        .bind(seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, text, timestamp) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.conversation_id)
        .bind(&message.sender_id)
        .bind(&message.text)
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to append message")?;
        Ok(())
    }

    async fn update_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, last_message_id, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                last_message_id = excluded.last_message_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(conversation_id)
        .bind(message_id)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to update conversation")?;
        Ok(())
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let rows: Vec<(String, String, String, String, String)> = sqlx::query_as(
            "SELECT id, conversation_id, sender_id, text, timestamp FROM messages WHERE conversation_id = ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, conversation_id, sender_id, text, timestamp)| {
                Ok(ChatMessage {
                    id,
                    conversation_id,
                    sender_id,
                    text,
                    timestamp: parse_time(&timestamp)?,
                })
            })
            .collect()
    }

    async fn last_message_id(&self, conversation_id: &str) -> Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT last_message_id FROM conversations WHERE id = ?")
                .bind(conversation_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(id,)| id))
    }
}
