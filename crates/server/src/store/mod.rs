//! Persistence collaborators
//!
//! Accounts and durable chat history live outside the coordination core. The
//! hub talks to them through these traits and never awaits them while holding
//! a registry or call-table lock.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{ChatMessage, PresenceStatus, UserRecord};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Account lookup and presence bookkeeping
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Record a status transition stamped `last_seen`. A write older than the
    /// stored stamp is ignored, as are unknown identities.
    async fn update_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<()>;
}

/// Durable message log and conversation metadata
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: &ChatMessage) -> Result<()>;

    /// Point the conversation at its newest message, creating the row if needed
    async fn update_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Oldest first
    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;

    async fn last_message_id(&self, conversation_id: &str) -> Result<Option<String>>;
}
