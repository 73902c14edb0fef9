//! In-process store for tests and `PARLEY_STORE=memory` runs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use super::{IdentityStore, MessageStore};
use crate::models::{ChatMessage, PresenceStatus, UserRecord};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, UserRecord>>,
    messages: RwLock<Vec<ChatMessage>>,
    last_message: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user_id: &str, username: &str) {
        self.users.write().await.insert(
            user_id.to_string(),
            UserRecord {
                id: user_id.to_string(),
                username: username.to_string(),
                status: PresenceStatus::Offline,
                last_seen: None,
            },
        );
    }

    /// Make every subsequent message write fail
    pub fn fail_message_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent message write, simulating a slow backend
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock() = delay;
    }

    async fn before_write(&self) -> Result<()> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("message store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn find_user(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.read().await.get(user_id).cloned())
    }

    async fn update_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> Result<()> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(user_id) else {
            return Ok(());
        };
        if user.last_seen.map_or(true, |prev| prev <= last_seen) {
            user.status = status;
            user.last_seen = Some(last_seen);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> Result<()> {
        self.before_write().await?;
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn update_last_message(
        &self,
        conversation_id: &str,
        message_id: &str,
        _at: DateTime<Utc>,
    ) -> Result<()> {
        self.last_message
            .write()
            .await
            .insert(conversation_id.to_string(), message_id.to_string());
        Ok(())
    }

    async fn conversation_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn last_message_id(&self, conversation_id: &str) -> Result<Option<String>> {
        Ok(self.last_message.read().await.get(conversation_id).cloned())
    }
}
