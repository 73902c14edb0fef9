//! Message Relay
//!
//! Durability is delegated to the [`MessageStore`]; the relay only decides who
//! hears about a message. The store is awaited before any lock is taken, so a
//! slow write holds up only the sender's own connection.

use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::HubError;
use crate::models::ChatMessage;
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::MessageStore;

pub struct MessageRelay {
    store: Arc<dyn MessageStore>,
}

impl MessageRelay {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self { store }
    }

    /// Persist, deliver to the receiver if reachable, acknowledge the sender.
    ///
    /// A failed write is reported to the sender as `message:error` and nothing
    /// is delivered.
    pub async fn send(
        &self,
        registry: &RwLock<ConnectionRegistry>,
        origin: &ConnectionHandle,
        sender_id: &str,
        receiver_id: &str,
        text: String,
        conversation_id: String,
    ) -> std::result::Result<ChatMessage, HubError> {
        let message = ChatMessage::new(conversation_id, sender_id, text);

        if let Err(e) = self.persist(&message).await {
            warn!(
                "[Messages] failed to store message from {} in {}: {:#}",
                sender_id, message.conversation_id, e
            );
            let err = HubError::Store(e.to_string());
            origin.send(ServerEvent::MessageError {
                error: err.to_string(),
            });
            return Err(err);
        }

        let delivered = registry.read().send_to(
            receiver_id,
            ServerEvent::MessageReceived {
                message: message.clone(),
                conversation_id: message.conversation_id.clone(),
            },
        );
        debug!(
            "[Messages] {} -> {} in {} (live delivery: {})",
            sender_id, receiver_id, message.conversation_id, delivered
        );

        origin.send(ServerEvent::MessageSent {
            message: message.clone(),
        });
        Ok(message)
    }

    async fn persist(&self, message: &ChatMessage) -> Result<()> {
        self.store.append_message(message).await?;
        self.store
            .update_last_message(&message.conversation_id, &message.id, message.timestamp)
            .await
    }
}
