//! Owner of all live coordination state.
//!
//! Lock discipline:
//! - the call table (`calls`) is always taken before the registry;
//! - call-table operations hold the call lock for the whole mutation plus
//!   its notifications, so concurrent accept/reject/end/disconnect on one
//!   call id resolve to exactly one outcome;
//! - `leave` holds both locks while unbinding the connection and running the
//!   disconnect cascade, so no reader ever sees the connection gone while one
//!   of its calls survives;
//! - no lock is held across an `.await`; store calls happen before or after.

mod session;

pub use session::Session;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::calls::{CallRequest, CallSessionManager};
use crate::error::HubError;
use crate::models::{
    CallId, CallSession, ChatMessage, ConnectionId, MediaKind, PresenceRecord, PresenceStatus,
};
use crate::presence;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::relay::{relay_negotiation, relay_typing, MessageRelay, NegotiationPayload};
use crate::store::{IdentityStore, MessageStore};

/// Counts reported by the introspection endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubStats {
    pub active_users: usize,
    pub active_calls: usize,
}

pub struct Hub {
    registry: RwLock<ConnectionRegistry>,
    calls: Mutex<CallSessionManager>,
    messages: MessageRelay,
    identities: Arc<dyn IdentityStore>,
}

impl Hub {
    pub fn new(identities: Arc<dyn IdentityStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self {
            registry: RwLock::new(ConnectionRegistry::new()),
            calls: Mutex::new(CallSessionManager::new()),
            messages: MessageRelay::new(messages),
            identities,
        }
    }

    /// Build a hub whose identity and message collaborators are the same store
    pub fn with_store<S>(store: Arc<S>) -> Self
    where
        S: IdentityStore + MessageStore + 'static,
    {
        Self::new(store.clone(), store)
    }

    // ========== Connection Registry ==========

    pub async fn join(&self, user_id: &str, handle: &ConnectionHandle) {
        let seen = {
            let mut registry = self.registry.write();
            registry.join(user_id, handle.clone());
            presence::announce(&registry, user_id, PresenceStatus::Online);
            Self::stamp(&registry, user_id)
        };
        info!("[Hub] {} online on {}", user_id, handle.id());
        self.record_presence(user_id, PresenceStatus::Online, seen)
            .await;
    }

    /// Unbind `conn` from `user_id`, announce offline and end the user's calls.
    /// Returns false if `conn` had already been superseded by a later join.
    pub async fn leave(&self, user_id: &str, conn: ConnectionId) -> bool {
        let left = {
            let mut calls = self.calls.lock();
            let mut registry = self.registry.write();
            if registry.leave(user_id, conn) {
                presence::announce(&registry, user_id, PresenceStatus::Offline);
                calls.on_disconnect(&registry, user_id);
                Some(Self::stamp(&registry, user_id))
            } else {
                None
            }
        };

        match left {
            Some(seen) => {
                info!("[Hub] {} offline ({} closed)", user_id, conn);
                self.record_presence(user_id, PresenceStatus::Offline, seen)
                    .await;
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.registry.read().lookup(user_id).cloned()
    }

    pub fn presence(&self, user_id: &str) -> Option<PresenceRecord> {
        self.registry.read().presence(user_id).cloned()
    }

    pub fn stats(&self) -> HubStats {
        let calls = self.calls.lock();
        let registry = self.registry.read();
        HubStats {
            active_users: registry.connection_count(),
            active_calls: calls.len(),
        }
    }

    /// Transition time as recorded under the registry lock. Store writes carry
    /// it so a late write cannot overwrite a newer transition.
    fn stamp(registry: &ConnectionRegistry, user_id: &str) -> DateTime<Utc> {
        registry
            .presence(user_id)
            .map(|record| record.last_seen)
            .unwrap_or_else(Utc::now)
    }

    async fn record_presence(&self, user_id: &str, status: PresenceStatus, seen: DateTime<Utc>) {
        if let Err(e) = self
            .identities
            .update_presence(user_id, status, seen)
            .await
        {
            warn!(
                "[Hub] failed to record {} as {}: {:#}",
                user_id,
                status.as_str(),
                e
            );
        }
    }

    // ========== Relays ==========

    pub async fn send_message(
        &self,
        origin: &ConnectionHandle,
        sender_id: &str,
        receiver_id: &str,
        text: String,
        conversation_id: String,
    ) -> Result<ChatMessage, HubError> {
        self.messages
            .send(
                &self.registry,
                origin,
                sender_id,
                receiver_id,
                text,
                conversation_id,
            )
            .await
    }

    pub fn typing(&self, sender_id: &str, receiver_id: &str, is_typing: bool) -> bool {
        relay_typing(&self.registry.read(), sender_id, receiver_id, is_typing)
    }

    pub fn negotiate(
        &self,
        sender_id: &str,
        receiver_id: &str,
        call_id: &str,
        payload: NegotiationPayload,
    ) -> bool {
        relay_negotiation(
            &self.registry.read(),
            sender_id,
            receiver_id,
            call_id,
            payload,
        )
    }

    // ========== Calls ==========

    pub async fn initiate_call(
        &self,
        origin: &ConnectionHandle,
        caller_id: &str,
        receiver_id: &str,
        media_kind: MediaKind,
        caller_name: Option<String>,
    ) -> Result<CallId, HubError> {
        let caller_name = match caller_name.filter(|name| !name.trim().is_empty()) {
            Some(name) => name,
            None => self.display_name(caller_id).await,
        };

        let mut calls = self.calls.lock();
        let registry = self.registry.read();
        calls.initiate(
            &registry,
            origin,
            CallRequest {
                caller_id: caller_id.to_string(),
                receiver_id: receiver_id.to_string(),
                media_kind,
                caller_name,
            },
        )
    }

    pub fn accept_call(&self, call_id: &str) -> bool {
        let mut calls = self.calls.lock();
        let registry = self.registry.read();
        calls.accept(&registry, call_id)
    }

    pub fn reject_call(&self, call_id: &str) -> bool {
        let mut calls = self.calls.lock();
        let registry = self.registry.read();
        calls.reject(&registry, call_id)
    }

    pub fn end_call(&self, call_id: &str, ender: &str) -> bool {
        let mut calls = self.calls.lock();
        let registry = self.registry.read();
        calls.end(&registry, call_id, ender)
    }

    pub fn call(&self, call_id: &str) -> Option<CallSession> {
        self.calls.lock().get(call_id).cloned()
    }

    async fn display_name(&self, user_id: &str) -> String {
        match self.identities.find_user(user_id).await {
            Ok(Some(user)) => user.username,
            Ok(None) => user_id.to_string(),
            Err(e) => {
                warn!("[Hub] identity lookup for {} failed: {:#}", user_id, e);
                user_id.to_string()
            }
        }
    }
}
