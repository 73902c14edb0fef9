//! Connection Registry
//!
//! Maps each identity to its single live connection and keeps the presence
//! record for every identity seen since startup. The registry itself is not
//! synchronised; [`crate::hub::Hub`] owns it behind a lock.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::models::{ConnectionId, PresenceRecord, PresenceStatus, UserId};
use crate::protocol::ServerEvent;

/// Outbound half of one live connection
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver that the connection's writer drains
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::new(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for delivery. Returns false if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    live: HashMap<UserId, ConnectionHandle>,
    presence: HashMap<UserId, PresenceRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `user_id` to `handle` and mark it online.
    ///
    /// Last join wins: a previous connection for the same identity is dropped
    /// from the map without being notified and is returned to the caller.
    pub fn join(&mut self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn = handle.id();
        let evicted = self.live.insert(user_id.to_string(), handle);
        self.presence.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                status: PresenceStatus::Online,
                last_seen: Utc::now(),
                connection: Some(conn),
            },
        );

        match &evicted {
            Some(old) if old.id() != conn => {
                info!("[Registry] {} rejoined on {} (orphaning {})", user_id, conn, old.id());
            }
            _ => debug!("[Registry] {} joined on {}", user_id, conn),
        }
        evicted.filter(|old| old.id() != conn)
    }

    /// Unbind `user_id` if `conn` is still its live connection.
    ///
    /// Returns false when the identity is bound to a newer connection (or none),
    /// in which case nothing changes.
    pub fn leave(&mut self, user_id: &str, conn: ConnectionId) -> bool {
        let owns = self
            .live
            .get(user_id)
            .map(|handle| handle.id() == conn)
            .unwrap_or(false);
        if !owns {
            debug!("[Registry] ignoring leave of {} from stale {}", user_id, conn);
            return false;
        }

        self.live.remove(user_id);
        if let Some(record) = self.presence.get_mut(user_id) {
            record.status = PresenceStatus::Offline;
            record.last_seen = Utc::now();
            record.connection = None;
        }
        true
    }

    /// Live connection for `user_id`; `None` means currently unreachable
    pub fn lookup(&self, user_id: &str) -> Option<&ConnectionHandle> {
        self.live.get(user_id)
    }

    /// Deliver to `user_id` if reachable. Returns whether it was queued.
    pub fn send_to(&self, user_id: &str, event: ServerEvent) -> bool {
        match self.lookup(user_id) {
            Some(handle) => handle.send(event),
            None => false,
        }
    }

    pub fn presence(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.presence.get(user_id)
    }

    pub fn connections(&self) -> impl Iterator<Item = (&UserId, &ConnectionHandle)> {
        self.live.iter()
    }

    pub fn connection_count(&self) -> usize {
        self.live.len()
    }
}
