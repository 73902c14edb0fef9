//! Presence Broadcaster: fans online/offline transitions out to every live
//! connection, including the one that triggered them.

use tracing::debug;

use crate::models::PresenceStatus;
use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Announce `user_id`'s new status. Returns how many connections it was queued to.
pub fn announce(registry: &ConnectionRegistry, user_id: &str, status: PresenceStatus) -> usize {
    let event = ServerEvent::PresenceUpdate {
        user_id: user_id.to_string(),
        status,
    };

    let delivered = registry
        .connections()
        .filter(|(_, handle)| handle.send(event.clone()))
        .count();

    debug!(
        "[Presence] {} is {} ({} recipients)",
        user_id,
        status.as_str(),
        delivered
    );
    delivered
}
