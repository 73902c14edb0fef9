use tracing::debug;

use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;

/// Forward a typing notice if the recipient is reachable.
///
/// Nothing is stored and nothing expires server-side; receivers must time out
/// a stale "typing" state on their own.
pub fn relay_typing(
    registry: &ConnectionRegistry,
    sender_id: &str,
    receiver_id: &str,
    is_typing: bool,
) -> bool {
    let delivered = registry.send_to(
        receiver_id,
        ServerEvent::TypingUpdate {
            user_id: sender_id.to_string(),
            is_typing,
        },
    );
    if !delivered {
        debug!("[Typing] {} unreachable, dropped notice from {}", receiver_id, sender_id);
    }
    delivered
}
