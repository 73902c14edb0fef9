//! Negotiation Relay
//!
//! Session descriptions and connectivity candidates are forwarded verbatim.
//! The sender is always the identity bound to the issuing connection. If the
//! receiver is unreachable the payload is dropped: there is no buffering.

use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::ServerEvent;
use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationPayload {
    Offer(Value),
    Answer(Value),
    IceCandidate(Value),
}

impl NegotiationPayload {
    fn kind(&self) -> &'static str {
        match self {
            NegotiationPayload::Offer(_) => "offer",
            NegotiationPayload::Answer(_) => "answer",
            NegotiationPayload::IceCandidate(_) => "ice-candidate",
        }
    }

    fn into_event(self, call_id: String, sender_id: String) -> ServerEvent {
        match self {
            NegotiationPayload::Offer(offer) => ServerEvent::Offer {
                offer,
                call_id,
                sender_id,
            },
            NegotiationPayload::Answer(answer) => ServerEvent::Answer {
                answer,
                call_id,
                sender_id,
            },
            NegotiationPayload::IceCandidate(candidate) => ServerEvent::IceCandidate {
                candidate,
                call_id,
                sender_id,
            },
        }
    }
}

pub fn relay_negotiation(
    registry: &ConnectionRegistry,
    sender_id: &str,
    receiver_id: &str,
    call_id: &str,
    payload: NegotiationPayload,
) -> bool {
    let kind = payload.kind();
    let Some(receiver) = registry.lookup(receiver_id) else {
        warn!(
            "[Negotiation] {} for call {} dropped: {} unreachable",
            kind, call_id, receiver_id
        );
        return false;
    };

    debug!(
        "[Negotiation] {} {} -> {} (call {})",
        kind, sender_id, receiver_id, call_id
    );
    receiver.send(payload.into_event(call_id.to_string(), sender_id.to_string()))
}
