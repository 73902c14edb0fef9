//! Pass-through relays between live connections.
//!
//! None of these treat an unreachable recipient as an error.

pub mod messages;
pub mod negotiation;
pub mod typing;

pub use messages::MessageRelay;
pub use negotiation::{relay_negotiation, NegotiationPayload};
pub use typing::relay_typing;
