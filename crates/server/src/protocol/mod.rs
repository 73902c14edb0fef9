//! Wire events exchanged over the WebSocket.
//!
//! Every text frame is one JSON object `{"event": "<name>", "data": {...}}`
//! with camelCase payload fields.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{CallId, ChatMessage, MediaKind, PresenceStatus, UserId};

/// Events sent by clients.
///
/// Identity fields (`senderId`, `callerId`) are accepted for compatibility but
/// never trusted; the joined identity of the connection wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "join")]
    Join { user_id: UserId },

    #[serde(rename = "message:send")]
    MessageSend {
        #[serde(default)]
        sender_id: Option<UserId>,
        receiver_id: UserId,
        text: String,
        conversation_id: String,
    },

    #[serde(rename = "typing:start")]
    TypingStart {
        #[serde(default)]
        sender_id: Option<UserId>,
        receiver_id: UserId,
    },

    #[serde(rename = "typing:stop")]
    TypingStop {
        #[serde(default)]
        sender_id: Option<UserId>,
        receiver_id: UserId,
    },

    #[serde(rename = "call:initiate")]
    CallInitiate {
        #[serde(default)]
        caller_id: Option<UserId>,
        receiver_id: UserId,
        call_type: MediaKind,
        #[serde(default)]
        caller_name: Option<String>,
    },

    #[serde(rename = "call:accept")]
    CallAccept { call_id: CallId },

    #[serde(rename = "call:reject")]
    CallReject { call_id: CallId },

    #[serde(rename = "call:end")]
    CallEnd { call_id: CallId },

    #[serde(rename = "negotiation:offer")]
    Offer {
        receiver_id: UserId,
        offer: Value,
        call_id: CallId,
    },

    #[serde(rename = "negotiation:answer")]
    Answer {
        receiver_id: UserId,
        answer: Value,
        call_id: CallId,
    },

    #[serde(rename = "negotiation:ice-candidate")]
    IceCandidate {
        receiver_id: UserId,
        candidate: Value,
        call_id: CallId,
    },
}

impl ClientEvent {
    pub fn parse(frame: &str) -> serde_json::Result<Self> {
        serde_json::from_str(frame)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join { .. } => "join",
            ClientEvent::MessageSend { .. } => "message:send",
            ClientEvent::TypingStart { .. } => "typing:start",
            ClientEvent::TypingStop { .. } => "typing:stop",
            ClientEvent::CallInitiate { .. } => "call:initiate",
            ClientEvent::CallAccept { .. } => "call:accept",
            ClientEvent::CallReject { .. } => "call:reject",
            ClientEvent::CallEnd { .. } => "call:end",
            ClientEvent::Offer { .. } => "negotiation:offer",
            ClientEvent::Answer { .. } => "negotiation:answer",
            ClientEvent::IceCandidate { .. } => "negotiation:ice-candidate",
        }
    }
}

/// Why a call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Hangup,
    Disconnect,
}

/// Events pushed to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "presence:update")]
    PresenceUpdate {
        user_id: UserId,
        status: PresenceStatus,
    },

    #[serde(rename = "message:received")]
    MessageReceived {
        message: ChatMessage,
        conversation_id: String,
    },

    #[serde(rename = "message:sent")]
    MessageSent { message: ChatMessage },

    #[serde(rename = "message:error")]
    MessageError { error: String },

    #[serde(rename = "typing:update")]
    TypingUpdate { user_id: UserId, is_typing: bool },

    #[serde(rename = "call:incoming")]
    CallIncoming {
        call_id: CallId,
        caller_id: UserId,
        caller_name: String,
        call_type: MediaKind,
    },

    #[serde(rename = "call:initiated")]
    CallInitiated { call_id: CallId },

    #[serde(rename = "call:accepted")]
    CallAccepted { call_id: CallId },

    #[serde(rename = "call:rejected")]
    CallRejected { call_id: CallId },

    #[serde(rename = "call:ended")]
    CallEnded { call_id: CallId, reason: EndReason },

    #[serde(rename = "call:error")]
    CallError { reason: String },

    #[serde(rename = "negotiation:offer")]
    Offer {
        offer: Value,
        call_id: CallId,
        sender_id: UserId,
    },

    #[serde(rename = "negotiation:answer")]
    Answer {
        answer: Value,
        call_id: CallId,
        sender_id: UserId,
    },

    #[serde(rename = "negotiation:ice-candidate")]
    IceCandidate {
        candidate: Value,
        call_id: CallId,
        sender_id: UserId,
    },

    /// Frame-level failure (bad JSON, unknown event)
    #[serde(rename = "error")]
    Error { message: String },
}

impl ServerEvent {
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
