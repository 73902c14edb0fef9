use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use super::Hub;
use crate::error::HubError;
use crate::models::UserId;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::ConnectionHandle;
use crate::relay::NegotiationPayload;

/// Per-connection dispatcher.
///
/// Owns the connection's identity once it has joined. Events are handled one
/// at a time in arrival order; the caller drives it from the connection's
/// reader loop.
pub struct Session {
    hub: Arc<Hub>,
    handle: ConnectionHandle,
    user_id: Option<UserId>,
}

impl Session {
    pub fn new(hub: Arc<Hub>) -> (Self, UnboundedReceiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::new();
        (
            Self {
                hub,
                handle,
                user_id: None,
            },
            rx,
        )
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Parse and dispatch one text frame. Bad frames are answered, not fatal.
    pub async fn handle_frame(&mut self, frame: &str) {
        match ClientEvent::parse(frame) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => {
                warn!("[Session {}] invalid frame: {}", self.handle.id(), e);
                self.handle.send(ServerEvent::Error {
                    message: format!("invalid event: {}", e),
                });
            }
        }
    }

    pub async fn dispatch(&mut self, event: ClientEvent) {
        debug!("[Session {}] {}", self.handle.id(), event.name());

        match event {
            ClientEvent::Join { user_id } => self.join(user_id).await,

            ClientEvent::MessageSend {
                sender_id,
                receiver_id,
                text,
                conversation_id,
            } => {
                let Some(sender) = self.identity(sender_id.as_deref()) else {
                    self.handle.send(ServerEvent::MessageError {
                        error: HubError::NotJoined.to_string(),
                    });
                    return;
                };
                // errors were already reported to this connection
                let _ = self
                    .hub
                    .send_message(&self.handle, &sender, &receiver_id, text, conversation_id)
                    .await;
            }

            ClientEvent::TypingStart {
                sender_id,
                receiver_id,
            } => self.typing(sender_id, &receiver_id, true),

            ClientEvent::TypingStop {
                sender_id,
                receiver_id,
            } => self.typing(sender_id, &receiver_id, false),

            ClientEvent::CallInitiate {
                caller_id,
                receiver_id,
                call_type,
                caller_name,
            } => {
                let Some(caller) = self.call_identity(caller_id.as_deref()) else {
                    return;
                };
                let _ = self
                    .hub
                    .initiate_call(&self.handle, &caller, &receiver_id, call_type, caller_name)
                    .await;
            }

            ClientEvent::CallAccept { call_id } => {
                if self.call_identity(None).is_some() {
                    self.hub.accept_call(&call_id);
                }
            }

            ClientEvent::CallReject { call_id } => {
                if self.call_identity(None).is_some() {
                    self.hub.reject_call(&call_id);
                }
            }

            ClientEvent::CallEnd { call_id } => {
                if let Some(ender) = self.call_identity(None) {
                    self.hub.end_call(&call_id, &ender);
                }
            }

            ClientEvent::Offer {
                receiver_id,
                offer,
                call_id,
            } => self.negotiate(&receiver_id, &call_id, NegotiationPayload::Offer(offer)),

            ClientEvent::Answer {
                receiver_id,
                answer,
                call_id,
            } => self.negotiate(&receiver_id, &call_id, NegotiationPayload::Answer(answer)),

            ClientEvent::IceCandidate {
                receiver_id,
                candidate,
                call_id,
            } => self.negotiate(
                &receiver_id,
                &call_id,
                NegotiationPayload::IceCandidate(candidate),
            ),
        }
    }

    /// Connection closed: release the identity and cascade its calls
    pub async fn close(mut self) {
        if let Some(user_id) = self.user_id.take() {
            self.hub.leave(&user_id, self.handle.id()).await;
        } else {
            debug!("[Session {}] closed before join", self.handle.id());
        }
    }

    async fn join(&mut self, user_id: UserId) {
        let user_id = user_id.trim().to_string();
        if user_id.is_empty() {
            self.handle.send(ServerEvent::Error {
                message: "userId must not be empty".to_string(),
            });
            return;
        }

        if let Some(previous) = self.user_id.take() {
            if previous != user_id {
                info!(
                    "[Session {}] switching identity {} -> {}",
                    self.handle.id(),
                    previous,
                    user_id
                );
                self.hub.leave(&previous, self.handle.id()).await;
            }
        }

        self.hub.join(&user_id, &self.handle).await;
        self.user_id = Some(user_id);
    }

    /// The joined identity. A different identity claimed in the payload is
    /// logged and ignored.
    fn identity(&self, claimed: Option<&str>) -> Option<UserId> {
        let user_id = self.user_id.clone()?;
        if let Some(claimed) = claimed {
            if claimed != user_id {
                warn!(
                    "[Session {}] payload claims to be {} but connection is {}; using {}",
                    self.handle.id(),
                    claimed,
                    user_id,
                    user_id
                );
            }
        }
        Some(user_id)
    }

    fn call_identity(&self, claimed: Option<&str>) -> Option<UserId> {
        let identity = self.identity(claimed);
        if identity.is_none() {
            self.handle.send(ServerEvent::CallError {
                reason: HubError::NotJoined.to_string(),
            });
        }
        identity
    }

    fn typing(&self, claimed: Option<UserId>, receiver_id: &str, is_typing: bool) {
        match self.identity(claimed.as_deref()) {
            Some(sender) => {
                self.hub.typing(&sender, receiver_id, is_typing);
            }
            None => debug!("[Session {}] typing before join dropped", self.handle.id()),
        }
    }

    fn negotiate(&self, receiver_id: &str, call_id: &str, payload: NegotiationPayload) {
        match self.identity(None) {
            Some(sender) => {
                self.hub.negotiate(&sender, receiver_id, call_id, payload);
            }
            None => debug!("[Session {}] negotiation before join dropped", self.handle.id()),
        }
    }
}
