//! Call Session Manager
//!
//! Owns the call table and its state machine:
//!
//! ```text
//! initiate ──► RINGING ──accept──► ACTIVE
//!                 │                  │
//!                 └──reject / end / disconnect──► (removed)
//! ```
//!
//! A session is in the table exactly while it is ringing or active. Callers
//! must hold the hub's call-table lock for the whole operation, so every
//! mutation of a call id and the notifications it produces are observed as
//! one step.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::HubError;
use crate::models::{CallId, CallSession, CallStatus, MediaKind};
use crate::protocol::{EndReason, ServerEvent};
use crate::registry::{ConnectionHandle, ConnectionRegistry};

/// Parameters of `call:initiate` after the caller identity has been resolved
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub caller_id: String,
    pub receiver_id: String,
    pub media_kind: MediaKind,
    pub caller_name: String,
}

#[derive(Debug, Default)]
pub struct CallSessionManager {
    sessions: HashMap<CallId, CallSession>,
}

impl CallSessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ringing `receiver_id`.
    ///
    /// Fails without touching the table when the receiver is unreachable; the
    /// error is reported to the caller's connection only.
    pub fn initiate(
        &mut self,
        registry: &ConnectionRegistry,
        origin: &ConnectionHandle,
        request: CallRequest,
    ) -> Result<CallId, HubError> {
        let outcome = self.open_session(registry, &request);
        match &outcome {
            Ok(call_id) => {
                origin.send(ServerEvent::CallInitiated {
                    call_id: call_id.clone(),
                });
            }
            Err(err) => {
                debug!(
                    "[Calls] {} -> {} refused: {}",
                    request.caller_id, request.receiver_id, err
                );
                origin.send(ServerEvent::CallError {
                    reason: err.to_string(),
                });
            }
        }
        outcome
    }

    fn open_session(
        &mut self,
        registry: &ConnectionRegistry,
        request: &CallRequest,
    ) -> Result<CallId, HubError> {
        if request.caller_id == request.receiver_id {
            return Err(HubError::SelfCall);
        }
        let receiver = registry
            .lookup(&request.receiver_id)
            .ok_or(HubError::PeerOffline)?;

        let created_at = Utc::now();
        let call_id = self.fresh_call_id(&request.caller_id, &request.receiver_id, created_at);
        self.sessions.insert(
            call_id.clone(),
            CallSession {
                call_id: call_id.clone(),
                caller_id: request.caller_id.clone(),
                receiver_id: request.receiver_id.clone(),
                media_kind: request.media_kind,
                status: CallStatus::Ringing,
                created_at,
            },
        );

        receiver.send(ServerEvent::CallIncoming {
            call_id: call_id.clone(),
            caller_id: request.caller_id.clone(),
            caller_name: request.caller_name.clone(),
            call_type: request.media_kind,
        });

        info!(
            "[Calls] {} ringing ({:?}, {} -> {})",
            call_id, request.media_kind, request.caller_id, request.receiver_id
        );
        Ok(call_id)
    }

    fn fresh_call_id(&self, caller_id: &str, receiver_id: &str, at: DateTime<Utc>) -> CallId {
        let base = format!("{}-{}-{}", caller_id, receiver_id, at.timestamp_millis());
        if !self.sessions.contains_key(&base) {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !self.sessions.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// RINGING → ACTIVE and tell the caller. Unknown ids are ignored.
    pub fn accept(&mut self, registry: &ConnectionRegistry, call_id: &str) -> bool {
        let Some(session) = self.sessions.get_mut(call_id) else {
            debug!("[Calls] accept for unknown call {}", call_id);
            return false;
        };

        session.status = CallStatus::Active;
        registry.send_to(
            &session.caller_id,
            ServerEvent::CallAccepted {
                call_id: call_id.to_string(),
            },
        );
        info!("[Calls] {} active", call_id);
        true
    }

    /// Tell the caller and drop the session, ringing or active
    pub fn reject(&mut self, registry: &ConnectionRegistry, call_id: &str) -> bool {
        let Some(session) = self.sessions.remove(call_id) else {
            debug!("[Calls] reject for unknown call {}", call_id);
            return false;
        };

        registry.send_to(
            &session.caller_id,
            ServerEvent::CallRejected {
                call_id: call_id.to_string(),
            },
        );
        info!("[Calls] {} rejected", call_id);
        true
    }

    /// Hang up on behalf of `ender`: notify the other party and drop the session
    pub fn end(&mut self, registry: &ConnectionRegistry, call_id: &str, ender: &str) -> bool {
        let Some(session) = self.sessions.remove(call_id) else {
            debug!("[Calls] end for unknown call {}", call_id);
            return false;
        };

        registry.send_to(
            session.counterpart(ender),
            ServerEvent::CallEnded {
                call_id: call_id.to_string(),
                reason: EndReason::Hangup,
            },
        );
        info!("[Calls] {} ended by {}", call_id, ender);
        true
    }

    /// Tear down every session `user_id` takes part in and notify the other side.
    /// Returns the removed call ids.
    pub fn on_disconnect(&mut self, registry: &ConnectionRegistry, user_id: &str) -> Vec<CallId> {
        let doomed: Vec<CallId> = self
            .sessions
            .values()
            .filter(|session| session.involves(user_id))
            .map(|session| session.call_id.clone())
            .collect();

        for call_id in &doomed {
            if let Some(session) = self.sessions.remove(call_id) {
                registry.send_to(
                    session.counterpart(user_id),
                    ServerEvent::CallEnded {
                        call_id: call_id.clone(),
                        reason: EndReason::Disconnect,
                    },
                );
            }
        }

        if !doomed.is_empty() {
            info!("[Calls] {} disconnected, ended {} call(s)", user_id, doomed.len());
        }
        doomed
    }

    pub fn get(&self, call_id: &str) -> Option<&CallSession> {
        self.sessions.get(call_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
