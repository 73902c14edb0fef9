use parley_server::hub::{Hub, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_server::models::{MediaKind, PresenceStatus, UserRecord};
use parley_server::protocol::{ClientEvent, EndReason, ServerEvent};
use parley_server::store::{IdentityStore, MemoryStore, MessageStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Peer {
    session: Session,
    rx: UnboundedReceiver<ServerEvent>,
}

impl Peer {
    fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

fn setup() -> (Arc<Hub>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Arc::new(Hub::with_store(store.clone())), store)
}

async fn join(hub: &Arc<Hub>, user_id: &str) -> Peer {
    let (mut session, rx) = Session::new(hub.clone());
    session
        .dispatch(ClientEvent::Join {
            user_id: user_id.to_string(),
        })
        .await;
    Peer { session, rx }
}

async fn initiate(caller: &mut Peer, receiver_id: &str) -> String {
    caller
        .session
        .dispatch(ClientEvent::CallInitiate {
            caller_id: None,
            receiver_id: receiver_id.to_string(),
            call_type: MediaKind::Video,
            caller_name: None,
        })
        .await;
    caller
        .drain()
        .into_iter()
        .find_map(|event| match event {
            ServerEvent::CallInitiated { call_id } => Some(call_id),
            _ => None,
        })
        .expect("caller should be told the call id")
}

fn offline(user_id: &str) -> ServerEvent {
    ServerEvent::PresenceUpdate {
        user_id: user_id.to_string(),
        status: PresenceStatus::Offline,
    }
}

#[tokio::test]
async fn test_join_lookup_and_leave() {
    let (hub, store) = setup();
    store.insert_user("alice", "Alice").await;

    let alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    assert!(hub.lookup("alice").is_some());
    assert!(hub.lookup("bob").is_some());
    assert_eq!(hub.stats().active_users, 2);
    bob.drain();

    alice.session.close().await;

    assert!(hub.lookup("alice").is_none());
    assert_eq!(bob.drain(), vec![offline("alice")]);

    let record = hub.presence("alice").unwrap();
    assert_eq!(record.status, PresenceStatus::Offline);
    assert!(record.connection.is_none());

    let user = store.find_user("alice").await.unwrap().unwrap();
    assert_eq!(user.status, PresenceStatus::Offline);
    assert!(user.last_seen.is_some());
}

#[tokio::test]
async fn test_join_is_announced_to_everyone() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    alice.drain();

    let mut bob = join(&hub, "bob").await;
    let online = ServerEvent::PresenceUpdate {
        user_id: "bob".into(),
        status: PresenceStatus::Online,
    };
    assert_eq!(alice.drain(), vec![online.clone()]);
    assert_eq!(bob.drain(), vec![online]);
}

#[tokio::test]
async fn test_call_accept_and_reject() {
    let (hub, store) = setup();
    store.insert_user("alice", "Alice").await;
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    alice.drain();
    bob.drain();

    let call_id = initiate(&mut alice, "bob").await;
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::CallIncoming {
            call_id: call_id.clone(),
            caller_id: "alice".into(),
            caller_name: "Alice".into(),
            call_type: MediaKind::Video,
        }]
    );

    bob.session
        .dispatch(ClientEvent::CallAccept {
            call_id: call_id.clone(),
        })
        .await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallAccepted {
            call_id: call_id.clone()
        }]
    );

    // a second call, rejected this time
    let second = initiate(&mut alice, "bob").await;
    bob.drain();
    bob.session
        .dispatch(ClientEvent::CallReject {
            call_id: second.clone(),
        })
        .await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallRejected {
            call_id: second.clone()
        }]
    );
    assert!(hub.call(&second).is_none());

    // ending a rejected call does nothing
    alice
        .session
        .dispatch(ClientEvent::CallEnd { call_id: second })
        .await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_reject_after_accept() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    let call_id = initiate(&mut alice, "bob").await;
    bob.session
        .dispatch(ClientEvent::CallAccept {
            call_id: call_id.clone(),
        })
        .await;
    alice.drain();
    bob.drain();

    bob.session
        .dispatch(ClientEvent::CallReject {
            call_id: call_id.clone(),
        })
        .await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallRejected {
            call_id: call_id.clone()
        }]
    );
    assert!(hub.call(&call_id).is_none());
    assert_eq!(hub.stats().active_calls, 0);

    alice
        .session
        .dispatch(ClientEvent::CallEnd { call_id })
        .await;
    assert!(alice.drain().is_empty());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_call_to_offline_peer() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut carol = join(&hub, "carol").await;
    alice.drain();
    carol.drain();

    alice
        .session
        .dispatch(ClientEvent::CallInitiate {
            caller_id: Some("alice".into()),
            receiver_id: "bob".into(),
            call_type: MediaKind::Audio,
            caller_name: Some("Alice".into()),
        })
        .await;

    assert_eq!(
        alice.drain(),
        vec![ServerEvent::CallError {
            reason: "User is offline".into()
        }]
    );
    assert!(carol.drain().is_empty());
    assert_eq!(hub.stats().active_calls, 0);
}

#[tokio::test]
async fn test_disconnect_ends_active_call() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;

    let call_id = initiate(&mut alice, "bob").await;
    bob.session
        .dispatch(ClientEvent::CallAccept {
            call_id: call_id.clone(),
        })
        .await;
    bob.drain();

    alice.session.close().await;

    assert_eq!(
        bob.drain(),
        vec![
            offline("alice"),
            ServerEvent::CallEnded {
                call_id: call_id.clone(),
                reason: EndReason::Disconnect,
            },
        ]
    );
    assert!(hub.call(&call_id).is_none());

    bob.session
        .dispatch(ClientEvent::CallEnd { call_id })
        .await;
    assert!(bob.drain().is_empty());
    assert_eq!(hub.stats().active_calls, 0);
}

#[tokio::test]
async fn test_end_notifies_the_other_side() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    let call_id = initiate(&mut alice, "bob").await;
    bob.drain();

    // caller cancels while still ringing
    alice
        .session
        .dispatch(ClientEvent::CallEnd {
            call_id: call_id.clone(),
        })
        .await;
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::CallEnded {
            call_id,
            reason: EndReason::Hangup
        }]
    );
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn test_message_delivery_and_persistence() {
    let (hub, store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    alice.drain();
    bob.drain();

    alice
        .session
        .dispatch(ClientEvent::MessageSend {
            sender_id: Some("alice".into()),
            receiver_id: "bob".into(),
            text: "hi".into(),
            conversation_id: "conv1".into(),
        })
        .await;

    let received = bob.drain();
    let message = match received.as_slice() {
        [ServerEvent::MessageReceived {
            message,
            conversation_id,
        }] => {
            assert_eq!(conversation_id, "conv1");
            message.clone()
        }
        other => panic!("unexpected events for bob: {:?}", other),
    };
    assert_eq!(message.text, "hi");
    assert_eq!(message.sender_id, "alice");
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::MessageSent {
            message: message.clone()
        }]
    );

    let stored = store.conversation_messages("conv1").await.unwrap();
    assert_eq!(stored, vec![message]);
}

#[tokio::test]
async fn test_message_to_offline_receiver_is_stored() {
    let (hub, store) = setup();
    let mut alice = join(&hub, "alice").await;
    alice.drain();

    alice
        .session
        .dispatch(ClientEvent::MessageSend {
            sender_id: None,
            receiver_id: "bob".into(),
            text: "are you there?".into(),
            conversation_id: "conv1".into(),
        })
        .await;

    assert!(matches!(
        alice.drain().as_slice(),
        [ServerEvent::MessageSent { .. }]
    ));
    assert_eq!(store.conversation_messages("conv1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_store_failure_keeps_connection_alive() {
    let (hub, store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    alice.drain();
    bob.drain();
    store.fail_message_writes(true);

    alice
        .session
        .dispatch(ClientEvent::MessageSend {
            sender_id: None,
            receiver_id: "bob".into(),
            text: "hi".into(),
            conversation_id: "conv1".into(),
        })
        .await;
    assert_eq!(
        alice.drain(),
        vec![ServerEvent::MessageError {
            error: "Failed to send message".into()
        }]
    );
    assert!(bob.drain().is_empty());

    // the connection keeps working
    alice
        .session
        .dispatch(ClientEvent::TypingStart {
            sender_id: None,
            receiver_id: "bob".into(),
        })
        .await;
    assert_eq!(
        bob.drain(),
        vec![ServerEvent::TypingUpdate {
            user_id: "alice".into(),
            is_typing: true
        }]
    );
}

#[tokio::test]
async fn test_negotiation_sender_comes_from_connection() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    alice.drain();
    bob.drain();

    let frame = json!({
        "event": "negotiation:offer",
        "data": {
            "receiverId": "bob",
            "offer": {"type": "offer", "sdp": "v=0"},
            "callId": "c1",
            "senderId": "mallory"
        }
    })
    .to_string();
    alice.session.handle_frame(&frame).await;

    assert_eq!(
        bob.drain(),
        vec![ServerEvent::Offer {
            offer: json!({"type": "offer", "sdp": "v=0"}),
            call_id: "c1".into(),
            sender_id: "alice".into(),
        }]
    );
}

#[tokio::test]
async fn test_events_before_join() {
    let (hub, _store) = setup();
    let mut bob = join(&hub, "bob").await;
    bob.drain();

    let (mut anon, mut rx) = Session::new(hub.clone());
    anon.dispatch(ClientEvent::MessageSend {
        sender_id: Some("alice".into()),
        receiver_id: "bob".into(),
        text: "spoof".into(),
        conversation_id: "conv1".into(),
    })
    .await;
    anon.dispatch(ClientEvent::CallInitiate {
        caller_id: Some("alice".into()),
        receiver_id: "bob".into(),
        call_type: MediaKind::Audio,
        caller_name: None,
    })
    .await;
    anon.dispatch(ClientEvent::TypingStart {
        sender_id: Some("alice".into()),
        receiver_id: "bob".into(),
    })
    .await;

    assert_eq!(
        rx.try_recv().unwrap(),
        ServerEvent::MessageError {
            error: "not joined".into()
        }
    );
    assert_eq!(
        rx.try_recv().unwrap(),
        ServerEvent::CallError {
            reason: "not joined".into()
        }
    );
    assert!(rx.try_recv().is_err());
    assert!(bob.drain().is_empty());
}

#[tokio::test]
async fn test_malformed_frame_is_answered() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    alice.drain();

    alice.session.handle_frame("{not json").await;
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerEvent::Error { .. }]
    ));
    assert!(hub.lookup("alice").is_some());
}

#[tokio::test]
async fn test_last_join_wins() {
    let (hub, _store) = setup();
    let mut first = join(&hub, "alice").await;
    let mut second = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    first.drain();
    second.drain();
    bob.drain();

    bob.session
        .dispatch(ClientEvent::TypingStart {
            sender_id: None,
            receiver_id: "alice".into(),
        })
        .await;
    assert!(first.drain().is_empty());
    assert_eq!(second.drain().len(), 1);

    // the orphaned connection closing does not take alice offline
    first.session.close().await;
    assert!(hub.lookup("alice").is_some());
    assert_eq!(
        hub.presence("alice").unwrap().status,
        PresenceStatus::Online
    );
    assert!(bob.drain().is_empty());
}

/// Identity store whose offline writes land late
struct LateOfflineStore {
    inner: MemoryStore,
    delay: Duration,
}

#[async_trait]
impl IdentityStore for LateOfflineStore {
    async fn find_user(&self, user_id: &str) -> anyhow::Result<Option<UserRecord>> {
        self.inner.find_user(user_id).await
    }

    async fn update_presence(
        &self,
        user_id: &str,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if status == PresenceStatus::Offline {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update_presence(user_id, status, last_seen).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_offline_write_does_not_override_rejoin() {
    let identities = Arc::new(LateOfflineStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(100),
    });
    identities.inner.insert_user("alice", "Alice").await;
    let hub = Arc::new(Hub::new(identities.clone(), Arc::new(MemoryStore::new())));

    let first = join(&hub, "alice").await;
    let closing = tokio::spawn(async move { first.session.close().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    let _second = join(&hub, "alice").await;
    closing.await.unwrap();

    assert_eq!(hub.presence("alice").unwrap().status, PresenceStatus::Online);
    let user = identities.find_user("alice").await.unwrap().unwrap();
    assert_eq!(user.status, PresenceStatus::Online);
}

#[tokio::test]
async fn test_rejoin_as_other_identity_leaves_previous() {
    let (hub, _store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    let call_id = initiate(&mut alice, "bob").await;
    bob.drain();

    alice
        .session
        .dispatch(ClientEvent::Join {
            user_id: "alice-work".into(),
        })
        .await;

    assert!(hub.lookup("alice").is_none());
    assert!(hub.lookup("alice-work").is_some());
    assert!(hub.call(&call_id).is_none());
    let events = bob.drain();
    assert!(events.contains(&offline("alice")));
    assert!(events.contains(&ServerEvent::CallEnded {
        call_id,
        reason: EndReason::Disconnect
    }));
}

#[tokio::test]
async fn test_slow_store_does_not_stall_others() {
    let (hub, store) = setup();
    let mut alice = join(&hub, "alice").await;
    let mut bob = join(&hub, "bob").await;
    let mut carol = join(&hub, "carol").await;
    alice.drain();
    bob.drain();
    carol.drain();

    store.set_write_delay(Some(Duration::from_millis(300)));
    let pending = tokio::spawn(async move {
        alice
            .session
            .dispatch(ClientEvent::MessageSend {
                sender_id: None,
                receiver_id: "bob".into(),
                text: "slow".into(),
                conversation_id: "conv1".into(),
            })
            .await;
        alice
    });
    tokio::task::yield_now().await;

    let call_id = initiate(&mut carol, "bob").await;
    assert!(!pending.is_finished());
    assert!(bob
        .drain()
        .contains(&ServerEvent::CallIncoming {
            call_id,
            caller_id: "carol".into(),
            caller_name: "carol".into(),
            call_type: MediaKind::Video,
        }));

    let mut alice = pending.await.unwrap();
    assert!(matches!(
        alice.drain().as_slice(),
        [ServerEvent::MessageSent { .. }]
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_accept_and_end_have_one_outcome() {
    for _ in 0..100 {
        let (hub, _store) = setup();
        let mut alice = join(&hub, "alice").await;
        let mut bob = join(&hub, "bob").await;
        let call_id = initiate(&mut alice, "bob").await;
        bob.drain();

        let accept_id = call_id.clone();
        let accepter = tokio::spawn(async move {
            bob.session
                .dispatch(ClientEvent::CallAccept { call_id: accept_id })
                .await;
            bob
        });
        let end_id = call_id.clone();
        let ender = tokio::spawn(async move {
            alice
                .session
                .dispatch(ClientEvent::CallEnd { call_id: end_id })
                .await;
            alice
        });

        let mut bob = accepter.await.unwrap();
        let mut alice = ender.await.unwrap();

        // either accepted-then-ended or end pre-empted accept
        let alice_events = alice.drain();
        assert!(
            alice_events.is_empty()
                || alice_events
                    == vec![ServerEvent::CallAccepted {
                        call_id: call_id.clone()
                    }],
            "unexpected caller events {:?}",
            alice_events
        );
        assert_eq!(
            bob.drain(),
            vec![ServerEvent::CallEnded {
                call_id: call_id.clone(),
                reason: EndReason::Hangup
            }]
        );
        assert!(hub.call(&call_id).is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_end_from_both_sides() {
    for _ in 0..100 {
        let (hub, _store) = setup();
        let mut alice = join(&hub, "alice").await;
        let mut bob = join(&hub, "bob").await;
        let call_id = initiate(&mut alice, "bob").await;
        bob.drain();

        let id = call_id.clone();
        let a = tokio::spawn(async move {
            alice.session.dispatch(ClientEvent::CallEnd { call_id: id }).await;
            alice
        });
        let id = call_id.clone();
        let b = tokio::spawn(async move {
            bob.session.dispatch(ClientEvent::CallEnd { call_id: id }).await;
            bob
        });

        let mut alice = a.await.unwrap();
        let mut bob = b.await.unwrap();
        let total = alice.drain().len() + bob.drain().len();
        assert_eq!(total, 1, "exactly one side hears the hangup");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_disconnect_racing_accept() {
    for _ in 0..100 {
        let (hub, _store) = setup();
        let mut alice = join(&hub, "alice").await;
        let mut bob = join(&hub, "bob").await;
        let call_id = initiate(&mut alice, "bob").await;
        bob.drain();

        let id = call_id.clone();
        let accepter = tokio::spawn(async move {
            bob.session.dispatch(ClientEvent::CallAccept { call_id: id }).await;
            bob
        });
        let leaver = tokio::spawn(async move { alice.session.close().await });

        let mut bob = accepter.await.unwrap();
        leaver.await.unwrap();

        let ended: Vec<_> = bob
            .drain()
            .into_iter()
            .filter(|event| matches!(event, ServerEvent::CallEnded { .. }))
            .collect();
        assert_eq!(
            ended,
            vec![ServerEvent::CallEnded {
                call_id: call_id.clone(),
                reason: EndReason::Disconnect
            }]
        );
        assert_eq!(hub.stats().active_calls, 0);
        assert!(hub.lookup("alice").is_none());
    }
}
