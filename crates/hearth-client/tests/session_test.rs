//! Session facade scenarios against a hand-driven server.
//!
//! Each test plays the server by feeding frames into the session and
//! inspecting the frames it sends back.

#![allow(clippy::unwrap_used)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use hearth_client::{
    ChatSession, ConnectionState, CorrelationId, DeliveryState, Environment, MessageId, SendError,
    SessionAction, SessionChange, SessionConfig, SessionEvent, SessionIdentity,
};
use hearth_proto::{
    ErrorPayload, Frame, FrameHeader, Payload,
    payloads::{
        chat::{
            HistoryPage, SendRejected, SyncResponse, TypingPush, WireBody, WireMessage,
        },
        session::HelloReply,
    },
};

const ROOM: &str = "group-chat";
const ME: &str = "42";

/// Environment with a clock that only moves when told to.
#[derive(Clone)]
struct ManualEnv {
    base: Instant,
    offset_ms: Arc<AtomicU64>,
}

impl ManualEnv {
    fn new() -> Self {
        Self { base: Instant::now(), offset_ms: Arc::new(AtomicU64::new(0)) }
    }

    fn advance(&self, by: Duration) {
        self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Environment for ManualEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
    }

    fn wall_clock_millis(&self) -> u64 {
        1_700_000_000_000 + self.offset_ms.load(Ordering::SeqCst)
    }

    fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
        std::future::ready(())
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = i as u8;
        }
    }
}

struct Harness {
    env: ManualEnv,
    session: ChatSession<ManualEnv>,
    next_server_id: u64,
}

impl Harness {
    fn new(enabled: bool) -> Self {
        let env = ManualEnv::new();
        let identity = SessionIdentity {
            room_id: ROOM.into(),
            user_id: ME.into(),
            display_name: "Me".into(),
        };
        let session =
            ChatSession::new(env.clone(), SessionConfig::default(), identity, "token", enabled);
        Self { env, session, next_server_id: 100 }
    }

    fn handle(&mut self, event: SessionEvent) -> Vec<SessionAction> {
        self.session.handle(event)
    }

    fn receive(&mut self, payload: Payload, request_id: u32) -> Vec<SessionAction> {
        let opcode = payload.opcode();
        let frame = payload.into_frame(FrameHeader::with_request_id(opcode, request_id)).unwrap();
        self.handle(SessionEvent::FrameReceived(frame))
    }

    fn tick(&mut self, by: Duration) -> Vec<SessionAction> {
        self.env.advance(by);
        let now = self.env.now();
        self.handle(SessionEvent::Tick { now })
    }

    /// Open, handshake, and return the actions of the HelloReply step.
    fn handshake(&mut self) -> Vec<SessionAction> {
        let actions = self.handle(SessionEvent::TransportOpened);
        assert!(matches!(sent(&actions).first(), Some((_, Payload::Hello(_)))));
        self.receive(Payload::HelloReply(HelloReply { session_id: 1, server_time_ms: 0 }), 0)
    }

    /// Full first connect including an initial history page.
    fn connect_with_history(&mut self, history: Vec<WireMessage>) -> Vec<SessionAction> {
        let actions = self.session.start();
        assert!(actions.iter().any(|a| matches!(a, SessionAction::OpenTransport { .. })));
        self.connect_with_history_after_start(history)
    }

    /// Handshake and initial history for a session already started.
    fn connect_with_history_after_start(&mut self, history: Vec<WireMessage>) -> Vec<SessionAction> {
        let actions = self.handshake();
        let request_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(_)));
        self.receive(Payload::HistoryPage(HistoryPage { messages: history, has_more: true }), request_id)
    }

    fn wire(&mut self, sender: &str, text: &str, correlation: Option<u64>) -> WireMessage {
        self.next_server_id += 1;
        WireMessage {
            id: self.next_server_id,
            room_id: ROOM.into(),
            sender_id: sender.into(),
            sender_name: Some(sender.to_uppercase()),
            avatar_color: None,
            body: WireBody::Text { text: text.into() },
            created_at_ms: self.env.wall_clock_millis() + 1,
            correlation,
        }
    }

    fn delivery(&self, token: CorrelationId) -> Option<DeliveryState> {
        self.session.messages().find(|m| m.correlation == Some(token)).map(|m| m.delivery)
    }
}

fn frames(actions: &[SessionAction]) -> Vec<&Frame> {
    actions
        .iter()
        .filter_map(|a| match a {
            SessionAction::Send(frame) => Some(frame),
            _ => None,
        })
        .collect()
}

fn sent(actions: &[SessionAction]) -> Vec<(u32, Payload)> {
    frames(actions)
        .into_iter()
        .map(|f| (f.header.request_id(), Payload::from_frame(f).unwrap()))
        .collect()
}

fn sent_messages(actions: &[SessionAction]) -> Vec<(u64, String)> {
    sent(actions)
        .into_iter()
        .filter_map(|(_, p)| match p {
            Payload::SendMessage(m) => match m.body {
                WireBody::Text { text } => Some((m.correlation, text)),
            },
            _ => None,
        })
        .collect()
}

fn request_id_of(actions: &[SessionAction], pred: impl Fn(&Payload) -> bool) -> u32 {
    sent(actions).into_iter().find(|(_, p)| pred(p)).map(|(id, _)| id).unwrap()
}

fn notified(actions: &[SessionAction], change: &SessionChange) -> bool {
    actions.iter().any(|a| a == &SessionAction::Notify(change.clone()))
}

fn echo(wire_for: &mut Harness, token: CorrelationId, text: &str) -> WireMessage {
    wire_for.wire(ME, text, Some(token.0))
}

#[test]
fn disabled_session_never_connects() {
    let mut h = Harness::new(false);
    assert!(h.session.start().is_empty());
    assert!(h.tick(Duration::from_secs(60)).is_empty());
    assert_eq!(h.session.connection_state(), ConnectionState::Disconnected);

    let actions = h.session.enable(Some("fresh".into()));
    assert!(actions.iter().any(|a| matches!(a, SessionAction::OpenTransport { .. })));
    assert_eq!(h.session.connection_state(), ConnectionState::Connecting);
}

#[test]
fn first_connect_requests_newest_history() {
    let mut h = Harness::new(true);
    h.session.start();
    let actions = h.handshake();

    assert!(notified(&actions, &SessionChange::Connection(ConnectionState::Connected)));
    let history = sent(&actions);
    assert!(matches!(
        history.as_slice(),
        [(id, Payload::HistoryRequest(req))] if *id != 0 && req.before.is_none()
    ));
}

#[test]
fn send_while_disconnected_stays_pending_then_sends_once() {
    let mut h = Harness::new(true);
    h.session.start();

    let (token, actions) = h.session.send_message("queued").unwrap();
    assert!(sent_messages(&actions).is_empty());
    assert_eq!(h.delivery(token), Some(DeliveryState::Pending));

    let actions = h.connect_with_history_after_start(Vec::new());
    assert_eq!(sent_messages(&actions), vec![(token.0, "queued".to_string())]);
    assert_eq!(h.delivery(token), Some(DeliveryState::Pending));

    let confirmed = echo(&mut h, token, "queued");
    h.receive(Payload::MessagePush(confirmed), 0);
    assert_eq!(h.delivery(token), Some(DeliveryState::Sent));
    assert_eq!(h.session.unconfirmed_count(), 0);

    // Nothing left to transmit on later ticks
    let later = h.tick(Duration::from_secs(1));
    assert!(sent_messages(&later).is_empty());
}

#[test]
fn queued_messages_flush_in_order_after_reconnect() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    // Drop the link, then compose while offline
    h.handle(SessionEvent::TransportClosed { reason: "reset".into() });
    assert_eq!(h.session.connection_state(), ConnectionState::Reconnecting);
    let (a, _) = h.session.send_message("A").unwrap();
    let (b, _) = h.session.send_message("B").unwrap();

    let actions = h.tick(Duration::from_secs(2));
    assert!(actions.iter().any(|a| matches!(a, SessionAction::OpenTransport { .. })));
    let actions = h.handshake();

    // Gap-fill first, no messages yet
    assert!(sent_messages(&actions).is_empty());
    let sync_id = request_id_of(&actions, |p| matches!(p, Payload::SyncRequest(_)));

    let actions =
        h.receive(Payload::SyncResponse(SyncResponse { messages: Vec::new(), complete: true }), sync_id);
    assert_eq!(sent_messages(&actions), vec![(a.0, "A".into()), (b.0, "B".into())]);

    for (token, text) in [(a, "A"), (b, "B")] {
        assert_eq!(h.delivery(token), Some(DeliveryState::Pending));
        let confirmed = echo(&mut h, token, text);
        h.receive(Payload::MessagePush(confirmed), 0);
        assert_eq!(h.delivery(token), Some(DeliveryState::Sent));
    }

    let texts: Vec<_> = h.session.messages().filter_map(|m| m.text().map(str::to_string)).collect();
    assert_eq!(texts, vec!["A", "B"]);
}

#[test]
fn message_accepted_before_drop_is_confirmed_by_gap_fill_not_resent() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let (token, actions) = h.session.send_message("in flight").unwrap();
    assert_eq!(sent_messages(&actions).len(), 1);

    h.handle(SessionEvent::TransportClosed { reason: "reset".into() });
    h.tick(Duration::from_secs(2));
    let actions = h.handshake();
    let sync_id = request_id_of(&actions, |p| matches!(p, Payload::SyncRequest(_)));

    let accepted = echo(&mut h, token, "in flight");
    let actions = h.receive(
        Payload::SyncResponse(SyncResponse { messages: vec![accepted], complete: true }),
        sync_id,
    );

    assert!(sent_messages(&actions).is_empty());
    assert_eq!(h.delivery(token), Some(DeliveryState::Sent));
    assert_eq!(h.session.messages().count(), 1);
}

#[test]
fn optimistic_entry_replaced_by_server_push() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let (token, _) = h.session.send_message("Hello").unwrap();
    let local = h.session.messages().next().unwrap();
    assert_eq!(local.id, MessageId::Local(token));

    let confirmed = echo(&mut h, token, "Hello");
    let server_id = confirmed.id;
    h.receive(Payload::MessagePush(confirmed), 0);

    let all: Vec<_> = h.session.messages().collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, MessageId::Server(server_id));
    assert_eq!(all[0].delivery, DeliveryState::Sent);
    assert_eq!(all[0].text(), Some("Hello"));
}

#[test]
fn dispose_during_history_fetch_ignores_late_response() {
    let mut h = Harness::new(true);
    let initial = h.wire("alice", "old", None);
    h.connect_with_history(vec![initial]);

    let actions = h.session.load_older_messages();
    let request_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(_)));
    assert!(h.session.is_loading_older());

    let actions = h.session.dispose();
    assert!(actions.iter().any(|a| matches!(a, SessionAction::CloseTransport { .. })));
    assert!(h.session.is_disposed());
    let count = h.session.messages().count();

    let older = h.wire("alice", "older", None);
    let late =
        h.receive(Payload::HistoryPage(HistoryPage { messages: vec![older], has_more: false }), request_id);

    assert!(late.is_empty());
    assert_eq!(h.session.messages().count(), count);
    assert!(h.session.has_more());
    assert!(h.session.dispose().is_empty());
    assert!(h.tick(Duration::from_secs(60)).is_empty());
    assert_eq!(h.session.send_message("after").unwrap_err(), SendError::Disposed);
}

#[test]
fn load_older_guards() {
    let mut h = Harness::new(true);
    h.session.start();

    // Before initial history
    assert!(h.session.load_older_messages().is_empty());

    let first = h.wire("alice", "one", None);
    h.connect_with_history_after_start(vec![first]);

    let actions = h.session.load_older_messages();
    let request_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(r) if r.before.is_some()));
    assert!(notified(&actions, &SessionChange::History));

    // In flight
    assert!(h.session.load_older_messages().is_empty());

    let mut older = h.wire("bob", "zero", None);
    older.created_at_ms = 1;
    h.receive(Payload::HistoryPage(HistoryPage { messages: vec![older], has_more: false }), request_id);
    assert!(!h.session.is_loading_older());
    assert!(!h.session.has_more());
    assert_eq!(h.session.messages().next().and_then(|m| m.text()), Some("zero"));

    // Exhausted
    assert!(h.session.load_older_messages().is_empty());
}

#[test]
fn first_history_page_is_requested_again_after_timeout() {
    let mut h = Harness::new(true);
    h.session.start();
    let actions = h.handshake();
    let first_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(_)));

    // No answer: the request times out and queued sends are released
    h.tick(Duration::from_secs(11));
    let live = h.wire("alice", "live", None);
    h.receive(Payload::MessagePush(live), 0);
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    assert!(!h.session.is_initial_history_loaded());
    assert!(h.session.load_older_messages().is_empty());

    let actions = h.tick(Duration::from_secs(2));
    let retry_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(r) if r.before.is_none()));
    assert_ne!(retry_id, first_id);

    // A late answer to the abandoned request is ignored
    let stale = h.wire("alice", "stale", None);
    h.receive(Payload::HistoryPage(HistoryPage { messages: vec![stale], has_more: true }), first_id);
    assert!(!h.session.is_initial_history_loaded());

    let mut older = h.wire("bob", "older", None);
    older.created_at_ms = 1;
    h.receive(Payload::HistoryPage(HistoryPage { messages: vec![older], has_more: true }), retry_id);
    assert!(h.session.is_initial_history_loaded());

    let actions = h.session.load_older_messages();
    request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(r) if r.before.is_some()));

    // Loaded: no further first-page requests
    let later = h.tick(Duration::from_secs(30));
    assert!(!sent(&later).iter().any(|(_, p)| matches!(p, Payload::HistoryRequest(r) if r.before.is_none())));
}

#[test]
fn rate_limited_first_history_page_is_retried_after_hint() {
    let mut h = Harness::new(true);
    h.session.start();
    let actions = h.handshake();
    let first_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(_)));

    let limited = ErrorPayload {
        code: ErrorPayload::RATE_LIMITED,
        message: "slow down".into(),
        retry_after: Some(5),
    };
    h.receive(Payload::Error(limited), first_id);
    assert_eq!(h.session.connection_state(), ConnectionState::Connected);
    assert!(h.session.has_more());

    // The server asked for 5s, longer than the default delay
    let early = h.tick(Duration::from_secs(3));
    assert!(!sent(&early).iter().any(|(_, p)| matches!(p, Payload::HistoryRequest(_))));

    let actions = h.tick(Duration::from_secs(2));
    let retry_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(r) if r.before.is_none()));

    let first = h.wire("alice", "one", None);
    h.receive(Payload::HistoryPage(HistoryPage { messages: vec![first], has_more: true }), retry_id);
    assert!(h.session.is_initial_history_loaded());
    assert!(!h.session.load_older_messages().is_empty());
}

#[test]
fn history_page_answering_a_sync_request_is_ignored() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    h.handle(SessionEvent::TransportClosed { reason: "reset".into() });
    let (token, _) = h.session.send_message("A").unwrap();
    h.tick(Duration::from_secs(2));
    let actions = h.handshake();
    let sync_id = request_id_of(&actions, |p| matches!(p, Payload::SyncRequest(_)));

    let stray = h.wire("alice", "stray", None);
    let actions =
        h.receive(Payload::HistoryPage(HistoryPage { messages: vec![stray], has_more: false }), sync_id);
    assert!(sent_messages(&actions).is_empty());
    assert!(h.session.has_more());
    assert_eq!(h.session.messages().count(), 1);

    // The gap-fill is still outstanding and completes normally
    let actions =
        h.receive(Payload::SyncResponse(SyncResponse { messages: Vec::new(), complete: true }), sync_id);
    assert_eq!(sent_messages(&actions), vec![(token.0, "A".to_string())]);
}

#[test]
fn invalid_cursor_clears_has_more() {
    let mut h = Harness::new(true);
    let first = h.wire("alice", "one", None);
    h.connect_with_history(vec![first]);

    let actions = h.session.load_older_messages();
    let request_id = request_id_of(&actions, |p| matches!(p, Payload::HistoryRequest(_)));
    h.receive(Payload::Error(ErrorPayload::invalid_cursor(1)), request_id);

    assert!(!h.session.has_more());
    assert!(!h.session.is_loading_older());
}

#[test]
fn rejected_message_can_be_retried_or_discarded() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let (token, _) = h.session.send_message("spam").unwrap();
    let actions = h.receive(
        Payload::SendRejected(SendRejected {
            correlation: token.0,
            code: ErrorPayload::RATE_LIMITED,
            reason: "slow down".into(),
        }),
        0,
    );
    assert_eq!(h.delivery(token), Some(DeliveryState::Failed));
    assert!(notified(&actions, &SessionChange::SendFailed { token, reason: "slow down".into() }));

    let actions = h.session.retry_message(token);
    assert_eq!(sent_messages(&actions), vec![(token.0, "spam".to_string())]);
    assert_eq!(h.delivery(token), Some(DeliveryState::Pending));

    // Discard only applies to failed messages
    assert!(h.session.discard_message(token).is_empty());
    h.receive(
        Payload::SendRejected(SendRejected { correlation: token.0, code: 4, reason: "again".into() }),
        0,
    );
    h.session.discard_message(token);
    assert_eq!(h.session.messages().count(), 0);
    assert_eq!(h.session.unconfirmed_count(), 0);
}

#[test]
fn unconfirmed_message_fails_after_ack_timeout() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let (token, _) = h.session.send_message("lost").unwrap();
    h.tick(Duration::from_secs(14));
    assert_eq!(h.delivery(token), Some(DeliveryState::Pending));

    let actions = h.tick(Duration::from_secs(1));
    assert_eq!(h.delivery(token), Some(DeliveryState::Failed));
    assert!(actions.iter().any(|a| matches!(a, SessionAction::Notify(SessionChange::SendFailed { .. }))));
}

#[test]
fn unauthorized_stops_retrying_until_new_token() {
    let mut h = Harness::new(true);
    h.session.start();
    h.handle(SessionEvent::TransportOpened);

    let actions = h.receive(Payload::Error(ErrorPayload::unauthorized("token expired")), 0);
    assert!(actions.iter().any(|a| matches!(a, SessionAction::CloseTransport { .. })));
    assert_eq!(h.session.connection_state(), ConnectionState::Unauthorized);
    assert_eq!(h.session.fatal_reason(), Some("token expired"));

    let later = h.tick(Duration::from_secs(120));
    assert!(!later.iter().any(|a| matches!(a, SessionAction::OpenTransport { .. })));

    let actions = h.session.reconnect(Some("fresh".into()));
    assert!(actions.iter().any(|a| matches!(a, SessionAction::OpenTransport { .. })));
    let actions = h.handle(SessionEvent::TransportOpened);
    let hello = sent(&actions).into_iter().find_map(|(_, p)| match p {
        Payload::Hello(hello) => Some(hello),
        _ => None,
    });
    assert_eq!(hello.unwrap().auth_token, "fresh");
}

#[test]
fn typing_signals_are_rate_limited_and_idempotent() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let mut signals = 0;
    for _ in 0..10 {
        signals += frames(&h.session.start_typing()).len();
        h.env.advance(Duration::from_millis(200));
    }
    assert_eq!(signals, 1);

    assert_eq!(sent(&h.session.stop_typing()).len(), 1);
    assert!(h.session.stop_typing().is_empty());
    assert!(h.session.focus_lost().is_empty());
}

#[test]
fn sending_a_message_stops_typing() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());
    h.session.start_typing();

    let (_, actions) = h.session.send_message("done").unwrap();
    let typing: Vec<_> = sent(&actions)
        .into_iter()
        .filter_map(|(_, p)| match p {
            Payload::Typing(t) => Some(t.active),
            _ => None,
        })
        .collect();
    assert_eq!(typing, vec![false]);
}

#[test]
fn remote_typing_expires_and_updates_label() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());

    let push = TypingPush { user_id: "7".into(), user_name: "Ada".into(), active: true };
    let actions = h.receive(Payload::TypingPush(push), 0);
    assert!(notified(&actions, &SessionChange::Typing));
    assert_eq!(h.session.typing_label().as_deref(), Some("Ada is typing…"));

    let own = TypingPush { user_id: ME.into(), user_name: "Me".into(), active: true };
    h.receive(Payload::TypingPush(own), 0);
    assert_eq!(h.session.typing_users().len(), 1);

    let actions = h.tick(Duration::from_secs(5));
    assert!(notified(&actions, &SessionChange::Typing));
    assert!(h.session.typing_users().is_empty());
    assert_eq!(h.session.typing_label(), None);
}

#[test]
fn remote_message_clears_sender_typing() {
    let mut h = Harness::new(true);
    h.connect_with_history(Vec::new());
    h.receive(Payload::TypingPush(TypingPush { user_id: "7".into(), user_name: "Ada".into(), active: true }), 0);

    let msg = h.wire("7", "hi", None);
    let actions = h.receive(Payload::MessagePush(msg), 0);
    assert!(notified(&actions, &SessionChange::Typing));
    assert!(h.session.typing_users().is_empty());
}

#[test]
fn validation_errors_are_synchronous() {
    let mut h = Harness::new(true);
    assert_eq!(h.session.send_message("   ").unwrap_err(), SendError::Empty);
    assert!(matches!(h.session.send_message(&"x".repeat(5000)), Err(SendError::TooLong { .. })));
    assert_eq!(h.session.messages().count(), 0);
}

#[test]
fn avatar_colors_assigned_per_sender() {
    let mut h = Harness::new(true);
    let a1 = h.wire("alice", "1", None);
    let b1 = h.wire("bob", "2", None);
    let a2 = h.wire("alice", "3", None);
    h.connect_with_history(vec![a1, b1, a2]);

    let colors: Vec<_> = h.session.messages().map(|m| m.avatar_color.clone().unwrap()).collect();
    assert_eq!(colors[0], colors[2]);
    assert_ne!(colors[0], colors[1]);
}
