//! In-memory model server.
//!
//! `SimServer` speaks the Hearth wire protocol for a single room without any
//! I/O. Frames go in through [`SimServer::receive`] and replies queue up per
//! connection until the test (or a [`crate::SimDriver`]) takes them.
//!
//! The model is the source of truth for message ids and timestamps. It
//! implements what the client relies on:
//!
//! - Handshake with token check (`UNAUTHORIZED`) and room check
//!   (`ROOM_NOT_FOUND`)
//! - `SendMessage` idempotent per `(sender, correlation)`
//! - History pages and gap-fill, echoing the request id
//! - Typing fan-out to the other participants
//!
//! Fault knobs (rejecting sends, withholding confirmations, refusing
//! connections, killing links) let tests drive the failure paths.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use hearth_proto::{
    ErrorPayload, Frame, FrameHeader, Payload,
    payloads::{
        chat::{
            HistoryPage, HistoryRequest, Receipt, ReceiptKind, SendMessage, SendRejected,
            SyncRequest, SyncResponse, TypingPush, WireBody, WireMessage,
        },
        session::{Hello, HelloReply},
    },
};

use crate::sim_env::SIM_EPOCH_MS;

/// Server-side connection identifier.
pub type ConnId = u64;

/// Spacing between server timestamps of consecutive messages.
const MESSAGE_SPACING_MS: u64 = 1_000;

/// Participant bound to a connection after a successful handshake.
#[derive(Debug, Clone)]
struct Participant {
    user_id: String,
    display_name: String,
}

#[derive(Debug, Default)]
struct ServerConnection {
    participant: Option<Participant>,
    outbox: VecDeque<Frame>,
    alive: bool,
}

/// Model chat server for one room.
#[derive(Debug)]
pub struct SimServer {
    room_id: String,
    tokens: HashSet<String>,
    messages: Vec<WireMessage>,
    next_message_id: u64,
    /// `(sender, correlation)` to server id.
    accepted: HashMap<(String, u64), u64>,
    connections: BTreeMap<ConnId, ServerConnection>,
    next_conn: ConnId,
    refuse_connections: usize,
    reject_sends: Option<(u16, String)>,
    withhold_confirmations: bool,
    send_receipts: bool,
    frames_received: usize,
}

impl SimServer {
    /// Create a server hosting `room_id` that accepts `token`.
    pub fn new(room_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            tokens: HashSet::from([token.into()]),
            messages: Vec::new(),
            next_message_id: 1,
            accepted: HashMap::new(),
            connections: BTreeMap::new(),
            next_conn: 1,
            refuse_connections: 0,
            reject_sends: None,
            withhold_confirmations: false,
            send_receipts: false,
            frames_received: 0,
        }
    }

    /// Room hosted by this server.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Accept another bearer token.
    pub fn allow_token(&mut self, token: impl Into<String>) {
        self.tokens.insert(token.into());
    }

    /// Stop accepting a token. Existing connections are unaffected.
    pub fn revoke_token(&mut self, token: &str) {
        self.tokens.remove(token);
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connections(&mut self, count: usize) {
        self.refuse_connections = count;
    }

    /// Reject every `SendMessage` with the given code until cleared.
    pub fn reject_sends(&mut self, rejection: Option<(u16, String)>) {
        self.reject_sends = rejection;
    }

    /// Store sends without pushing them back out. Models confirmations lost
    /// in transit.
    pub fn withhold_confirmations(&mut self, withhold: bool) {
        self.withhold_confirmations = withhold;
    }

    /// Emit a delivered receipt to the author after each confirmation.
    pub fn send_receipts(&mut self, enabled: bool) {
        self.send_receipts = enabled;
    }

    /// Messages in server order.
    pub fn messages(&self) -> &[WireMessage] {
        &self.messages
    }

    /// Total frames received from clients.
    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    /// Open a connection. Returns `None` if connections are being refused.
    pub fn open_connection(&mut self) -> Option<ConnId> {
        if self.refuse_connections > 0 {
            self.refuse_connections -= 1;
            tracing::debug!(remaining = self.refuse_connections, "connection refused");
            return None;
        }
        let conn = self.next_conn;
        self.next_conn += 1;
        self.connections.insert(conn, ServerConnection { alive: true, ..Default::default() });
        Some(conn)
    }

    /// Whether a connection is still open.
    pub fn is_alive(&self, conn: ConnId) -> bool {
        self.connections.get(&conn).is_some_and(|c| c.alive)
    }

    /// Drop a connection from the server side. Undelivered frames are lost.
    pub fn kill_connection(&mut self, conn: ConnId) {
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.alive = false;
            connection.participant = None;
            connection.outbox.clear();
        }
    }

    /// Drop every open connection.
    pub fn kill_all(&mut self) {
        let conns: Vec<_> = self.connections.keys().copied().collect();
        for conn in conns {
            self.kill_connection(conn);
        }
    }

    /// Client closed its side.
    pub fn close_connection(&mut self, conn: ConnId) {
        self.connections.remove(&conn);
    }

    /// Discard frames queued for a connection, as if lost in transit.
    pub fn drop_outgoing(&mut self, conn: ConnId) -> usize {
        self.connections.get_mut(&conn).map_or(0, |c| std::mem::take(&mut c.outbox).len())
    }

    /// Next frame queued for a connection.
    pub fn take_outgoing(&mut self, conn: ConnId) -> Option<Frame> {
        self.connections.get_mut(&conn).and_then(|c| c.outbox.pop_front())
    }

    /// Number of frames queued for a connection.
    pub fn pending_outgoing(&self, conn: ConnId) -> usize {
        self.connections.get(&conn).map_or(0, |c| c.outbox.len())
    }

    /// Post a message from another participant and push it to everyone
    /// connected.
    pub fn post(&mut self, sender_id: &str, sender_name: &str, text: &str) -> WireMessage {
        let created_at_ms = self.next_timestamp();
        self.post_at(sender_id, sender_name, text, created_at_ms)
    }

    /// Post with an explicit server timestamp.
    pub fn post_at(
        &mut self,
        sender_id: &str,
        sender_name: &str,
        text: &str,
        created_at_ms: u64,
    ) -> WireMessage {
        let message = self.store(sender_id, Some(sender_name), text, created_at_ms, None);
        self.broadcast(&Payload::MessagePush(message.clone()), None);
        message
    }

    /// Seed history without pushing anything.
    pub fn seed_history(&mut self, count: usize) {
        for i in 0..count {
            let created_at_ms = self.next_timestamp();
            self.store("history-bot", Some("History"), &format!("old message {i}"), created_at_ms, None);
        }
    }

    /// Push a typing change from another participant.
    pub fn push_typing(&mut self, user_id: &str, user_name: &str, active: bool) {
        let push = TypingPush { user_id: user_id.to_string(), user_name: user_name.to_string(), active };
        self.broadcast(&Payload::TypingPush(push), None);
    }

    /// Process one frame from a client.
    pub fn receive(&mut self, conn: ConnId, frame: &Frame) {
        if !self.is_alive(conn) {
            tracing::debug!(conn, "frame on dead connection dropped");
            return;
        }
        self.frames_received += 1;

        let request_id = frame.header.request_id();
        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(conn, error = %e, "malformed frame");
                let error = ErrorPayload::invalid_payload(e.to_string());
                self.reply(conn, Payload::Error(error), request_id);
                return;
            },
        };

        if let Payload::Hello(hello) = payload {
            self.on_hello(conn, hello);
            return;
        }

        let Some(participant) = self.participant(conn) else {
            tracing::debug!(conn, "frame before handshake dropped");
            return;
        };

        match payload {
            Payload::Ping => self.reply(conn, Payload::Pong, 0),
            Payload::SendMessage(send) => self.on_send(conn, &participant, send),
            Payload::HistoryRequest(request) => self.on_history(conn, &request, request_id),
            Payload::SyncRequest(request) => self.on_sync(conn, &request, request_id),
            Payload::Typing(typing) => {
                let push = TypingPush {
                    user_id: participant.user_id,
                    user_name: participant.display_name,
                    active: typing.active,
                };
                self.broadcast(&Payload::TypingPush(push), Some(conn));
            },
            Payload::Goodbye(_) => self.close_connection(conn),
            other => tracing::debug!(conn, opcode = ?other.opcode(), "unexpected server-bound frame"),
        }
    }

    fn on_hello(&mut self, conn: ConnId, hello: Hello) {
        if !self.tokens.contains(&hello.auth_token) {
            self.reply(conn, Payload::Error(ErrorPayload::unauthorized("token rejected")), 0);
            return;
        }
        if hello.room_id != self.room_id {
            let error = ErrorPayload {
                code: ErrorPayload::ROOM_NOT_FOUND,
                message: format!("no room {}", hello.room_id),
                retry_after: None,
            };
            self.reply(conn, Payload::Error(error), 0);
            return;
        }

        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.participant =
                Some(Participant { user_id: hello.user_id, display_name: hello.display_name });
        }
        let reply = HelloReply { session_id: conn, server_time_ms: self.next_timestamp() };
        self.reply(conn, Payload::HelloReply(reply), 0);
    }

    fn on_send(&mut self, conn: ConnId, participant: &Participant, send: SendMessage) {
        if let Some((code, reason)) = self.reject_sends.clone() {
            let rejected = SendRejected { correlation: send.correlation, code, reason };
            self.reply(conn, Payload::SendRejected(rejected), 0);
            return;
        }

        let key = (participant.user_id.clone(), send.correlation);
        if let Some(&id) = self.accepted.get(&key) {
            tracing::debug!(conn, id, "duplicate send confirmed again");
            if let Some(existing) = self.messages.iter().find(|m| m.id == id).cloned() {
                self.reply(conn, Payload::MessagePush(existing), 0);
            }
            return;
        }

        let WireBody::Text { text } = send.body;
        let created_at_ms = self.next_timestamp();
        let message = self.store(
            &participant.user_id,
            Some(&participant.display_name),
            &text,
            created_at_ms,
            Some(send.correlation),
        );
        self.accepted.insert(key, message.id);

        if self.withhold_confirmations {
            return;
        }
        self.broadcast(&Payload::MessagePush(message.clone()), None);
        if self.send_receipts {
            let receipt = Receipt { message_id: message.id, kind: ReceiptKind::Delivered };
            self.reply(conn, Payload::Receipt(receipt), 0);
        }
    }

    fn on_history(&mut self, conn: ConnId, request: &HistoryRequest, request_id: u32) {
        let end = match request.before {
            None => self.messages.len(),
            Some(before) => {
                if !self.messages.iter().any(|m| m.id == before) {
                    self.reply(conn, Payload::Error(ErrorPayload::invalid_cursor(before)), request_id);
                    return;
                }
                self.messages.partition_point(|m| m.id < before)
            },
        };
        let start = end.saturating_sub(request.limit as usize);
        let page = HistoryPage { messages: self.messages[start..end].to_vec(), has_more: start > 0 };
        self.reply(conn, Payload::HistoryPage(page), request_id);
    }

    fn on_sync(&mut self, conn: ConnId, request: &SyncRequest, request_id: u32) {
        let start = self.messages.partition_point(|m| m.id <= request.after);
        let end = (start + request.limit as usize).min(self.messages.len());
        let response = SyncResponse {
            messages: self.messages[start..end].to_vec(),
            complete: end == self.messages.len(),
        };
        self.reply(conn, Payload::SyncResponse(response), request_id);
    }

    fn store(
        &mut self,
        sender_id: &str,
        sender_name: Option<&str>,
        text: &str,
        created_at_ms: u64,
        correlation: Option<u64>,
    ) -> WireMessage {
        let message = WireMessage {
            id: self.next_message_id,
            room_id: self.room_id.clone(),
            sender_id: sender_id.to_string(),
            sender_name: sender_name.map(str::to_string),
            avatar_color: None,
            body: WireBody::Text { text: text.to_string() },
            created_at_ms,
            correlation,
        };
        self.next_message_id += 1;
        self.messages.push(message.clone());
        message
    }

    fn next_timestamp(&self) -> u64 {
        SIM_EPOCH_MS + self.next_message_id * MESSAGE_SPACING_MS
    }

    fn participant(&self, conn: ConnId) -> Option<Participant> {
        self.connections.get(&conn).and_then(|c| c.participant.clone())
    }

    fn reply(&mut self, conn: ConnId, payload: Payload, request_id: u32) {
        let Some(frame) = encode(payload, request_id) else {
            return;
        };
        if let Some(connection) = self.connections.get_mut(&conn) {
            connection.outbox.push_back(frame);
        }
    }

    /// Queue a payload for every handshaken connection except `skip`.
    fn broadcast(&mut self, payload: &Payload, skip: Option<ConnId>) {
        let Some(frame) = encode(payload.clone(), 0) else {
            return;
        };
        for (conn, connection) in &mut self.connections {
            if Some(*conn) == skip || !connection.alive || connection.participant.is_none() {
                continue;
            }
            connection.outbox.push_back(frame.clone());
        }
    }
}

fn encode(payload: Payload, request_id: u32) -> Option<Frame> {
    let header = FrameHeader::with_request_id(payload.opcode(), request_id);
    match payload.into_frame(header) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode server frame");
            None
        },
    }
}

/// Server shared between a test and one or more [`crate::SimDriver`]s.
pub type SharedSimServer = Arc<Mutex<SimServer>>;

/// Create a shared server.
pub fn create_shared_server(room_id: impl Into<String>, token: impl Into<String>) -> SharedSimServer {
    Arc::new(Mutex::new(SimServer::new(room_id, token)))
}

/// Lock a shared server, ignoring poisoning from a panicked test thread.
pub fn lock(server: &SharedSimServer) -> MutexGuard<'_, SimServer> {
    server.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use hearth_proto::payloads::chat::Typing;

    use super::*;

    fn hello(token: &str) -> Frame {
        Payload::Hello(Hello {
            version: 1,
            room_id: "room".into(),
            user_id: "u1".into(),
            display_name: "Ada".into(),
            auth_token: token.into(),
        })
        .to_frame()
        .unwrap()
    }

    fn take(server: &mut SimServer, conn: ConnId) -> Payload {
        Payload::from_frame(&server.take_outgoing(conn).unwrap()).unwrap()
    }

    fn connected(server: &mut SimServer) -> ConnId {
        let conn = server.open_connection().unwrap();
        server.receive(conn, &hello("secret"));
        assert!(matches!(take(server, conn), Payload::HelloReply(_)));
        conn
    }

    fn send(correlation: u64, text: &str) -> Frame {
        Payload::SendMessage(SendMessage {
            correlation,
            body: WireBody::Text { text: text.into() },
            client_time_ms: 0,
        })
        .to_frame()
        .unwrap()
    }

    #[test]
    fn wrong_token_is_unauthorized() {
        let mut server = SimServer::new("room", "secret");
        let conn = server.open_connection().unwrap();

        server.receive(conn, &hello("stale"));

        let Payload::Error(error) = take(&mut server, conn) else { panic!("expected error") };
        assert_eq!(error.code, ErrorPayload::UNAUTHORIZED);
    }

    #[test]
    fn duplicate_send_is_confirmed_not_stored_twice() {
        let mut server = SimServer::new("room", "secret");
        let conn = connected(&mut server);

        server.receive(conn, &send(7, "hi"));
        server.receive(conn, &send(7, "hi"));

        assert_eq!(server.messages().len(), 1);
        let Payload::MessagePush(first) = take(&mut server, conn) else { panic!() };
        let Payload::MessagePush(second) = take(&mut server, conn) else { panic!() };
        assert_eq!(first.id, second.id);
        assert_eq!(first.correlation, Some(7));
    }

    #[test]
    fn history_pages_newest_first_and_echoes_request_id() {
        let mut server = SimServer::new("room", "secret");
        server.seed_history(5);
        let conn = connected(&mut server);

        let request = Payload::HistoryRequest(HistoryRequest { before: None, limit: 2 })
            .into_frame(FrameHeader::with_request_id(hearth_proto::Opcode::HistoryRequest, 9))
            .unwrap();
        server.receive(conn, &request);

        let frame = server.take_outgoing(conn).unwrap();
        assert_eq!(frame.header.request_id(), 9);
        let Payload::HistoryPage(page) = Payload::from_frame(&frame).unwrap() else { panic!() };
        let ids: Vec<_> = page.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![4, 5]);
        assert!(page.has_more);
    }

    #[test]
    fn sync_returns_messages_after_cursor() {
        let mut server = SimServer::new("room", "secret");
        server.seed_history(3);
        let conn = connected(&mut server);

        let request = Payload::SyncRequest(SyncRequest { after: 1, limit: 10 }).to_frame().unwrap();
        server.receive(conn, &request);

        let Payload::SyncResponse(sync) = take(&mut server, conn) else { panic!() };
        assert_eq!(sync.messages.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
        assert!(sync.complete);
    }

    #[test]
    fn typing_is_fanned_out_to_others_only() {
        let mut server = SimServer::new("room", "secret");
        let a = connected(&mut server);
        let b = connected(&mut server);

        server.receive(a, &Payload::Typing(Typing { active: true }).to_frame().unwrap());

        assert_eq!(server.pending_outgoing(a), 0);
        let Payload::TypingPush(push) = take(&mut server, b) else { panic!() };
        assert_eq!(push.user_name, "Ada");
        assert!(push.active);
    }

    #[test]
    fn refused_connections_count_down() {
        let mut server = SimServer::new("room", "secret");
        server.refuse_connections(1);

        assert!(server.open_connection().is_none());
        assert!(server.open_connection().is_some());
    }

    #[test]
    fn killed_connection_drops_frames() {
        let mut server = SimServer::new("room", "secret");
        let conn = connected(&mut server);

        server.kill_connection(conn);
        server.receive(conn, &send(1, "lost"));

        assert!(!server.is_alive(conn));
        assert!(server.messages().is_empty());
    }
}
