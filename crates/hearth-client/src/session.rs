//! Chat session facade.
//!
//! [`ChatSession`] is the single entry point a UI talks to. It owns the
//! connection state machine, the message store, the outbound queue and the
//! typing tracker for one room, and routes transport events between them.
//!
//! # Synchronization
//!
//! Every successful (re)connect is followed by a synchronization round
//! before queued messages are flushed:
//!
//! - First connect: request the newest history page.
//! - Later reconnects: request everything newer than the newest known server
//!   id (gap-fill).
//!
//! Messages the server accepted just before the link dropped come back in
//! that response and are confirmed instead of re-sent. The flush happens
//! when the response arrives or when it times out.
//!
//! # Disposal
//!
//! After [`ChatSession::dispose`] every operation and event returns no
//! actions and leaves state untouched. Responses to requests issued before
//! disposal are dropped.

use std::time::Duration;

use hearth_core::{
    connection::{
        ConnectTarget, ConnectionAction, ConnectionConfig, ConnectionManager, ConnectionState,
        Credentials,
    },
    env::Environment,
};
use hearth_proto::{
    ErrorPayload, Frame, FrameHeader, Opcode, Payload,
    payloads::chat::{
        HistoryPage, HistoryRequest, Receipt, SendMessage, SendRejected, SyncRequest,
        SyncResponse, Typing, TypingPush, WireMessage,
    },
};

use crate::{
    error::SendError,
    event::{SessionAction, SessionChange, SessionEvent},
    message::{ChatMessage, CorrelationId, DeliveryState, MessageId},
    outbound::{OutboundConfig, OutboundQueue},
    palette::AvatarPalette,
    store::MessageStore,
    typing::{TypingConfig, TypingSignal, TypingTracker, TypingUser},
};

/// Messages requested per history page.
pub const DEFAULT_HISTORY_PAGE: u32 = 50;

/// Messages requested per gap-fill round.
pub const DEFAULT_SYNC_LIMIT: u32 = 200;

/// Time to wait for a history or gap-fill response.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before re-requesting the first history page after it failed.
pub const DEFAULT_HISTORY_RETRY: Duration = Duration::from_secs(2);

/// Endpoint used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:4433";

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server endpoint
    pub endpoint: String,
    /// Connection lifecycle timings
    pub connection: ConnectionConfig,
    /// Outbound validation and ack timeout
    pub outbound: OutboundConfig,
    /// Typing rate limit and expiry
    pub typing: TypingConfig,
    /// History page size
    pub history_page: u32,
    /// Gap-fill page size
    pub sync_limit: u32,
    /// History and gap-fill response timeout
    pub sync_timeout: Duration,
    /// Delay before the first history page is requested again after a
    /// timeout or a transient error
    pub history_retry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connection: ConnectionConfig::default(),
            outbound: OutboundConfig::default(),
            typing: TypingConfig::default(),
            history_page: DEFAULT_HISTORY_PAGE,
            sync_limit: DEFAULT_SYNC_LIMIT,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
            history_retry: DEFAULT_HISTORY_RETRY,
        }
    }
}

/// Who the session speaks as, and in which room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Room to join.
    pub room_id: String,
    /// Stable user identifier.
    pub user_id: String,
    /// Display name.
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    InitialHistory,
    OlderHistory,
    Sync,
}

#[derive(Debug, Clone, Copy)]
struct Request<I> {
    id: u32,
    kind: RequestKind,
    sent_at: I,
}

/// Chat session for one room.
pub struct ChatSession<E: Environment> {
    env: E,
    config: SessionConfig,
    identity: SessionIdentity,
    auth_token: String,
    enabled: bool,
    disposed: bool,

    connection: ConnectionManager<E>,
    store: MessageStore,
    outbound: OutboundQueue<E::Instant>,
    typing: TypingTracker<E::Instant>,
    palette: AvatarPalette,

    /// Outstanding history and gap-fill requests.
    requests: Vec<Request<E::Instant>>,
    next_request_id: u32,
    initial_loaded: bool,
    /// When to ask for the first history page again.
    initial_retry_at: Option<E::Instant>,
    has_more: bool,
    /// Set once the post-connect synchronization round has finished.
    synchronized: bool,
}

impl<E: Environment> ChatSession<E> {
    /// Create a session. Nothing happens until [`start`](Self::start).
    ///
    /// A session created with `enabled = false` stays
    /// [`ConnectionState::Disconnected`] until [`enable`](Self::enable).
    pub fn new(
        env: E,
        config: SessionConfig,
        identity: SessionIdentity,
        auth_token: impl Into<String>,
        enabled: bool,
    ) -> Self {
        let first_token = env.random_u64();
        Self {
            connection: ConnectionManager::new(env.clone(), config.connection.clone()),
            outbound: OutboundQueue::new(config.outbound, first_token),
            typing: TypingTracker::new(config.typing, identity.user_id.clone()),
            store: MessageStore::new(),
            palette: AvatarPalette::new(),
            env,
            config,
            identity,
            auth_token: auth_token.into(),
            enabled,
            disposed: false,
            requests: Vec::new(),
            next_request_id: 1,
            initial_loaded: false,
            initial_retry_at: None,
            has_more: true,
            synchronized: false,
        }
    }

    /// Begin connecting, if enabled.
    pub fn start(&mut self) -> Vec<SessionAction> {
        if self.disposed || !self.enabled {
            return Vec::new();
        }
        let target = self.target();
        let now = self.env.now();
        let actions = self.connection.connect(target, now);
        self.apply_connection(actions)
    }

    /// Enable a session created disabled, optionally with a token, and
    /// begin connecting.
    pub fn enable(&mut self, auth_token: Option<String>) -> Vec<SessionAction> {
        if self.disposed {
            return Vec::new();
        }
        if let Some(token) = auth_token {
            self.auth_token = token;
        }
        self.enabled = true;
        self.start()
    }

    /// Whether the session has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether the session is allowed to connect.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Identity this session speaks as.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Messages in timeline order.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.store.iter()
    }

    /// Message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Server's reason for rejecting the credentials, if unauthorized.
    pub fn fatal_reason(&self) -> Option<&str> {
        self.connection.fatal_reason()
    }

    /// Remote typists active now.
    pub fn typing_users(&self) -> Vec<&TypingUser<E::Instant>> {
        self.typing.typing_users(self.env.now())
    }

    /// Typing summary, e.g. `"Ada is typing…"`.
    pub fn typing_label(&self) -> Option<String> {
        self.typing.label(self.env.now())
    }

    /// Whether older history may exist beyond what is loaded.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Whether an older-history page is being fetched.
    pub fn is_loading_older(&self) -> bool {
        self.pending(RequestKind::OlderHistory).is_some()
    }

    /// Whether the first history page has arrived.
    pub fn is_initial_history_loaded(&self) -> bool {
        self.initial_loaded
    }

    /// Messages awaiting server confirmation.
    pub fn unconfirmed_count(&self) -> usize {
        self.outbound.len()
    }

    /// Send a text message.
    ///
    /// The message appears immediately as [`DeliveryState::Pending`]. It is
    /// transmitted now if the session is connected and synchronized,
    /// otherwise on the next successful reconnect.
    ///
    /// # Errors
    ///
    /// - `SendError::Empty` for blank text
    /// - `SendError::TooLong` over the configured size
    /// - `SendError::Disposed` after disposal
    pub fn send_message(
        &mut self,
        text: &str,
    ) -> Result<(CorrelationId, Vec<SessionAction>), SendError> {
        if self.disposed {
            return Err(SendError::Disposed);
        }
        let body = self.outbound.validate(text)?;
        let token = self.outbound.issue_token();
        let color = self.palette.color_for(&self.identity.user_id);

        self.store.insert_optimistic(ChatMessage {
            id: MessageId::Local(token),
            room_id: self.identity.room_id.clone(),
            sender_id: self.identity.user_id.clone(),
            sender_name: Some(self.identity.display_name.clone()),
            avatar_color: Some(color.to_string()),
            body: body.clone(),
            created_at: self.env.wall_clock_millis(),
            delivery: DeliveryState::Pending,
            correlation: Some(token),
        });
        self.outbound.enqueue(token, body);
        tracing::debug!(%token, "message queued");

        let mut actions = vec![SessionAction::Notify(SessionChange::Messages)];
        if let Some(signal) = self.typing.stop_typing() {
            self.push_typing(signal, &mut actions);
        }
        self.flush(&mut actions);
        Ok((token, actions))
    }

    /// Re-send a failed message under its original token.
    pub fn retry_message(&mut self, token: CorrelationId) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.disposed {
            return actions;
        }
        let Some(message) = self.store.local(token) else {
            tracing::debug!(%token, "retry of unknown message ignored");
            return actions;
        };
        if message.delivery != DeliveryState::Failed {
            return actions;
        }
        let body = message.body.clone();

        self.store.mark_pending(token);
        self.outbound.enqueue(token, body);
        actions.push(SessionAction::Notify(SessionChange::Messages));
        self.flush(&mut actions);
        actions
    }

    /// Remove a failed message.
    pub fn discard_message(&mut self, token: CorrelationId) -> Vec<SessionAction> {
        if self.disposed {
            return Vec::new();
        }
        let failed = self.store.local(token).is_some_and(|m| m.delivery == DeliveryState::Failed);
        if !failed {
            return Vec::new();
        }
        self.store.remove_local(token);
        self.outbound.remove(token);
        vec![SessionAction::Notify(SessionChange::Messages)]
    }

    /// Fetch the page of history preceding the oldest loaded message.
    ///
    /// No-op while a fetch is in flight, before the first page has loaded,
    /// when no older history remains, or while not connected.
    pub fn load_older_messages(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.disposed
            || !self.initial_loaded
            || !self.has_more
            || self.is_loading_older()
            || !self.connection.state().is_connected()
        {
            return actions;
        }
        let Some(before) = self.store.oldest_server_id() else {
            return actions;
        };

        let request = HistoryRequest { before: Some(before), limit: self.config.history_page };
        if self.request(RequestKind::OlderHistory, Payload::HistoryRequest(request), &mut actions) {
            actions.push(SessionAction::Notify(SessionChange::History));
        }
        actions
    }

    /// Local keystroke.
    pub fn start_typing(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.disposed || !self.connection.state().is_connected() {
            return actions;
        }
        if let Some(signal) = self.typing.start_typing(self.env.now()) {
            self.push_typing(signal, &mut actions);
        }
        actions
    }

    /// Local typing ended. Idempotent.
    pub fn stop_typing(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        if self.disposed {
            return actions;
        }
        if let Some(signal) = self.typing.stop_typing() {
            self.push_typing(signal, &mut actions);
        }
        actions
    }

    /// The input field was cleared.
    pub fn input_cleared(&mut self) -> Vec<SessionAction> {
        self.stop_typing()
    }

    /// The input field lost focus.
    pub fn focus_lost(&mut self) -> Vec<SessionAction> {
        self.stop_typing()
    }

    /// Reconnect now, optionally with a fresh token. Leaves
    /// [`ConnectionState::Unauthorized`].
    pub fn reconnect(&mut self, auth_token: Option<String>) -> Vec<SessionAction> {
        if self.disposed || !self.enabled {
            return Vec::new();
        }
        if let Some(token) = &auth_token {
            self.auth_token.clone_from(token);
        }
        let now = self.env.now();
        let actions = match self.connection.state() {
            ConnectionState::Disconnected => self.connection.connect(self.target(), now),
            _ => self.connection.reconnect(auth_token, now),
        };
        self.apply_connection(actions)
    }

    /// Tear the session down: close the transport, cancel every deadline,
    /// drop all state. Returns the close actions; later calls return none.
    pub fn dispose(&mut self) -> Vec<SessionAction> {
        if self.disposed {
            return Vec::new();
        }
        let actions: Vec<SessionAction> = self
            .connection
            .disconnect("disposed")
            .into_iter()
            .filter_map(|action| match action {
                ConnectionAction::Close { reason } => Some(SessionAction::CloseTransport { reason }),
                _ => None,
            })
            .collect();

        self.disposed = true;
        self.requests.clear();
        self.store.clear();
        self.outbound.clear();
        self.typing.stop_typing();
        self.typing.clear_remote();
        tracing::debug!(room = %self.identity.room_id, "session disposed");
        actions
    }

    /// Process a transport event.
    pub fn handle(&mut self, event: SessionEvent<E::Instant>) -> Vec<SessionAction> {
        if self.disposed {
            tracing::trace!("event after dispose ignored");
            return Vec::new();
        }

        match event {
            SessionEvent::TransportOpened => {
                let now = self.env.now();
                let actions = self.connection.transport_opened(now);
                self.apply_connection(actions)
            },
            SessionEvent::TransportFailed { reason } | SessionEvent::TransportClosed { reason } => {
                let now = self.env.now();
                let actions = self.connection.transport_lost(now, &reason);
                self.apply_connection(actions)
            },
            SessionEvent::FrameReceived(frame) => self.handle_frame(&frame),
            SessionEvent::Tick { now } => self.handle_tick(now),
        }
    }

    fn handle_frame(&mut self, frame: &Frame) -> Vec<SessionAction> {
        let now = self.env.now();
        let mut actions = match self.connection.handle_frame(frame, now) {
            Ok(connection_actions) => self.apply_connection(connection_actions),
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                return Vec::new();
            },
        };

        let Some(opcode) = frame.header.opcode_enum() else {
            return actions;
        };
        if opcode.is_session() && opcode != Opcode::Error {
            return actions;
        }
        if !self.connection.state().is_connected() {
            tracing::debug!(?opcode, "chat frame while not connected dropped");
            return actions;
        }

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, ?opcode, "malformed frame dropped");
                return actions;
            },
        };
        let request_id = frame.header.request_id();

        match payload {
            Payload::MessagePush(wire) => self.on_message_push(wire, &mut actions),
            Payload::HistoryPage(page) => self.on_history_page(request_id, page, &mut actions),
            Payload::SyncResponse(sync) => self.on_sync_response(request_id, sync, &mut actions),
            Payload::SendRejected(rejected) => self.on_send_rejected(rejected, &mut actions),
            Payload::Receipt(receipt) => self.on_receipt(&receipt, &mut actions),
            Payload::TypingPush(push) => self.on_typing_push(&push, now, &mut actions),
            Payload::Error(error) => self.on_error(request_id, &error, &mut actions),
            other => tracing::debug!(opcode = ?other.opcode(), "unexpected client-bound frame"),
        }
        actions
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<SessionAction> {
        let connection_actions = self.connection.tick(now);
        let mut actions = self.apply_connection(connection_actions);

        if self.typing.purge_expired(now) {
            actions.push(SessionAction::Notify(SessionChange::Typing));
        }
        if !self.connection.state().is_connected() {
            return actions;
        }

        if let Some(signal) = self.typing.tick(now) {
            self.push_typing(signal, &mut actions);
        }

        let expired = self.outbound.expire(now);
        if !expired.is_empty() {
            for token in expired {
                tracing::warn!(%token, "message unconfirmed, marking failed");
                self.store.mark_failed(token);
                actions.push(SessionAction::Notify(SessionChange::SendFailed {
                    token,
                    reason: "no confirmation from server".to_string(),
                }));
            }
            actions.push(SessionAction::Notify(SessionChange::Messages));
        }

        let timeout = self.config.sync_timeout;
        let (timed_out, live): (Vec<_>, Vec<_>) =
            self.requests.drain(..).partition(|r| now - r.sent_at >= timeout);
        self.requests = live;
        for request in timed_out {
            tracing::warn!(request_id = request.id, kind = ?request.kind, "request timed out");
            match request.kind {
                RequestKind::OlderHistory => {
                    actions.push(SessionAction::Notify(SessionChange::History));
                },
                RequestKind::InitialHistory => {
                    self.schedule_initial_retry(Duration::ZERO);
                    self.finish_synchronize(&mut actions);
                },
                RequestKind::Sync => self.finish_synchronize(&mut actions),
            }
        }

        if self.initial_retry_at.is_some_and(|at| now >= at)
            && self.pending(RequestKind::InitialHistory).is_none()
        {
            self.initial_retry_at = None;
            tracing::debug!("requesting first history page again");
            let request = HistoryRequest { before: None, limit: self.config.history_page };
            self.request(RequestKind::InitialHistory, Payload::HistoryRequest(request), &mut actions);
        }

        actions
    }

    fn on_message_push(&mut self, wire: WireMessage, actions: &mut Vec<SessionAction>) {
        if wire.room_id != self.identity.room_id {
            tracing::warn!(room = %wire.room_id, "message for another room dropped");
            return;
        }
        let sender = wire.sender_id.clone();
        if self.apply_confirmed(wire) {
            actions.push(SessionAction::Notify(SessionChange::Messages));
        }
        if self.typing.on_remote_stop(&sender) {
            actions.push(SessionAction::Notify(SessionChange::Typing));
        }
    }

    fn on_history_page(&mut self, request_id: u32, page: HistoryPage, actions: &mut Vec<SessionAction>) {
        let is_history =
            |kind: RequestKind| matches!(kind, RequestKind::InitialHistory | RequestKind::OlderHistory);
        let Some(request) = self.take_request(request_id, is_history) else {
            tracing::debug!(request_id, "unsolicited history page dropped");
            return;
        };

        let mut changed = false;
        for wire in page.messages {
            changed |= self.apply_confirmed(wire);
        }
        self.has_more = page.has_more;
        if changed {
            actions.push(SessionAction::Notify(SessionChange::Messages));
        }
        actions.push(SessionAction::Notify(SessionChange::History));

        if request.kind == RequestKind::InitialHistory {
            self.initial_loaded = true;
            self.initial_retry_at = None;
            self.finish_synchronize(actions);
        }
    }

    fn on_sync_response(&mut self, request_id: u32, sync: SyncResponse, actions: &mut Vec<SessionAction>) {
        if self.take_request(request_id, |kind| kind == RequestKind::Sync).is_none() {
            tracing::debug!(request_id, "unsolicited sync response dropped");
            return;
        }

        let received = sync.messages.len();
        let mut changed = false;
        for wire in sync.messages {
            changed |= self.apply_confirmed(wire);
        }
        if changed {
            actions.push(SessionAction::Notify(SessionChange::Messages));
        }
        tracing::debug!(received, complete = sync.complete, "gap-fill response");

        if !sync.complete && received > 0 {
            let after = self.store.newest_server_id().unwrap_or(0);
            let request = SyncRequest { after, limit: self.config.sync_limit };
            if self.request(RequestKind::Sync, Payload::SyncRequest(request), actions) {
                return;
            }
        }
        self.finish_synchronize(actions);
    }

    fn on_send_rejected(&mut self, rejected: SendRejected, actions: &mut Vec<SessionAction>) {
        let token = CorrelationId(rejected.correlation);
        self.outbound.on_rejected(token);
        if self.store.mark_failed(token) {
            tracing::warn!(%token, code = rejected.code, reason = %rejected.reason, "message rejected");
            actions.push(SessionAction::Notify(SessionChange::Messages));
            actions.push(SessionAction::Notify(SessionChange::SendFailed {
                token,
                reason: rejected.reason,
            }));
        }
    }

    fn on_receipt(&mut self, receipt: &Receipt, actions: &mut Vec<SessionAction>) {
        if self.store.mark_delivered(receipt.message_id) {
            actions.push(SessionAction::Notify(SessionChange::Messages));
        }
    }

    fn on_typing_push(&mut self, push: &TypingPush, now: E::Instant, actions: &mut Vec<SessionAction>) {
        let changed = if push.active {
            self.typing.on_remote_typing(&push.user_id, &push.user_name, now)
        } else {
            self.typing.on_remote_stop(&push.user_id)
        };
        if changed {
            actions.push(SessionAction::Notify(SessionChange::Typing));
        }
    }

    fn on_error(&mut self, request_id: u32, error: &ErrorPayload, actions: &mut Vec<SessionAction>) {
        if error.is_fatal() {
            return;
        }
        let Some(request) = self.take_request(request_id, |_| true) else {
            tracing::warn!(code = error.code, message = %error.message, "server error");
            return;
        };
        tracing::warn!(code = error.code, message = %error.message, kind = ?request.kind, "request failed");

        match request.kind {
            RequestKind::OlderHistory => {
                if error.is_history_exhausted() {
                    self.has_more = false;
                }
                actions.push(SessionAction::Notify(SessionChange::History));
            },
            RequestKind::InitialHistory => {
                if error.is_history_exhausted() {
                    self.initial_loaded = true;
                    self.has_more = false;
                    actions.push(SessionAction::Notify(SessionChange::History));
                } else {
                    let hint = Duration::from_secs(error.retry_after.unwrap_or(0));
                    self.schedule_initial_retry(hint);
                }
                self.finish_synchronize(actions);
            },
            RequestKind::Sync => self.finish_synchronize(actions),
        }
    }

    /// Merge a confirmed message and settle its outbound entry. Returns
    /// `true` if the timeline changed.
    fn apply_confirmed(&mut self, wire: WireMessage) -> bool {
        let mut message = ChatMessage::from_wire(wire);
        if message.avatar_color.is_none() {
            message.avatar_color = Some(self.palette.color_for(&message.sender_id).to_string());
        }
        if message.sender_id == self.identity.user_id {
            if let Some(token) = message.correlation {
                if self.outbound.on_confirmed(token) {
                    tracing::debug!(%token, "message confirmed");
                }
            }
        }
        self.store.append_live(message)
    }

    fn on_synchronize(&mut self, actions: &mut Vec<SessionAction>) {
        self.synchronized = false;

        if self.initial_loaded {
            let after = self.store.newest_server_id().unwrap_or(0);
            let request = SyncRequest { after, limit: self.config.sync_limit };
            if !self.request(RequestKind::Sync, Payload::SyncRequest(request), actions) {
                self.finish_synchronize(actions);
            }
        } else {
            let request = HistoryRequest { before: None, limit: self.config.history_page };
            if !self.request(RequestKind::InitialHistory, Payload::HistoryRequest(request), actions) {
                self.finish_synchronize(actions);
            }
        }
    }

    /// Ask for the first history page again after the configured delay, or
    /// after `hint` if the server asked for longer.
    fn schedule_initial_retry(&mut self, hint: Duration) {
        let delay = self.config.history_retry.max(hint);
        self.initial_retry_at = Some(self.env.now() + delay);
    }

    fn finish_synchronize(&mut self, actions: &mut Vec<SessionAction>) {
        if self.synchronized {
            return;
        }
        self.synchronized = true;
        self.flush(actions);
    }

    fn on_link_lost(&mut self, actions: &mut Vec<SessionAction>) {
        let had_older = self.is_loading_older();
        self.requests.clear();
        self.initial_retry_at = None;
        self.synchronized = false;
        self.outbound.on_link_lost();
        self.typing.stop_typing();
        if self.typing.clear_remote() {
            actions.push(SessionAction::Notify(SessionChange::Typing));
        }
        if had_older {
            actions.push(SessionAction::Notify(SessionChange::History));
        }
    }

    /// Transmit queued messages, oldest first, if allowed.
    fn flush(&mut self, actions: &mut Vec<SessionAction>) {
        if !self.synchronized || !self.connection.state().is_connected() {
            return;
        }
        let now = self.env.now();
        let client_time_ms = self.env.wall_clock_millis();

        for (token, body) in self.outbound.take_ready(now) {
            let payload = Payload::SendMessage(SendMessage {
                correlation: token.0,
                body: body.to_wire(),
                client_time_ms,
            });
            if let Some(frame) = encode(payload, 0) {
                tracing::debug!(%token, "transmitting message");
                actions.push(SessionAction::Send(frame));
            }
        }
    }

    fn push_typing(&self, signal: TypingSignal, actions: &mut Vec<SessionAction>) {
        if !self.connection.state().is_connected() {
            return;
        }
        if let Some(frame) = encode(Payload::Typing(Typing { active: signal.is_active() }), 0) {
            actions.push(SessionAction::Send(frame));
        }
    }

    /// Issue a tracked request. Returns `false` if it could not be encoded.
    fn request(&mut self, kind: RequestKind, payload: Payload, actions: &mut Vec<SessionAction>) -> bool {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.checked_add(1).unwrap_or(1);

        let Some(frame) = encode(payload, id) else {
            return false;
        };
        self.requests.push(Request { id, kind, sent_at: self.env.now() });
        actions.push(SessionAction::Send(frame));
        true
    }

    fn pending(&self, kind: RequestKind) -> Option<&Request<E::Instant>> {
        self.requests.iter().find(|r| r.kind == kind)
    }

    /// Remove the request a response answers. Responses of the wrong kind
    /// leave the request outstanding.
    fn take_request(
        &mut self,
        request_id: u32,
        accepts: impl Fn(RequestKind) -> bool,
    ) -> Option<Request<E::Instant>> {
        if request_id == 0 {
            return None;
        }
        let pos = self.requests.iter().position(|r| r.id == request_id && accepts(r.kind))?;
        Some(self.requests.swap_remove(pos))
    }

    fn target(&self) -> ConnectTarget {
        ConnectTarget {
            endpoint: self.config.endpoint.clone(),
            credentials: Credentials {
                room_id: self.identity.room_id.clone(),
                user_id: self.identity.user_id.clone(),
                display_name: self.identity.display_name.clone(),
                auth_token: self.auth_token.clone(),
            },
        }
    }

    fn apply_connection(&mut self, actions: Vec<ConnectionAction>) -> Vec<SessionAction> {
        let mut out = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                ConnectionAction::Open { endpoint } => out.push(SessionAction::OpenTransport { endpoint }),
                ConnectionAction::SendFrame(frame) => out.push(SessionAction::Send(frame)),
                ConnectionAction::Close { reason } => out.push(SessionAction::CloseTransport { reason }),
                ConnectionAction::StateChanged(state) => {
                    out.push(SessionAction::Notify(SessionChange::Connection(state)));
                },
                ConnectionAction::Synchronize { session_id } => {
                    tracing::debug!(session_id, "synchronizing");
                    self.on_synchronize(&mut out);
                },
                ConnectionAction::LinkLost => self.on_link_lost(&mut out),
            }
        }
        out
    }
}

fn encode(payload: Payload, request_id: u32) -> Option<Frame> {
    let opcode = payload.opcode();
    match payload.into_frame(FrameHeader::with_request_id(opcode, request_id)) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::error!(error = %e, ?opcode, "failed to encode frame");
            None
        },
    }
}
