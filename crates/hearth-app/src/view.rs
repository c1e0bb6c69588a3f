//! Observable session state.
//!
//! [`SessionView`] is the "view model": an owned snapshot of everything a UI
//! renders, published by the runtime after every state change. Readers never
//! touch the session itself.

use std::fmt::Write as _;

use hearth_client::{
    ChatMessage, ChatSession, ConnectionState, CorrelationId, DeliveryState, Environment, MessageId,
};

/// One message as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageView {
    /// Server or local identifier.
    pub id: MessageId,
    /// Correlation token, for messages this client authored.
    pub correlation: Option<CorrelationId>,
    /// Author identifier.
    pub sender_id: String,
    /// Name to display: the sender's name, falling back to the id.
    pub sender_name: String,
    /// Avatar color.
    pub avatar_color: Option<String>,
    /// Text content. Non-text bodies render as a placeholder.
    pub text: String,
    /// Unix milliseconds.
    pub created_at: u64,
    /// Delivery progress.
    pub delivery: DeliveryState,
}

impl From<&ChatMessage> for MessageView {
    fn from(message: &ChatMessage) -> Self {
        Self {
            id: message.id,
            correlation: message.correlation,
            sender_id: message.sender_id.clone(),
            sender_name: message.sender_name.clone().unwrap_or_else(|| message.sender_id.clone()),
            avatar_color: message.avatar_color.clone(),
            text: message.text().unwrap_or("<unsupported message>").to_string(),
            created_at: message.created_at,
            delivery: message.delivery,
        }
    }
}

/// Snapshot of observable session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Connection state.
    pub connection: ConnectionState,
    /// Why the server rejected the credentials, when unauthorized.
    pub fatal_reason: Option<String>,
    /// Timeline, oldest first.
    pub messages: Vec<MessageView>,
    /// Names of remote typists.
    pub typing: Vec<String>,
    /// Typing summary line.
    pub typing_label: Option<String>,
    /// Whether older history may be loaded.
    pub has_more: bool,
    /// Whether an older page is being fetched.
    pub is_loading_older: bool,
    /// Messages awaiting confirmation.
    pub unconfirmed: usize,
    /// Whether the session has been disposed.
    pub disposed: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            fatal_reason: None,
            messages: Vec::new(),
            typing: Vec::new(),
            typing_label: None,
            has_more: true,
            is_loading_older: false,
            unconfirmed: 0,
            disposed: false,
        }
    }
}

impl SessionView {
    /// Capture the current state of a session.
    pub fn capture<E: Environment>(session: &ChatSession<E>) -> Self {
        Self {
            connection: session.connection_state(),
            fatal_reason: session.fatal_reason().map(str::to_string),
            messages: session.messages().map(MessageView::from).collect(),
            typing: session.typing_users().into_iter().map(|u| u.user_name.clone()).collect(),
            typing_label: session.typing_label(),
            has_more: session.has_more(),
            is_loading_older: session.is_loading_older(),
            unconfirmed: session.unconfirmed_count(),
            disposed: session.is_disposed(),
        }
    }

    /// Find a message by correlation token.
    pub fn by_correlation(&self, token: CorrelationId) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.correlation == Some(token))
    }

    /// Plain-text transcript: a status line, one line per message, and the
    /// typing label if any.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let status = match self.connection {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Unauthorized => "unauthorized",
        };
        let _ = write!(out, "[{status}]");
        if let Some(reason) = &self.fatal_reason {
            let _ = write!(out, " {reason}");
        }
        out.push('\n');

        for message in &self.messages {
            let marker = match message.delivery {
                DeliveryState::Pending => " (sending)",
                DeliveryState::Sent => "",
                DeliveryState::Delivered => " (delivered)",
                DeliveryState::Failed => " (failed)",
            };
            let _ = writeln!(out, "{}: {}{marker}", message.sender_name, message.text);
        }

        if let Some(label) = &self.typing_label {
            let _ = writeln!(out, "{label}");
        }
        out
    }
}
