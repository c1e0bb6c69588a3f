//! Parsing of typed input lines.

/// What a line of input asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Plain text to send.
    Message(String),
    /// `/older`: fetch the previous page of history.
    Older,
    /// `/retry`: re-send every failed message.
    Retry,
    /// `/discard`: drop every failed message.
    Discard,
    /// `/reconnect [token]`: reconnect now, optionally with a new token.
    Reconnect(Option<String>),
    /// `/typing`: announce that we are composing.
    Typing,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Blank line.
    Empty,
    /// Unrecognized slash command.
    Unknown(String),
}

/// Shown for `/help`.
pub const HELP: &str = "\
commands:
  /older              load earlier messages
  /retry              re-send failed messages
  /discard            drop failed messages
  /reconnect [token]  reconnect now, optionally with a new token
  /typing             show others that you are typing
  /quit               leave the room
anything else is sent as a message";

impl Input {
    /// Parse one line. A leading `//` escapes a message that starts with `/`.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Empty;
        }
        if let Some(escaped) = trimmed.strip_prefix("//") {
            return Self::Message(format!("/{escaped}"));
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return Self::Message(line.trim_end().to_string());
        };

        let mut words = command.split_whitespace();
        let name = words.next().unwrap_or_default();
        match name {
            "older" => Self::Older,
            "retry" => Self::Retry,
            "discard" => Self::Discard,
            "reconnect" => Self::Reconnect(words.next().map(str::to_string)),
            "typing" => Self::Typing,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => Self::Unknown(other.to_string()),
        }
    }
}
