//! Chat session
//!
//! Action-based state machines for a single chat room: an ordered message
//! store, an outbound queue with optimistic sends, typing presence, and the
//! [`ChatSession`] facade that coordinates them with the
//! [`ConnectionManager`](hearth_core::connection::ConnectionManager).
//!
//! # Architecture
//!
//! Same Sans-IO pattern as [`hearth_core`]. The session receives events
//! ([`SessionEvent`]), processes them through pure state machine logic, and
//! returns actions ([`SessionAction`]) for the caller to execute. Nothing in
//! this crate performs I/O or reads a clock.
//!
//! # Components
//!
//! - [`MessageStore`]: Ordered, deduplicated message list
//! - [`OutboundQueue`]: Validation, correlation tokens, ordered flush
//! - [`TypingTracker`]: Remote typists with expiry, rate-limited local signals
//! - [`AvatarPalette`]: Per-session sender colors
//! - [`ChatSession`]: Facade over all of the above
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::QuicLink`]: Frame channels over a QUIC connection
//! - [`transport::connect`]: Connect to a server

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod event;
mod message;
mod outbound;
mod palette;
mod session;
mod store;
mod typing;

#[cfg(feature = "transport")]
pub mod transport;

pub use error::SendError;
pub use event::{SessionAction, SessionChange, SessionEvent};
pub use hearth_core::{
    connection::{ConnectionState, Credentials},
    env::Environment,
};
pub use message::{ChatMessage, CorrelationId, DeliveryState, MessageBody, MessageId};
pub use outbound::{DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_BODY_BYTES, OutboundConfig, OutboundQueue};
pub use palette::AvatarPalette;
pub use session::{
    ChatSession, DEFAULT_ENDPOINT, DEFAULT_HISTORY_PAGE, DEFAULT_HISTORY_RETRY, DEFAULT_SYNC_LIMIT,
    DEFAULT_SYNC_TIMEOUT, SessionConfig, SessionIdentity,
};
pub use store::MessageStore;
pub use typing::{
    DEFAULT_REMOTE_TTL, DEFAULT_START_INTERVAL, DEFAULT_TYPING_IDLE, TypingConfig, TypingSignal,
    TypingTracker, TypingUser,
};
