//! Session events and actions.

use hearth_core::connection::ConnectionState;
use hearth_proto::Frame;

use crate::message::CorrelationId;

/// Transport events the caller feeds into the session.
///
/// The caller is responsible for:
/// - Opening and closing the transport when asked
/// - Receiving frames from the network
/// - Driving time forward via ticks
///
/// Generic over `I` (Instant type) to support both production and
/// simulation environments.
#[derive(Debug, Clone)]
pub enum SessionEvent<I = std::time::Instant> {
    /// The transport requested by [`SessionAction::OpenTransport`] is up.
    TransportOpened,

    /// The transport could not be opened.
    TransportFailed {
        /// Failure description
        reason: String,
    },

    /// An open transport was closed by the peer or the network.
    TransportClosed {
        /// Close description
        reason: String,
    },

    /// Frame received from server.
    FrameReceived(Frame),

    /// Time tick for timeout processing.
    ///
    /// The caller should send ticks periodically (e.g. every 250ms) so
    /// retries, heartbeats, typing expiry and ack timeouts fire.
    Tick {
        /// Current time from the environment.
        now: I,
    },
}

/// Actions the session asks the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a transport to this endpoint and report back with
    /// [`SessionEvent::TransportOpened`] or [`SessionEvent::TransportFailed`].
    OpenTransport {
        /// Transport endpoint
        endpoint: String,
    },

    /// Close the transport.
    CloseTransport {
        /// Reason for closing
        reason: String,
    },

    /// Send a frame to the server.
    Send(Frame),

    /// Observable state changed.
    Notify(SessionChange),
}

/// What changed, for observers that re-read only the affected state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    /// Message list or a message's delivery state.
    Messages,
    /// Connection state.
    Connection(ConnectionState),
    /// Remote typists.
    Typing,
    /// `has_more` or `is_loading_older`.
    History,
    /// A message failed (refused by the server or unconfirmed in time).
    SendFailed {
        /// Correlation token of the failed message
        token: CorrelationId,
        /// Human-readable reason
        reason: String,
    },
}
