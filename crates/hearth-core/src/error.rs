//! Error types for the connection state machine.

use hearth_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors that can occur during connection state machine operations.
///
/// None of these cross into the UI layer: the session logs them and folds
/// them into the observable [`ConnectionState`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Received a session frame that makes no sense in the current state
    #[error("unexpected frame: received opcode {opcode:#06x} in state {state:?}")]
    UnexpectedFrame {
        /// State when the frame arrived
        state: ConnectionState,
        /// Opcode of the unexpected frame
        opcode: u16,
    },

    /// Frame could not be decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
