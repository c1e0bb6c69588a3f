//! Runtime errors.

use hearth_client::SendError;
use thiserror::Error;

/// Errors surfaced through [`ChatHandle`](crate::ChatHandle).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    /// The runtime has stopped (disposed or dropped).
    #[error("runtime stopped")]
    Stopped,

    /// The message was refused before queuing.
    #[error(transparent)]
    Send(#[from] SendError),
}
