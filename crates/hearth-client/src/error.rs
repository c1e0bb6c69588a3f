use thiserror::Error;

/// Reasons a message is refused before it is queued.
///
/// Send failures after queuing are not errors: they surface as
/// [`DeliveryState::Failed`](crate::DeliveryState::Failed) on the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// Body is empty or whitespace only.
    #[error("message is empty")]
    Empty,

    /// Body exceeds the configured size limit.
    #[error("message too long: {len} bytes (max {max})")]
    TooLong {
        /// Body length in bytes
        len: usize,
        /// Configured limit in bytes
        max: usize,
    },

    /// The session has been disposed.
    #[error("session disposed")]
    Disposed,
}
