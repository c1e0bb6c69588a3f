//! Driver trait for abstracting transport I/O.
//!
//! The [`Driver`] trait decouples the runtime from a specific transport.
//! Each platform implements it; the generic [`crate::Runtime`] handles all
//! orchestration.

use std::future::Future;

use hearth_proto::Frame;

/// Abstracts transport I/O for the runtime.
///
/// # Implementations
///
/// - **QUIC**: [`QuicDriver`](crate::QuicDriver) behind the `transport`
///   feature
/// - **Simulation**: `SimDriver` in `hearth-harness`, backed by an in-memory
///   model server
pub trait Driver: Send {
    /// Platform-specific error type.
    type Error: std::error::Error + Send + 'static;

    /// Open a transport to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be opened.
    fn connect(&mut self, endpoint: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport is closed or the send fails.
    fn send_frame(&mut self, frame: Frame) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Receive the next frame from the server.
    ///
    /// Returns `None` once the transport has closed. Only polled while
    /// [`is_connected`](Self::is_connected) is `true`.
    fn recv_frame(&mut self) -> impl Future<Output = Option<Frame>> + Send;

    /// Whether a transport is open.
    fn is_connected(&self) -> bool;

    /// Close the transport, if open. Idempotent.
    fn close(&mut self);
}
