//! Simulation driver implementing the Driver trait.
//!
//! `SimDriver` gives [`hearth_app::Runtime`] the same interface as
//! `QuicDriver`, backed by a [`SharedSimServer`] instead of a network. The
//! runtime orchestration code under test is the production code.

use std::time::Duration;

use hearth_app::Driver;
use hearth_proto::Frame;

use crate::sim_server::{ConnId, SharedSimServer, lock};

/// How often `recv_frame` polls the model server for queued frames.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Error type for simulation driver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimDriverError {
    /// The server refused the connection.
    #[error("connection refused")]
    Refused,

    /// No connection is open, or the server dropped it.
    #[error("not connected")]
    NotConnected,
}

/// Simulation driver for deterministic testing.
pub struct SimDriver {
    server: SharedSimServer,
    conn: Option<ConnId>,
    connect_delay: Duration,
}

impl SimDriver {
    /// Create a driver talking to `server`.
    pub fn new(server: SharedSimServer) -> Self {
        Self { server, conn: None, connect_delay: Duration::ZERO }
    }

    /// Delay every connect attempt, to race connects against other work.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Server-side id of the open connection.
    pub fn connection(&self) -> Option<ConnId> {
        self.conn
    }
}

impl Driver for SimDriver {
    type Error = SimDriverError;

    async fn connect(&mut self, _endpoint: &str) -> Result<(), Self::Error> {
        self.close();
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        let conn = lock(&self.server).open_connection().ok_or(SimDriverError::Refused)?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let conn = self.conn.ok_or(SimDriverError::NotConnected)?;
        let mut server = lock(&self.server);
        if !server.is_alive(conn) {
            return Err(SimDriverError::NotConnected);
        }
        server.receive(conn, &frame);
        Ok(())
    }

    async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            let conn = self.conn?;
            {
                let mut server = lock(&self.server);
                if let Some(frame) = server.take_outgoing(conn) {
                    return Some(frame);
                }
                if !server.is_alive(conn) {
                    drop(server);
                    self.conn = None;
                    return None;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            lock(&self.server).close_connection(conn);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use hearth_proto::Payload;

    use super::*;
    use crate::sim_server::create_shared_server;

    #[tokio::test(start_paused = true)]
    async fn refused_connect_is_an_error() {
        let server = create_shared_server("room", "token");
        lock(&server).refuse_connections(1);
        let mut driver = SimDriver::new(server);

        assert_eq!(driver.connect("sim").await, Err(SimDriverError::Refused));
        assert!(!driver.is_connected());
        assert!(driver.connect("sim").await.is_ok());
        assert!(driver.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn killed_connection_ends_recv() {
        let server = create_shared_server("room", "token");
        let mut driver = SimDriver::new(server.clone());
        driver.connect("sim").await.unwrap();

        lock(&server).kill_all();

        assert!(driver.recv_frame().await.is_none());
        assert!(!driver.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_kill_fails() {
        let server = create_shared_server("room", "token");
        let mut driver = SimDriver::new(server.clone());
        driver.connect("sim").await.unwrap();
        lock(&server).kill_all();

        let result = driver.send_frame(Payload::Ping.to_frame().unwrap()).await;

        assert_eq!(result, Err(SimDriverError::NotConnected));
    }
}
