//! QUIC driver.

use hearth_client::transport::{self, QuicLink, TransportError};
use hearth_proto::Frame;

use crate::driver::Driver;

/// [`Driver`] over a QUIC connection.
#[derive(Default)]
pub struct QuicDriver {
    link: Option<QuicLink>,
}

impl QuicDriver {
    /// Create a disconnected driver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for QuicDriver {
    type Error = TransportError;

    async fn connect(&mut self, endpoint: &str) -> Result<(), Self::Error> {
        self.close();
        self.link = Some(transport::connect(endpoint).await?);
        Ok(())
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), Self::Error> {
        let Some(link) = &self.link else {
            return Err(TransportError::Connection("not connected".into()));
        };
        link.to_server
            .send(frame)
            .await
            .map_err(|_| TransportError::Connection("connection task stopped".into()))
    }

    async fn recv_frame(&mut self) -> Option<Frame> {
        let link = self.link.as_mut()?;
        let frame = link.from_server.recv().await;
        if frame.is_none() {
            self.link = None;
        }
        frame
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.stop();
        }
    }
}
