//! QUIC transport for the session.
//!
//! Provides [`QuicLink`], a pair of frame channels backed by one QUIC
//! connection. This is a thin layer that only moves frames; every protocol
//! decision stays in the Sans-IO [`ChatSession`](crate::ChatSession).
//!
//! Each client frame travels on its own bidirectional stream. Server frames
//! arrive on unidirectional streams, one frame per stream.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use hearth_proto::{Frame, FrameHeader};
use quinn::{ClientConfig, Endpoint, RecvStream, SendStream};
use thiserror::Error;
use tokio::sync::mpsc;

/// ALPN protocol identifier. Must match the server.
pub const ALPN: &[u8] = b"hearth";

/// QUIC idle timeout. Longer than the session heartbeat interval so the
/// session, not QUIC, decides when a quiet link is dead.
const QUIC_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Frames buffered per direction.
const CHANNEL_CAPACITY: usize = 64;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// Stream error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Frame channels over an open QUIC connection.
///
/// `from_server` yields `None` once the connection is gone.
pub struct QuicLink {
    /// Send frames to the server.
    pub to_server: mpsc::Sender<Frame>,
    /// Receive frames from the server.
    pub from_server: mpsc::Receiver<Frame>,
    /// Abort handle to stop the connection task.
    abort_handle: tokio::task::AbortHandle,
}

impl QuicLink {
    /// Stop the connection.
    pub fn stop(&self) {
        self.abort_handle.abort();
    }
}

impl Drop for QuicLink {
    fn drop(&mut self) {
        self.abort_handle.abort();
    }
}

/// Connect to a Hearth server via QUIC.
///
/// `server_addr` is a socket address such as `127.0.0.1:4433`.
pub async fn connect(server_addr: &str) -> Result<QuicLink, TransportError> {
    let addr: SocketAddr = server_addr
        .parse()
        .map_err(|e| TransportError::Connection(format!("invalid address: {e}")))?;

    let client_config = insecure_client_config()?;
    let bind: SocketAddr = if addr.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0u8; 4], 0))
    };
    let mut endpoint = Endpoint::client(bind)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(client_config);

    let connection = endpoint
        .connect(addr, "localhost")
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?
        .await
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    tracing::debug!(%addr, "quic connection established");

    let (to_server_tx, to_server_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);
    let (from_server_tx, from_server_rx) = mpsc::channel::<Frame>(CHANNEL_CAPACITY);

    let handle = tokio::spawn(run_connection(connection, to_server_rx, from_server_tx));

    Ok(QuicLink {
        to_server: to_server_tx,
        from_server: from_server_rx,
        abort_handle: handle.abort_handle(),
    })
}

/// Run the connection, bridging between channels and QUIC.
///
/// Returns when the connection closes or the caller drops `to_server`;
/// dropping `from_server` then signals closure to the receiver.
async fn run_connection(
    connection: quinn::Connection,
    mut to_server: mpsc::Receiver<Frame>,
    from_server: mpsc::Sender<Frame>,
) {
    let conn_recv = connection.clone();
    let inbound = from_server.clone();
    let recv_handle = tokio::spawn(async move {
        loop {
            match conn_recv.accept_uni().await {
                Ok(recv) => {
                    let tx = inbound.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_incoming_stream(recv, tx).await {
                            tracing::warn!(error = %e, "incoming stream failed");
                        }
                    });
                },
                Err(e) => {
                    tracing::debug!(error = %e, "accept_uni ended");
                    break;
                },
            }
        }
    });

    loop {
        tokio::select! {
            outgoing = to_server.recv() => {
                let Some(frame) = outgoing else { break };
                match connection.open_bi().await {
                    Ok((send, _recv)) => {
                        if let Err(e) = send_frame(send, &frame).await {
                            tracing::warn!(error = %e, "send failed");
                        }
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "open_bi failed, connection gone");
                        break;
                    },
                }
            },
            reason = connection.closed() => {
                tracing::debug!(%reason, "connection closed");
                break;
            },
        }
    }

    recv_handle.abort();
    connection.close(0u32.into(), b"bye");
    drop(from_server);
}

/// Handle an incoming unidirectional stream (server -> client).
async fn handle_incoming_stream(
    mut recv: RecvStream,
    tx: mpsc::Sender<Frame>,
) -> Result<(), TransportError> {
    let mut buf = BytesMut::zeroed(FrameHeader::SIZE);

    recv.read_exact(&mut buf[..FrameHeader::SIZE])
        .await
        .map_err(|e| TransportError::Stream(format!("header read failed: {e}")))?;

    let header = FrameHeader::from_bytes(&buf[..FrameHeader::SIZE])
        .map_err(|e| TransportError::Protocol(format!("invalid header: {e}")))?;
    let payload_size = header.payload_size() as usize;

    if payload_size > 0 {
        buf.resize(FrameHeader::SIZE + payload_size, 0);
        recv.read_exact(&mut buf[FrameHeader::SIZE..])
            .await
            .map_err(|e| TransportError::Stream(format!("payload read failed: {e}")))?;
    }

    let frame = Frame::decode(&buf)
        .map_err(|e| TransportError::Protocol(format!("frame decode failed: {e}")))?;

    tx.send(frame)
        .await
        .map_err(|e| TransportError::Stream(format!("channel send failed: {e}")))?;

    Ok(())
}

/// Send a frame on a stream.
async fn send_frame(mut send: SendStream, frame: &Frame) -> Result<(), TransportError> {
    let mut buf = Vec::with_capacity(frame.encoded_len());
    frame.encode(&mut buf).map_err(|e| TransportError::Protocol(format!("encode failed: {e}")))?;

    send.write_all(&buf).await.map_err(|e| TransportError::Stream(format!("write failed: {e}")))?;
    send.finish().map_err(|e| TransportError::Stream(format!("finish failed: {e}")))?;

    Ok(())
}

/// Client config that accepts any certificate.
///
/// Development only: production deployments should verify certificates.
fn insecure_client_config() -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Connection(format!("invalid tls config: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic_crypto));

    let idle = QUIC_IDLE_TIMEOUT
        .try_into()
        .map_err(|e| TransportError::Connection(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
