//! Per-connection session for the Tokio runtime.

use bytes::{Buf, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::frame::{encode_frame, extract_frames};
use super::handshake::{self, render_response, ScanResult, NONCE_LEN};
use super::relay::Relay;
use crate::config::Endpoints;
use crate::error::{GatewayError, Result};

/// Bytes requested per read while waiting for the handshake.
const HANDSHAKE_READ_SIZE: usize = 16;

/// Bytes requested per read once frames are flowing.
const DATA_READ_SIZE: usize = 128;

/// Protocol phase of a session. Only ever moves from `Handshake` to `Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Handshake,
    Data,
}

/// One accepted connection: its stream, receive buffer and protocol phase.
pub struct Session<S> {
    stream: S,
    buffer: BytesMut,
    state: ConnectionState,
    endpoints: Arc<Endpoints>,
    relay: Arc<dyn Relay>,
    read_timeout: Option<Duration>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, endpoints: Arc<Endpoints>, relay: Arc<dyn Relay>) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(DATA_READ_SIZE),
            state: ConnectionState::Handshake,
            endpoints,
            relay,
            read_timeout: None,
        }
    }

    /// Abort the session when a single read waits longer than `timeout`.
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the session until the peer disconnects or an error occurs.
    ///
    /// A peer closing the connection is a normal end and returns `Ok`.
    pub async fn run(mut self) -> Result<()> {
        loop {
            match self.step().await {
                Ok(()) => {}
                Err(GatewayError::PeerDisconnected) => {
                    trace!(state = ?self.state(), "Connection closed by client");
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Perform one read and process whatever it completed.
    pub async fn step(&mut self) -> Result<()> {
        match self.state {
            ConnectionState::Handshake => {
                self.fill(HANDSHAKE_READ_SIZE).await?;
                self.try_handshake().await
            }
            ConnectionState::Data => {
                self.fill(DATA_READ_SIZE).await?;
                self.relay_frames().await
            }
        }
    }

    /// Append up to `limit` bytes from the stream to the receive buffer.
    async fn fill(&mut self, limit: usize) -> Result<usize> {
        let timeout = self.read_timeout;
        self.buffer.reserve(limit);

        let mut reader = (&mut self.stream).take(limit as u64);
        let read = reader.read_buf(&mut self.buffer);
        let n = match timeout {
            Some(t) => tokio::time::timeout(t, read)
                .await
                .map_err(|_| GatewayError::ReadTimeout)??,
            None => read.await?,
        };

        if n == 0 {
            return Err(GatewayError::PeerDisconnected);
        }
        Ok(n)
    }

    async fn try_handshake(&mut self) -> Result<()> {
        // `consumed` is the whole buffer: scan only completes on an exact fit.
        let (header_len, consumed) = match handshake::scan(&self.buffer) {
            ScanResult::Incomplete => return Ok(()),
            ScanResult::Complete {
                header_len,
                consumed,
            } => (header_len, consumed),
        };

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&self.buffer[consumed - NONCE_LEN..consumed]);

        trace!(
            header = %String::from_utf8_lossy(&self.buffer[..header_len]),
            nonce = ?nonce,
            "Handshake request"
        );

        let request = handshake::parse_request(&self.buffer[..header_len], nonce)?;
        let response = render_response(request.digest()?, &self.endpoints);

        trace!(response = %String::from_utf8_lossy(&response), "Handshake response");
        self.stream.write_all(&response).await?;

        self.buffer.clear();
        self.state = ConnectionState::Data;
        debug!(
            verb = %request.verb,
            path = %request.path,
            protocol = %request.protocol,
            "Handshake complete"
        );
        Ok(())
    }

    async fn relay_frames(&mut self) -> Result<()> {
        let (frames, remainder) = extract_frames(&self.buffer);
        let consumed = self.buffer.len() - remainder.len();

        for payload in frames {
            debug!(payload = %String::from_utf8_lossy(payload), "Relaying frame");
            let reply = self.relay.relay(payload);
            self.stream.write_all(&encode_frame(&reply)).await?;
        }

        self.buffer.advance(consumed);
        Ok(())
    }
}

/// Run a session to completion, logging how it ended.
///
/// Errors stop at this boundary so they never reach the accept loop.
pub async fn handle_connection<S>(
    stream: S,
    endpoints: Arc<Endpoints>,
    relay: Arc<dyn Relay>,
    read_timeout: Option<Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let session = Session::new(stream, endpoints, relay).with_read_timeout(read_timeout);

    match session.run().await {
        Ok(()) => {}
        Err(GatewayError::MalformedHandshake(e)) => {
            warn!(error = %e, "Rejected handshake");
        }
        Err(GatewayError::ReadTimeout) => {
            debug!("Closing idle connection");
        }
        Err(e) => {
            debug!(error = %e, "Connection error");
        }
    }
}
