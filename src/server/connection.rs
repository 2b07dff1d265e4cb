//! # Connection Worker
//!
//! Owns one accepted connection and loops
//! `AWAITING_DATA → HAS_FRAME → DISPATCHING → RESPONDING` until the peer
//! closes. Frames on a connection are handled strictly one after another.
//!
//! The codec is synchronous and touches the filesystem, so each frame runs
//! on tokio's blocking pool. That also gives a natural fault boundary: a
//! codec panic surfaces as a `JoinError`, ends this connection, and leaves
//! the execution unit that owns it alive for the next connection.

use super::ServerStats;
use crate::framing::{FrameBuffer, TERMINATOR};
use bytes::Bytes;
use crate::protocol::{FileProtocol, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, warn};

/// How many characters of a command are echoed into debug logs
const COMMAND_PREVIEW_CHARS: usize = 50;

/// Why a connection ended abnormally
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol handler panicked: {0}")]
    ProtocolPanic(String),

    #[error("protocol handler was cancelled")]
    Cancelled,
}

/// What happened on a connection that closed cleanly
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    /// Complete frames dispatched and answered
    pub frames: u64,
    /// Unterminated bytes dropped when the peer closed
    pub discarded_bytes: usize,
}

/// Serve one connection until the peer closes
///
/// Returns `Ok` when the peer closed the connection, whether or not a
/// partial frame was pending (it is discarded, never dispatched). Socket
/// errors and codec panics end the connection with `Err`.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    protocol: Arc<dyn FileProtocol>,
    stats: &ServerStats,
    read_buffer_size: usize,
) -> Result<ConnectionSummary, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let read_size = read_buffer_size.max(TERMINATOR.len());
    let mut frames = FrameBuffer::with_capacity(read_size);
    let mut summary = ConnectionSummary::default();

    loop {
        let n = stream.read_buf(frames.read_target(read_size)).await?;
        if n == 0 {
            if frames.has_partial() {
                summary.discarded_bytes = frames.discard();
                debug!(
                    peer = %peer,
                    bytes = summary.discarded_bytes,
                    "Discarding unterminated request at close"
                );
            }
            return Ok(summary);
        }

        while let Some(frame) = frames.next_frame() {
            let response = match std::str::from_utf8(&frame) {
                Ok(command) => {
                    debug!(peer = %peer, "Received: {}...", preview(command));
                    dispatch(&protocol, frame.clone()).await?
                }
                Err(_) => Response::error("request is not valid UTF-8").to_json(),
            };

            stream.write_all(response.as_bytes()).await?;
            stream.write_all(TERMINATOR).await?;
            stream.flush().await?;

            stats.record_frame();
            summary.frames += 1;
        }
    }
}

/// Serve a connection and account for it, never failing
///
/// This is the boundary every dispatcher calls: whatever goes wrong is
/// logged here and counted, and the caller's execution unit carries on.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    protocol: Arc<dyn FileProtocol>,
    stats: &ServerStats,
    read_buffer_size: usize,
) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stats.connection_opened();
    let result = serve_connection(stream, peer, protocol, stats, read_buffer_size).await;
    let success = match result {
        Ok(summary) => {
            debug!(peer = %peer, frames = summary.frames, "Connection closed");
            true
        }
        Err(ConnectionError::ProtocolPanic(message)) => {
            error!(peer = %peer, "Protocol handler failed, closing connection: {}", message);
            false
        }
        Err(e) => {
            warn!(peer = %peer, error = %e, "Connection terminated");
            false
        }
    };
    stats.connection_closed(success);
    success
}

async fn dispatch(protocol: &Arc<dyn FileProtocol>, frame: Bytes) -> Result<String, ConnectionError> {
    let protocol = Arc::clone(protocol);
    tokio::task::spawn_blocking(move || {
        // Validated by the caller; the frame moves here without a copy.
        let command = std::str::from_utf8(&frame).unwrap_or_default();
        protocol.process(command)
    })
    .await
    .map_err(|e| {
        if e.is_panic() {
            ConnectionError::ProtocolPanic(panic_message(e.into_panic()))
        } else {
            ConnectionError::Cancelled
        }
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn preview(command: &str) -> String {
    command.chars().take(COMMAND_PREVIEW_CHARS).collect()
}
