//! Child side of the process pool.
//!
//! A worker connects back to the parent's control socket, builds its codec
//! once, then serves every descriptor it is handed until the parent closes
//! the channel.

use super::connection::handle_connection;
use super::fd_passing::recv_fd;
use super::process_pool::{ACK_FAILURE, ACK_SUCCESS};
use super::ServerStats;
use crate::protocol::{DirectoryProtocol, FileProtocol};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::{TcpStream, UnixStream};
use tracing::{debug, info, warn};

/// Run a worker process until its control channel closes
pub async fn run_worker(control_socket: &Path, storage_dir: &Path, read_buffer_size: usize) -> Result<()> {
    let mut control = UnixStream::connect(control_socket)
        .await
        .with_context(|| format!("Failed to connect to control socket {:?}", control_socket))?;

    let protocol: Arc<dyn FileProtocol> = Arc::new(
        DirectoryProtocol::new(storage_dir)
            .with_context(|| format!("Failed to open storage directory {:?}", storage_dir))?,
    );
    let stats = ServerStats::new();
    let pid = std::process::id();
    info!(pid, "Worker process started");

    loop {
        let control_fd = control.as_raw_fd();
        let received = control
            .async_io(Interest::READABLE, || recv_fd(control_fd))
            .await
            .context("Failed to receive connection from parent")?;
        let Some(fd) = received else {
            break;
        };

        // SAFETY: the descriptor was just received over SCM_RIGHTS and is
        // owned by nothing else in this process.
        let socket = unsafe { std::net::TcpStream::from_raw_fd(fd) };
        let success = match adopt(socket) {
            Ok((stream, peer)) => {
                handle_connection(stream, peer, Arc::clone(&protocol), &stats, read_buffer_size).await
            }
            Err(e) => {
                warn!(pid, error = %e, "Failed to adopt handed-off connection");
                false
            }
        };

        let ack = if success { ACK_SUCCESS } else { ACK_FAILURE };
        control.write_u8(ack).await.context("Failed to acknowledge connection")?;
    }

    let snapshot = stats.snapshot();
    debug!(pid, completed = snapshot.completed, failed = snapshot.failed, "Worker process exiting");
    Ok(())
}

fn adopt(socket: std::net::TcpStream) -> std::io::Result<(TcpStream, SocketAddr)> {
    socket.set_nonblocking(true)?;
    let peer = socket.peer_addr()?;
    Ok((TcpStream::from_std(socket)?, peer))
}
