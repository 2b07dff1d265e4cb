//! Submission queue shared by the pool dispatchers.
//!
//! Unbounded by default: when every slot is busy, accepted connections wait
//! here in memory with no rejection policy, so sustained overload grows this
//! queue without limit. A capacity turns it into a bounded queue whose
//! overflow is answered with a "server busy" error.

use crate::framing::encode_frame;
use crate::protocol::Response;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// An accepted connection waiting for a worker slot
#[derive(Debug)]
pub struct Job {
    pub stream: TcpStream,
    pub peer: SocketAddr,
    pub queued_at: Instant,
}

impl Job {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            queued_at: Instant::now(),
        }
    }
}

pub enum QueueSender {
    Unbounded(mpsc::UnboundedSender<Job>),
    Bounded(mpsc::Sender<Job>),
}

pub enum QueueReceiver {
    Unbounded(mpsc::UnboundedReceiver<Job>),
    Bounded(mpsc::Receiver<Job>),
}

/// Receiving end shared by every slot of a pool
pub type SharedReceiver = Arc<Mutex<QueueReceiver>>;

/// Create a submission queue, bounded if `capacity` is given
pub fn work_queue(capacity: Option<usize>) -> (QueueSender, SharedReceiver) {
    let (tx, rx) = match capacity {
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        }
    };
    (tx, Arc::new(Mutex::new(rx)))
}

impl QueueSender {
    /// Enqueue without waiting; hands the job back if it cannot be queued
    pub fn submit(&self, job: Job) -> Result<(), Job> {
        match self {
            QueueSender::Unbounded(tx) => tx.send(job).map_err(|e| e.0),
            QueueSender::Bounded(tx) => tx.try_send(job).map_err(|e| match e {
                mpsc::error::TrySendError::Full(job) | mpsc::error::TrySendError::Closed(job) => job,
            }),
        }
    }
}

impl QueueReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            QueueReceiver::Unbounded(rx) => rx.recv().await,
            QueueReceiver::Bounded(rx) => rx.recv().await,
        }
    }
}

/// Wait for the next job; `None` once the queue is closed and drained
pub async fn next_job(rx: &SharedReceiver) -> Option<Job> {
    let job = rx.lock().await.recv().await;
    if let Some(ref job) = job {
        debug!(peer = %job.peer, waited = ?job.queued_at.elapsed(), "Dequeued connection");
    }
    job
}

/// Answer a connection that could not be queued and close it
pub async fn reject_busy(mut job: Job) {
    let response = Response::error("server busy: submission queue is full").to_json();
    if let Err(e) = job.stream.write_all(&encode_frame(response.as_bytes())).await {
        debug!(peer = %job.peer, error = %e, "Failed to send busy response");
    }
    let _ = job.stream.shutdown().await;
    warn!(peer = %job.peer, "Rejected connection: submission queue is full");
}
