use super::connection::handle_connection;
use super::queue::{next_job, reject_busy, work_queue, Job, QueueSender, SharedReceiver};
use super::{Dispatcher, ProtocolFactory, ServerStats};
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A fixed set of long-lived workers drawing connections from one queue
///
/// Each worker builds its own codec once at startup and reuses it for every
/// connection it serves. A worker owns at most one connection at a time, so
/// at most `pool_size` connections are ever being served; the rest wait in
/// the submission queue.
pub struct WorkerPoolDispatcher {
    queue: Option<QueueSender>,
    workers: Vec<JoinHandle<()>>,
    stats: Arc<ServerStats>,
}

impl WorkerPoolDispatcher {
    pub fn new(
        pool_size: usize,
        queue_capacity: Option<usize>,
        protocol_factory: ProtocolFactory,
        stats: Arc<ServerStats>,
        read_buffer_size: usize,
    ) -> Self {
        let (queue, receiver) = work_queue(queue_capacity);
        let workers = (0..pool_size.max(1))
            .map(|slot| {
                tokio::spawn(run_worker(
                    slot,
                    Arc::clone(&receiver),
                    Arc::clone(&protocol_factory),
                    Arc::clone(&stats),
                    read_buffer_size,
                ))
            })
            .collect();

        info!(pool_size, ?queue_capacity, "Worker pool started");
        Self {
            queue: Some(queue),
            workers,
            stats,
        }
    }
}

async fn run_worker(
    slot: usize,
    receiver: SharedReceiver,
    protocol_factory: ProtocolFactory,
    stats: Arc<ServerStats>,
    read_buffer_size: usize,
) {
    let protocol = protocol_factory();
    debug!(slot, "Worker ready");

    while let Some(job) = next_job(&receiver).await {
        stats.record_dequeued();
        handle_connection(job.stream, job.peer, Arc::clone(&protocol), &stats, read_buffer_size).await;
    }
    debug!(slot, "Worker exiting");
}

#[async_trait]
impl Dispatcher for WorkerPoolDispatcher {
    async fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let Some(queue) = &self.queue else {
            anyhow::bail!("worker pool is shut down");
        };

        match queue.submit(Job::new(stream, peer)) {
            Ok(()) => self.stats.record_enqueued(),
            Err(job) => {
                self.stats.record_rejected();
                tokio::spawn(reject_busy(job));
            }
        }
        Ok(())
    }

    async fn shutdown(mut self: Box<Self>, grace: Duration) -> Result<()> {
        // Closing the queue lets workers finish what is queued, then exit.
        self.queue.take();
        info!(workers = self.workers.len(), "Draining worker pool");

        let workers = &mut self.workers;
        let drained = tokio::time::timeout(grace, async {
            for worker in workers.iter_mut() {
                if let Err(e) = worker.await {
                    warn!(error = %e, "Worker ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!("Shutdown grace period expired, aborting workers");
            for worker in &self.workers {
                worker.abort();
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "worker-pool"
    }
}
