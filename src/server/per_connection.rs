use super::connection::handle_connection;
use super::{Dispatcher, ServerStats};
use crate::protocol::FileProtocol;
use anyhow::Result;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// One task per accepted connection
///
/// The `JoinSet` is the supervisor: it knows every live connection task so
/// shutdown can drain them. Without `max_connections` there is no bound on
/// live tasks other than host resources, which means the caller controls
/// the server's concurrency. With it, the accept loop waits on a counting
/// semaphore before spawning.
pub struct PerConnectionDispatcher {
    protocol: Arc<dyn FileProtocol>,
    stats: Arc<ServerStats>,
    limit: Option<Arc<Semaphore>>,
    tasks: JoinSet<()>,
    read_buffer_size: usize,
}

impl PerConnectionDispatcher {
    pub fn new(
        protocol: Arc<dyn FileProtocol>,
        stats: Arc<ServerStats>,
        max_connections: Option<usize>,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            protocol,
            stats,
            limit: max_connections.map(|max| Arc::new(Semaphore::new(max.max(1)))),
            tasks: JoinSet::new(),
            read_buffer_size,
        }
    }

    fn reap_finished(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Connection task ended abnormally");
            }
        }
    }
}

#[async_trait]
impl Dispatcher for PerConnectionDispatcher {
    async fn dispatch(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        self.reap_finished();

        let permit = match &self.limit {
            Some(limit) => Some(Arc::clone(limit).acquire_owned().await?),
            None => None,
        };

        let protocol = Arc::clone(&self.protocol);
        let stats = Arc::clone(&self.stats);
        let read_buffer_size = self.read_buffer_size;
        self.tasks.spawn(async move {
            let _permit = permit;
            handle_connection(stream, peer, protocol, &stats, read_buffer_size).await;
        });
        debug!(peer = %peer, live = self.tasks.len(), "Spawned connection task");
        Ok(())
    }

    async fn shutdown(mut self: Box<Self>, grace: Duration) -> Result<()> {
        info!(live = self.tasks.len(), "Draining connection tasks");
        let tasks = &mut self.tasks;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Connection task ended abnormally");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Shutdown grace period expired, aborting connection tasks"
            );
            self.tasks.shutdown().await;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "per-connection"
    }
}
