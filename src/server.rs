//! # Stream Server
//!
//! Setup of the listening socket and the accept-dispatch loop.
//!
//! ## Dispatch Lifecycle
//!
//! 1. **Epoch**: one [`StartEpoch`] is captured before the first accept.
//! 2. **Accept**: up to `num_clients` connections are accepted one after the
//!    other; each gets its own transfer buffer and its own worker task.
//! 3. **Close**: once the loop ends, the listener is dropped so no further
//!    connections can arrive.
//! 4. **Join**: every spawned worker is awaited before the report is returned.
//!
//! An accept failure, or a failed buffer allocation for a fresh connection,
//! ends the accept phase early. Workers that are already streaming keep going
//! and are still joined; the run degrades to the connections obtained so far.

use crate::{
    benchmark::{ServerBanner, ServerConfig, StartEpoch},
    defaults,
    error::BenchError,
    metrics::AggregateSummary,
    net::{worker::send_worker, Connection, ConnectionId, TransferBuffer, WorkerReport},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Source of incoming connections for the dispatch loop.
#[async_trait]
pub trait Acceptor: Send {
    async fn accept_connection(&mut self) -> io::Result<(TcpStream, SocketAddr)>;
}

#[async_trait]
impl Acceptor for TcpListener {
    async fn accept_connection(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        let listener: &TcpListener = self;
        listener.accept().await
    }
}

/// Why the accept phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStop {
    /// Every configured connection was accepted
    AllAccepted,
    /// `accept` failed with a non-retryable error
    AcceptFailed(String),
    /// A worker could not be provisioned for a fresh connection
    SpawnFailed(String),
}

/// Outcome of a server run, returned after all workers were joined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchReport {
    /// Connections the run was configured for
    pub configured: usize,
    /// Connections that were handed to a worker
    pub attempted: usize,
    pub stop: DispatchStop,
    /// Joined worker reports, ordered by connection id
    pub workers: Vec<WorkerReport>,
    pub aggregate: AggregateSummary,
}

impl DispatchReport {
    pub fn is_partial(&self) -> bool {
        self.attempted < self.configured
    }
}

/// A bound, listening stream server.
pub struct StreamServer<A = TcpListener> {
    config: ServerConfig,
    acceptor: A,
    local_addr: SocketAddr,
}

impl StreamServer<TcpListener> {
    /// Create, bind and listen on the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(config: ServerConfig) -> Result<Self, BenchError> {
        let socket = if config.bind.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(BenchError::Socket)?;
        socket.set_reuseaddr(true).map_err(BenchError::Socket)?;
        socket.bind(config.bind).map_err(|source| BenchError::Bind {
            addr: config.bind,
            source,
        })?;
        let listener = socket.listen(defaults::LISTEN_BACKLOG).map_err(BenchError::Listen)?;
        let local_addr = listener.local_addr().map_err(BenchError::Listen)?;

        debug!("Stream server listening on {}", local_addr);
        Ok(Self::with_acceptor(config, listener, local_addr))
    }
}

impl<A: Acceptor> StreamServer<A> {
    pub fn with_acceptor(config: ServerConfig, acceptor: A, local_addr: SocketAddr) -> Self {
        Self {
            config,
            acceptor,
            local_addr,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn banner(&self) -> ServerBanner<'_> {
        ServerBanner {
            config: &self.config,
            local_addr: self.local_addr,
        }
    }

    /// Accept up to the configured number of connections, stream to each,
    /// and return once every worker has finished.
    pub async fn run(self) -> DispatchReport {
        let Self {
            config,
            mut acceptor,
            ..
        } = self;
        let benchmark = Arc::new(config.benchmark.clone());
        let epoch = StartEpoch::now();

        let mut workers = JoinSet::new();
        let mut attempted = 0usize;
        let mut stop = DispatchStop::AllAccepted;

        while attempted < config.num_clients {
            let (stream, peer) = match accept_retrying(&mut acceptor).await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(
                        "accept failed after {} of {} connections: {}",
                        attempted, config.num_clients, e
                    );
                    stop = DispatchStop::AcceptFailed(e.to_string());
                    break;
                }
            };

            let id = attempted as ConnectionId + 1;
            let conn = Connection::new(id, stream, peer);
            let buffer = match TransferBuffer::payload(benchmark.message_size) {
                Ok(buffer) => buffer,
                Err(e) => {
                    error!("Cannot start worker for {}: {}", peer, e);
                    drop(conn);
                    stop = DispatchStop::SpawnFailed(e.to_string());
                    break;
                }
            };
            if let Some(size) = benchmark.socket_buffer_size {
                if let Err(e) = conn.set_buffer_sizes(size) {
                    warn!("Failed to set socket buffer size on connection {}: {}", id, e);
                }
            }

            info!("Accepted connection {} from {}", id, peer);
            let span = info_span!("conn", id, %peer);
            workers.spawn(
                send_worker(conn, buffer, benchmark.clone(), config.send_mode, epoch)
                    .instrument(span),
            );
            attempted += 1;
        }

        // No further connections once the accept phase is over.
        drop(acceptor);
        debug!("Listener closed; joining {} workers", attempted);

        let mut reports = Vec::with_capacity(attempted);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }
        reports.sort_by_key(|report| report.id);

        let aggregate = AggregateSummary::from_workers(reports.iter().map(|r| &r.summary));
        if attempted < config.num_clients {
            warn!(
                "Run degraded to {} of {} connections",
                attempted, config.num_clients
            );
        }
        info!("All workers finished: {}", aggregate);

        DispatchReport {
            configured: config.num_clients,
            attempted,
            stop,
            workers: reports,
            aggregate,
        }
    }
}

/// Accept one connection, retrying interrupted calls.
async fn accept_retrying<A: Acceptor + ?Sized>(
    acceptor: &mut A,
) -> io::Result<(TcpStream, SocketAddr)> {
    loop {
        match acceptor.accept_connection().await {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                debug!("accept interrupted, retrying");
                continue;
            }
            accepted => return accepted,
        }
    }
}
