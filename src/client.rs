//! # Stream Client
//!
//! Connects to a stream server, receives for the configured duration and
//! reports a one-line summary. The client never sends payload data.
//!
//! The time window starts when the connection is established. If the server
//! closes early, the loop stops at that point and the reported duration is the
//! time actually spent receiving.

use crate::{
    benchmark::{ClientConfig, StartEpoch},
    error::BenchError,
    metrics::Summary,
    net::{worker::run_receive_loop, Connection, TransferBuffer, WorkerExit},
    utils::{format_bytes, format_duration, format_gbps},
};
use serde::{Deserialize, Serialize};
use socket2::SockRef;
use std::net::SocketAddr;
use tokio::net::TcpSocket;
use tracing::{debug, info, warn};

/// Result of one client run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientReport {
    pub server: SocketAddr,
    pub exit: WorkerExit,
    pub summary: Summary,
}

/// A client connected to a stream server, ready to receive.
#[derive(Debug)]
pub struct StreamClient {
    config: ClientConfig,
    conn: Connection,
    buffer: TransferBuffer,
    epoch: StartEpoch,
}

impl StreamClient {
    /// Open the connection and allocate the receive buffer.
    ///
    /// ## Errors
    /// - [`BenchError::Socket`] if the socket cannot be created
    /// - [`BenchError::Connect`] if the server cannot be reached
    /// - [`BenchError::Allocation`] if the receive buffer cannot be allocated
    pub async fn connect(config: ClientConfig) -> Result<Self, BenchError> {
        let socket = if config.server.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(BenchError::Socket)?;

        if let Some(size) = config.benchmark.socket_buffer_size {
            let sock = SockRef::from(&socket);
            if let Err(e) = sock
                .set_recv_buffer_size(size)
                .and_then(|_| sock.set_send_buffer_size(size))
            {
                warn!("Failed to set socket buffer size to {}: {}", size, e);
            }
        }

        let stream = socket
            .connect(config.server)
            .await
            .map_err(|source| BenchError::Connect {
                addr: config.server,
                source,
            })?;
        let epoch = StartEpoch::now();
        debug!("Connected to {}", config.server);

        let buffer = TransferBuffer::try_new(config.benchmark.message_size, 0)?;
        let conn = Connection::new(1, stream, config.server);

        Ok(Self {
            config,
            conn,
            buffer,
            epoch,
        })
    }

    pub fn server(&self) -> SocketAddr {
        self.config.server
    }

    /// Receive until the duration elapses or the server goes away.
    pub async fn run(self) -> ClientReport {
        let Self {
            config,
            mut conn,
            mut buffer,
            epoch,
        } = self;

        let result = run_receive_loop(
            &mut conn,
            buffer.as_mut_slice(),
            config.benchmark.duration,
            epoch,
        )
        .await;
        drop(conn);

        let summary = result.stats.finalize(result.elapsed);
        info!(
            "Received {} from {} in {} ({}, {})",
            format_bytes(summary.bytes),
            config.server,
            format_duration(result.elapsed),
            format_gbps(summary.gbps),
            result.exit
        );

        ClientReport {
            server: config.server,
            exit: result.exit,
            summary,
        }
    }
}
