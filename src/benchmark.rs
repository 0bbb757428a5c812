//! # Run Configuration
//!
//! Immutable configuration derived once from validated command-line input, and
//! the shared start epoch every worker of a run measures elapsed time against.
//!
//! ## Timing Model
//!
//! The server captures one [`StartEpoch`] before it begins accepting, and all
//! workers compare against that same instant. Late connections therefore get
//! a shorter window instead of shifting the whole run: the transfers of all
//! clients overlap inside one synchronized time window.

use crate::{
    cli::{ClientArgs, SendMode, ServerArgs},
    error::BenchError,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Parameters shared read-only by every worker of a run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Size of the transfer buffer in bytes; one send or receive call each
    pub message_size: usize,

    /// Wall-clock length of the transfer window
    pub duration: Duration,

    /// Optional SO_SNDBUF / SO_RCVBUF override for each connection
    pub socket_buffer_size: Option<usize>,
}

impl BenchmarkConfig {
    pub fn new(message_size: usize, duration: Duration) -> Result<Self, BenchError> {
        if message_size == 0 {
            return Err(BenchError::InvalidArgs(
                "message size must be greater than zero".to_string(),
            ));
        }
        if duration.is_zero() {
            return Err(BenchError::InvalidArgs(
                "duration must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            message_size,
            duration,
            socket_buffer_size: None,
        })
    }

    pub fn with_socket_buffer_size(mut self, size: Option<usize>) -> Self {
        self.socket_buffer_size = size;
        self
    }
}

/// Server-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub benchmark: BenchmarkConfig,

    /// Listening address; port 0 picks an ephemeral port
    pub bind: SocketAddr,

    /// Exact number of connections to accept
    pub num_clients: usize,

    pub send_mode: SendMode,
}

impl ServerConfig {
    pub fn new(
        benchmark: BenchmarkConfig,
        bind: SocketAddr,
        num_clients: usize,
        send_mode: SendMode,
    ) -> Result<Self, BenchError> {
        if num_clients == 0 {
            return Err(BenchError::InvalidArgs(
                "client count must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            benchmark,
            bind,
            num_clients,
            send_mode,
        })
    }

    pub fn from_args(args: &ServerArgs) -> Result<Self, BenchError> {
        let benchmark = BenchmarkConfig::new(args.msg_size, Duration::from_secs(args.duration_sec))?
            .with_socket_buffer_size(args.socket_buffer_size);
        Self::new(
            benchmark,
            SocketAddr::new(args.bind, args.port),
            args.num_clients,
            args.send_mode,
        )
    }
}

/// Client-side configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub benchmark: BenchmarkConfig,
    pub server: SocketAddr,
}

impl ClientConfig {
    pub fn new(benchmark: BenchmarkConfig, server: SocketAddr) -> Self {
        Self { benchmark, server }
    }

    pub fn from_args(args: &ClientArgs) -> Result<Self, BenchError> {
        let benchmark = BenchmarkConfig::new(args.msg_size, Duration::from_secs(args.duration_sec))?
            .with_socket_buffer_size(args.socket_buffer_size);
        Ok(Self::new(benchmark, SocketAddr::new(args.server_ip, args.port)))
    }
}

/// The single monotonic origin of a run's time window.
#[derive(Clone, Copy, Debug)]
pub struct StartEpoch(Instant);

impl StartEpoch {
    pub fn now() -> Self {
        Self(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }

    /// True once `window` has passed since the epoch.
    pub fn has_elapsed(&self, window: Duration) -> bool {
        self.elapsed() >= window
    }
}

/// The informational line the server prints before it starts accepting.
pub struct ServerBanner<'a> {
    pub config: &'a ServerConfig,
    pub local_addr: SocketAddr,
}

impl<'a> std::fmt::Display for ServerBanner<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[Server] listening on port {} | msg_size={} | duration={}s | clients={} | mode={}",
            self.local_addr.port(),
            self.config.benchmark.message_size,
            self.config.benchmark.duration.as_secs(),
            self.config.num_clients,
            self.config.send_mode
        )
    }
}
