//! # TCP Stream Benchmark Library
//!
//! A one-directional TCP bandwidth benchmark: a server streams a fixed-size
//! payload to a set of clients for a fixed duration, and each client reports
//! how many bytes it received and at what rate.
//!
//! ## Roles
//!
//! - **Server** (`stream-server`): accepts exactly the configured number of
//!   connections and runs one worker task per connection. All workers share
//!   a single start epoch taken before the first accept, so every stream is
//!   timed against the same window. The payload is pushed either with plain
//!   copying sends or with `MSG_ZEROCOPY`, falling back to copying sends when
//!   the kernel rejects zero-copy.
//! - **Client** (`stream-client`): connects, receives until the duration has
//!   elapsed or the server closes, and prints one `SUMMARY` line on stdout.
//!
//! ## Architecture Overview
//!
//! - `benchmark`: run configuration, the shared start epoch and the banner
//! - `cli`: argument parsing for both binaries
//! - `net`: the connection handle, transfer buffer, send strategies and loops
//! - `server`: listener setup and the accept-dispatch-join lifecycle
//! - `client`: connection setup and the receive run
//! - `metrics`: byte and message accounting and the `SUMMARY` record
//! - `results`: optional JSON output of a run
//! - `logging`: colored stderr logging with an optional log file
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tcp_stream_bench::{BenchmarkConfig, SendMode, ServerConfig, StreamServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let benchmark = BenchmarkConfig::new(64 * 1024, Duration::from_secs(10))?;
//!     let config = ServerConfig::new(benchmark, "0.0.0.0:5201".parse()?, 4, SendMode::ZeroCopy)?;
//!
//!     let server = StreamServer::bind(config)?;
//!     println!("{}", server.banner());
//!     let report = server.run().await;
//!     println!("{}", report.aggregate);
//!     Ok(())
//! }
//! ```

/// Run configuration, start epoch and server banner
pub mod benchmark;

/// Command-line interface shared by the two binaries
pub mod cli;

/// Receive side of the benchmark
pub mod client;

pub mod error;

pub mod logging;

/// Transfer accounting and the `SUMMARY` record
pub mod metrics;

/// Connection plumbing and per-connection transfer loops
pub mod net;

/// JSON output of a finished run
pub mod results;

/// Send side of the benchmark
///
/// Binds the listener, dispatches accepted connections to worker tasks and
/// joins every worker before reporting.
pub mod server;

pub mod utils;

pub use benchmark::{BenchmarkConfig, ClientConfig, ServerConfig, StartEpoch};
pub use cli::{ClientArgs, LogArgs, SendMode, ServerArgs};
pub use client::{ClientReport, StreamClient};
pub use error::BenchError;
pub use metrics::{AggregateSummary, Summary, TransferStats};
pub use results::{RunRecord, SystemInfo};
pub use server::{DispatchReport, DispatchStop, StreamServer};

/// The current version of the benchmark
///
/// Populated from Cargo.toml and recorded in JSON results.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Address the server binds to when `--bind` is not given
    pub const BIND_ADDRESS: &str = "0.0.0.0";

    /// Pending-connection queue length of the listening socket
    pub const LISTEN_BACKLOG: u32 = 128;
}
