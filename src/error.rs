//! # Setup Error Taxonomy
//!
//! Errors that abort a run before any data is transferred. Everything that can
//! go wrong after a connection exists (peer close, reset, broken pipe, a denied
//! zero-copy send) is recovered inside the owning worker and reported through
//! [`crate::net::WorkerExit`] instead.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Fatal setup failures for the server and client binaries.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("socket: {0}")]
    Socket(#[source] io::Error),

    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen: {0}")]
    Listen(#[source] io::Error),

    #[error("connect {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to allocate a {size} byte transfer buffer")]
    Allocation { size: usize },

    #[error("failed to write results: {0}")]
    Output(#[source] io::Error),
}

impl BenchError {
    /// Process exit code for this failure.
    ///
    /// Connect failures are distinguishable from every other setup failure so
    /// scripts driving the client can tell "server not up yet" apart from a
    /// local misconfiguration.
    pub fn exit_code(&self) -> u8 {
        match self {
            BenchError::Connect { .. } => 2,
            _ => 1,
        }
    }
}
