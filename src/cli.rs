use clap::{ArgAction, Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// TCP stream server - accepts a fixed number of clients and streams a payload to each
#[derive(Parser, Debug, Clone)]
#[clap(name = "stream-server", version, about, long_about = None)]
pub struct ServerArgs {
    /// TCP port to listen on
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Payload size in bytes written per send
    #[clap(value_parser = parse_positive)]
    pub msg_size: usize,

    /// Seconds to stream, measured from the moment the server starts accepting
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub duration_sec: u64,

    /// Number of client connections to accept before the listener is closed
    #[clap(value_parser = parse_positive)]
    pub num_clients: usize,

    /// Transmission path for the payload
    #[clap(long, value_enum, default_value_t = SendMode::ZeroCopy)]
    pub send_mode: SendMode,

    /// Local address to bind the listener to
    #[clap(long, default_value = crate::defaults::BIND_ADDRESS)]
    pub bind: IpAddr,

    /// SO_SNDBUF / SO_RCVBUF size applied to every accepted connection
    #[clap(long)]
    pub socket_buffer_size: Option<usize>,

    /// Write the run record to this file as JSON
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    #[clap(flatten)]
    pub log: LogArgs,
}

/// TCP stream client - receives from a stream server and reports throughput
#[derive(Parser, Debug, Clone)]
#[clap(name = "stream-client", version, about, long_about = None)]
pub struct ClientArgs {
    /// Address of the stream server
    pub server_ip: IpAddr,

    /// Port of the stream server
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Receive buffer size in bytes
    #[clap(value_parser = parse_positive)]
    pub msg_size: usize,

    /// Seconds to receive for
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub duration_sec: u64,

    /// SO_SNDBUF / SO_RCVBUF size applied before connecting
    #[clap(long)]
    pub socket_buffer_size: Option<usize>,

    /// Write the run record to this file as JSON
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    #[clap(flatten)]
    pub log: LogArgs,
}

/// Logging switches shared by both binaries
#[derive(clap::Args, Debug, Clone, Default)]
pub struct LogArgs {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG takes precedence
    #[clap(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors
    #[clap(short = 'q', long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Also write logs to this file
    #[clap(long)]
    pub log_file: Option<PathBuf>,
}

/// How the server pushes the payload into the kernel
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Plain copying send
    #[clap(name = "copy")]
    Copy,

    /// sendmsg with MSG_ZEROCOPY, falling back to copy when unavailable
    #[clap(name = "zerocopy")]
    ZeroCopy,
}

impl std::fmt::Display for SendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendMode::Copy => write!(f, "copy"),
            SendMode::ZeroCopy => write!(f, "zerocopy"),
        }
    }
}

/// Parse a strictly positive integer.
fn parse_positive(s: &str) -> Result<usize, String> {
    let value: usize = s
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a positive integer", s))?;
    if value == 0 {
        return Err("value must be greater than zero".to_string());
    }
    Ok(value)
}

/// Parse process arguments, mapping usage errors to exit code 1.
///
/// Help and version output are not failures and map to exit code 0.
pub fn parse_from_env<T: Parser>() -> Result<T, u8> {
    T::try_parse().map_err(|e| {
        let _ = e.print();
        if e.use_stderr() {
            1
        } else {
            0
        }
    })
}
