//! # Connection Workers
//!
//! The timed transfer loops that run once per connection.
//!
//! ## Send Mode (server)
//!
//! `SENDING -> Completed | PeerClosed | Failed`. While the shared start epoch
//! is younger than the configured duration, the worker flushes the whole
//! transfer buffer, resuming partial sends from the unsent offset. Duration is
//! only checked between flushes, so a blocked send is never interrupted by
//! expiry.
//!
//! ## Receive Mode (client)
//!
//! Receives into the transfer buffer until the duration elapses, the peer
//! closes, or a non-retryable error occurs. Elapsed time is taken at loop exit
//! rather than assumed to be the configured duration, so an early close by the
//! server is reflected in the reported rate.

use super::buffer::TransferBuffer;
use super::connection::Connection;
use super::zerocopy::{SendStrategy, ZeroCopyState};
use super::ConnectionId;
use crate::benchmark::{BenchmarkConfig, StartEpoch};
use crate::cli::SendMode;
use crate::metrics::{Summary, TransferStats};
use crate::utils::{format_bytes, format_duration, format_gbps};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of a single send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendProgress {
    /// This many bytes were accepted; zero means the peer closed
    Sent(usize),
    /// Transient condition; send the same chunk again
    Retry,
}

/// Outgoing side of a connection as seen by the send loop.
#[async_trait]
pub trait ChunkSink: Send {
    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<SendProgress>;

    /// Called after every fully flushed buffer.
    fn buffer_flushed(&mut self) {}
}

/// Incoming side of a connection as seen by the receive loop.
#[async_trait]
pub trait ChunkSource: Send {
    /// Receive up to `buf.len()` bytes; zero means orderly close.
    async fn recv_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// How a worker's loop ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// The duration elapsed
    Completed,
    /// The peer closed the connection in an orderly way
    PeerClosed,
    /// A non-retryable transport error ended the loop
    Failed(String),
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerExit::Completed => write!(f, "completed"),
            WorkerExit::PeerClosed => write!(f, "peer closed"),
            WorkerExit::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Outcome of flushing one whole buffer.
#[derive(Debug)]
pub enum FlushOutcome {
    Flushed,
    PeerClosed { sent: usize },
    Failed { sent: usize, error: io::Error },
}

/// Accounting of a finished transfer loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopResult {
    pub exit: WorkerExit,
    pub stats: TransferStats,
    /// Time since the start epoch at the moment the loop exited
    pub elapsed: Duration,
}

/// Send all of `payload`, resuming partial sends until every byte is accepted
/// or the connection ends.
pub async fn flush_buffer<S>(sink: &mut S, payload: &[u8]) -> FlushOutcome
where
    S: ChunkSink + ?Sized,
{
    let mut sent = 0;
    while sent < payload.len() {
        match sink.send_chunk(&payload[sent..]).await {
            Ok(SendProgress::Sent(0)) => return FlushOutcome::PeerClosed { sent },
            Ok(SendProgress::Sent(n)) => {
                debug_assert!(n <= payload.len() - sent);
                sent += n;
            }
            Ok(SendProgress::Retry) => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(error) => return FlushOutcome::Failed { sent, error },
        }
    }
    sink.buffer_flushed();
    FlushOutcome::Flushed
}

/// Flush `payload` repeatedly until `duration` has passed since `epoch`.
pub async fn run_send_loop<S>(
    sink: &mut S,
    payload: &[u8],
    duration: Duration,
    epoch: StartEpoch,
) -> LoopResult
where
    S: ChunkSink + ?Sized,
{
    let mut stats = TransferStats::new();
    let exit = loop {
        if epoch.has_elapsed(duration) {
            break WorkerExit::Completed;
        }
        match flush_buffer(sink, payload).await {
            FlushOutcome::Flushed => stats.record(payload.len()),
            FlushOutcome::PeerClosed { sent } => {
                stats.bytes += sent as u64;
                break WorkerExit::PeerClosed;
            }
            FlushOutcome::Failed { sent, error } => {
                stats.bytes += sent as u64;
                break WorkerExit::Failed(error.to_string());
            }
        }
    };
    LoopResult {
        exit,
        stats,
        elapsed: epoch.elapsed(),
    }
}

/// Receive into `buf` until `duration` has passed since `epoch`.
pub async fn run_receive_loop<S>(
    source: &mut S,
    buf: &mut [u8],
    duration: Duration,
    epoch: StartEpoch,
) -> LoopResult
where
    S: ChunkSource + ?Sized,
{
    let mut stats = TransferStats::new();
    let exit = loop {
        if epoch.has_elapsed(duration) {
            break WorkerExit::Completed;
        }
        match source.recv_chunk(buf).await {
            Ok(0) => break WorkerExit::PeerClosed,
            Ok(n) => stats.record(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Receive failed: {}", e);
                break WorkerExit::Failed(e.to_string());
            }
        }
    };
    LoopResult {
        exit,
        stats,
        elapsed: epoch.elapsed(),
    }
}

/// Per-connection result of a server worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub exit: WorkerExit,
    /// Zero-copy state when the worker finished
    pub zero_copy: ZeroCopyState,
    pub summary: Summary,
}

/// Server worker: stream `buffer` over `conn` for the configured duration.
///
/// The connection is shut down and closed before the report is returned,
/// whichever way the loop ended.
pub async fn send_worker(
    conn: Connection,
    buffer: TransferBuffer,
    config: Arc<BenchmarkConfig>,
    mode: SendMode,
    epoch: StartEpoch,
) -> WorkerReport {
    let mut strategy = SendStrategy::new(conn, mode);
    let id = strategy.path().id();
    let peer = strategy.path().peer();
    debug!(
        "Worker {} streaming to {} ({} mode, zero-copy {:?})",
        id,
        peer,
        mode,
        strategy.state()
    );

    let result = run_send_loop(&mut strategy, buffer.as_slice(), config.duration, epoch).await;
    let zero_copy = strategy.state();
    if strategy.completions() > 0 {
        debug!("Reaped {} zero-copy completions", strategy.completions());
    }
    drop(strategy);

    let summary = result.stats.finalize(result.elapsed);
    match &result.exit {
        WorkerExit::Failed(reason) => warn!(
            "Worker {} stopped after {}: {}",
            id,
            format_bytes(summary.bytes),
            reason
        ),
        exit => info!(
            "Worker {} {}: {} in {} ({})",
            id,
            exit,
            format_bytes(summary.bytes),
            format_duration(result.elapsed),
            format_gbps(summary.gbps)
        ),
    }

    WorkerReport {
        id,
        peer,
        exit: result.exit,
        zero_copy,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Accepts at most `max_chunk` bytes per call and records every byte.
    struct TrickleSink {
        max_chunk: usize,
        script: VecDeque<io::Result<SendProgress>>,
        received: Vec<u8>,
        flushes: usize,
        delay: Option<Duration>,
    }

    impl TrickleSink {
        fn new(max_chunk: usize) -> Self {
            Self {
                max_chunk,
                script: VecDeque::new(),
                received: Vec::new(),
                flushes: 0,
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ChunkSink for TrickleSink {
        async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<SendProgress> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(scripted) = self.script.pop_front() {
                return scripted;
            }
            let n = chunk.len().min(self.max_chunk);
            self.received.extend_from_slice(&chunk[..n]);
            Ok(SendProgress::Sent(n))
        }

        fn buffer_flushed(&mut self) {
            self.flushes += 1;
        }
    }

    struct ScriptedSource {
        script: VecDeque<io::Result<usize>>,
        delay: Duration,
    }

    #[async_trait]
    impl ChunkSource for ScriptedSource {
        async fn recv_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            tokio::time::sleep(self.delay).await;
            match self.script.pop_front() {
                Some(Ok(n)) => Ok(n.min(buf.len())),
                Some(Err(e)) => Err(e),
                None => Ok(buf.len()),
            }
        }
    }

    #[tokio::test]
    async fn test_partial_sends_are_resumed() {
        let payload: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let mut sink = TrickleSink::new(7);

        let outcome = flush_buffer(&mut sink, &payload).await;
        assert!(matches!(outcome, FlushOutcome::Flushed));
        assert_eq!(sink.received, payload);
        assert_eq!(sink.flushes, 1);
    }

    #[tokio::test]
    async fn test_retry_and_interrupt_do_not_skip_bytes() {
        let payload = vec![3u8; 64];
        let mut sink = TrickleSink::new(16);
        sink.script = VecDeque::from([
            Ok(SendProgress::Retry),
            Err(io::ErrorKind::Interrupted.into()),
            Ok(SendProgress::Retry),
        ]);

        let outcome = flush_buffer(&mut sink, &payload).await;
        assert!(matches!(outcome, FlushOutcome::Flushed));
        assert_eq!(sink.received.len(), 64);
    }

    #[tokio::test]
    async fn test_zero_length_send_is_peer_close() {
        let mut sink = TrickleSink::new(10);
        sink.script = VecDeque::from([Ok(SendProgress::Sent(10)), Ok(SendProgress::Sent(0))]);

        let outcome = flush_buffer(&mut sink, &[0u8; 100]).await;
        assert!(matches!(outcome, FlushOutcome::PeerClosed { sent: 10 }));
        assert_eq!(sink.flushes, 0);
    }

    #[tokio::test]
    async fn test_send_loop_stops_at_duration() {
        let mut sink = TrickleSink::new(usize::MAX);
        sink.delay = Some(Duration::from_millis(5));
        let duration = Duration::from_millis(100);

        let result = run_send_loop(&mut sink, &[1u8; 32], duration, StartEpoch::now()).await;
        assert_eq!(result.exit, WorkerExit::Completed);
        assert!(result.elapsed >= duration);
        assert!(result.elapsed < duration + Duration::from_millis(500));
        assert!(result.stats.messages > 0);
        assert_eq!(result.stats.bytes, result.stats.messages * 32);
        assert_eq!(sink.flushes as u64, result.stats.messages);
    }

    #[tokio::test]
    async fn test_send_loop_error_exit_keeps_partial_bytes() {
        let mut sink = TrickleSink::new(usize::MAX);
        sink.script = VecDeque::from([
            Ok(SendProgress::Sent(32)),
            Ok(SendProgress::Sent(12)),
            Err(io::Error::from_raw_os_error(libc::EPIPE)),
        ]);

        let result =
            run_send_loop(&mut sink, &[0u8; 32], Duration::from_secs(30), StartEpoch::now()).await;
        assert!(matches!(result.exit, WorkerExit::Failed(_)));
        assert_eq!(result.stats.messages, 1);
        assert_eq!(result.stats.bytes, 44);
        assert!(result.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_send_loop_expired_epoch_sends_nothing() {
        let epoch = StartEpoch::now();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut sink = TrickleSink::new(usize::MAX);
        let result = run_send_loop(&mut sink, &[0u8; 8], Duration::from_millis(10), epoch).await;
        assert_eq!(result.exit, WorkerExit::Completed);
        assert_eq!(result.stats, TransferStats::default());
        assert!(sink.received.is_empty());
    }

    #[tokio::test]
    async fn test_receive_loop_peer_close_ends_early() {
        let mut source = ScriptedSource {
            script: VecDeque::from([Ok(100), Ok(50), Ok(0)]),
            delay: Duration::from_millis(1),
        };
        let mut buf = vec![0u8; 128];

        let result =
            run_receive_loop(&mut source, &mut buf, Duration::from_secs(30), StartEpoch::now())
                .await;
        assert_eq!(result.exit, WorkerExit::PeerClosed);
        assert_eq!(result.stats.bytes, 150);
        assert_eq!(result.stats.messages, 2);
        assert!(result.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_receive_loop_retries_interrupts_and_stops_on_errors() {
        let mut source = ScriptedSource {
            script: VecDeque::from([
                Ok(10),
                Err(io::ErrorKind::Interrupted.into()),
                Ok(10),
                Err(io::ErrorKind::ConnectionReset.into()),
            ]),
            delay: Duration::ZERO,
        };
        let mut buf = vec![0u8; 64];

        let result =
            run_receive_loop(&mut source, &mut buf, Duration::from_secs(30), StartEpoch::now())
                .await;
        assert!(matches!(result.exit, WorkerExit::Failed(_)));
        assert_eq!(result.stats.bytes, 20);
        assert_eq!(result.stats.messages, 2);
    }

    #[tokio::test]
    async fn test_receive_loop_runs_for_duration() {
        let mut source = ScriptedSource {
            script: VecDeque::new(),
            delay: Duration::from_millis(2),
        };
        let mut buf = vec![0u8; 16];
        let duration = Duration::from_millis(80);

        let result = run_receive_loop(&mut source, &mut buf, duration, StartEpoch::now()).await;
        assert_eq!(result.exit, WorkerExit::Completed);
        assert!(result.elapsed >= duration);
        assert_eq!(result.stats.bytes, result.stats.messages * 16);
    }

    #[test]
    fn test_worker_exit_display() {
        assert_eq!(WorkerExit::Completed.to_string(), "completed");
        assert_eq!(WorkerExit::PeerClosed.to_string(), "peer closed");
        assert_eq!(
            WorkerExit::Failed("Broken pipe".into()).to_string(),
            "failed: Broken pipe"
        );
    }
}
