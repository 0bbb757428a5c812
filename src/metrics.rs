//! # Transfer Statistics
//!
//! Byte and message accounting for a single connection, and the derivation of
//! the throughput / latency figures printed at the end of a run.
//!
//! ## Latency Approximation
//!
//! The payload carries no send-side timestamp, so a true one-way delay cannot
//! be measured. The reported `avg_oneway_us` is the mean inter-arrival time of
//! receive calls (`elapsed / messages`). Results stay comparable with earlier
//! runs of the same tool only as long as this definition is kept.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Running byte/message counters for one worker.
///
/// Counters only grow; a finished worker converts them into a [`Summary`]
/// once, together with the elapsed time measured at loop exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub bytes: u64,
    pub messages: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed transfer call of `len` bytes.
    pub fn record(&mut self, len: usize) {
        self.bytes += len as u64;
        self.messages += 1;
    }

    /// Finalize the counters against the time the worker actually ran.
    pub fn finalize(self, elapsed: Duration) -> Summary {
        Summary::new(self.bytes, elapsed.as_secs_f64(), self.messages)
    }
}

/// Throughput in Gbit/s. Zero when no time has elapsed.
pub fn throughput_gbps(bytes: u64, seconds: f64) -> f64 {
    if seconds > 0.0 {
        (bytes as f64 * 8.0) / (seconds * 1e9)
    } else {
        0.0
    }
}

/// Mean inter-arrival time in microseconds, used as the one-way delay proxy.
pub fn avg_oneway_us(seconds: f64, messages: u64) -> f64 {
    if messages > 0 && seconds > 0.0 {
        (seconds / messages as f64) * 1e6
    } else {
        0.0
    }
}

/// Final per-connection result.
///
/// The `Display` impl renders the machine-readable line consumed by the
/// plotting scripts:
///
/// ```text
/// SUMMARY bytes=<i64> seconds=<f> gbps=<f> msgs=<i64> avg_oneway_us=<f>
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub bytes: u64,
    pub seconds: f64,
    pub gbps: f64,
    pub messages: u64,
    pub avg_oneway_us: f64,
}

impl Summary {
    pub fn new(bytes: u64, seconds: f64, messages: u64) -> Self {
        Self {
            bytes,
            seconds,
            gbps: throughput_gbps(bytes, seconds),
            messages,
            avg_oneway_us: avg_oneway_us(seconds, messages),
        }
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SUMMARY bytes={} seconds={:.6} gbps={:.6} msgs={} avg_oneway_us={:.3}",
            self.bytes, self.seconds, self.gbps, self.messages, self.avg_oneway_us
        )
    }
}

/// Error returned when a line is not a well-formed `SUMMARY` record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed SUMMARY line: {0}")]
pub struct ParseSummaryError(String);

impl FromStr for Summary {
    type Err = ParseSummaryError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("SUMMARY") {
            return Err(ParseSummaryError("missing SUMMARY tag".to_string()));
        }

        Ok(Self {
            bytes: parse_field(&mut fields, "bytes")?,
            seconds: parse_field(&mut fields, "seconds")?,
            gbps: parse_field(&mut fields, "gbps")?,
            messages: parse_field(&mut fields, "msgs")?,
            avg_oneway_us: parse_field(&mut fields, "avg_oneway_us")?,
        })
    }
}

/// Parse the next `key=value` field, requiring the keys in order.
fn parse_field<'a, T, I>(fields: &mut I, key: &str) -> Result<T, ParseSummaryError>
where
    T: FromStr,
    I: Iterator<Item = &'a str>,
{
    fields
        .next()
        .and_then(|field| field.strip_prefix(key))
        .and_then(|rest| rest.strip_prefix('='))
        .and_then(|value| value.parse().ok())
        .ok_or_else(|| ParseSummaryError(key.to_string()))
}

/// Combined view over every server worker of one run.
///
/// Workers share one start epoch, so the run window is the longest worker
/// elapsed time and `total_gbps` is total bytes over that window.
/// `sum_client_gbps` adds up each connection's own rate, the figure the
/// plotting scripts report; it exceeds `total_gbps` when connections ran
/// for different lengths of time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub connections: usize,
    pub total_bytes: u64,
    pub total_messages: u64,
    pub window_seconds: f64,
    pub total_gbps: f64,
    pub sum_client_gbps: f64,
}

impl AggregateSummary {
    pub fn from_workers<'a, I>(workers: I) -> Self
    where
        I: IntoIterator<Item = &'a Summary>,
    {
        let mut aggregate = Self::default();
        for summary in workers {
            aggregate.connections += 1;
            aggregate.total_bytes += summary.bytes;
            aggregate.total_messages += summary.messages;
            aggregate.window_seconds = aggregate.window_seconds.max(summary.seconds);
            aggregate.sum_client_gbps += summary.gbps;
        }
        aggregate.total_gbps = throughput_gbps(aggregate.total_bytes, aggregate.window_seconds);
        aggregate
    }
}

impl fmt::Display for AggregateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connections={} bytes={} seconds={:.6} gbps={:.6} sum_gbps={:.6} msgs={}",
            self.connections,
            self.total_bytes,
            self.window_seconds,
            self.total_gbps,
            self.sum_client_gbps,
            self.total_messages
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_gigabit() {
        let summary = Summary::new(125_000_000, 1.0, 1000);
        assert!((summary.gbps - 1.0).abs() < 1e-12);
        assert_eq!(
            summary.to_string(),
            "SUMMARY bytes=125000000 seconds=1.000000 gbps=1.000000 msgs=1000 avg_oneway_us=1000.000"
        );
    }

    #[test]
    fn test_zero_messages() {
        let summary = Summary::new(0, 2.0, 0);
        assert_eq!(summary.avg_oneway_us, 0.0);
        assert_eq!(summary.gbps, 0.0);
        assert!(summary.to_string().ends_with("msgs=0 avg_oneway_us=0.000"));
    }

    #[test]
    fn test_zero_elapsed_is_not_a_division() {
        assert_eq!(throughput_gbps(1024, 0.0), 0.0);
        assert_eq!(avg_oneway_us(0.0, 10), 0.0);
        assert_eq!(avg_oneway_us(-1.0, 10), 0.0);
    }

    #[test]
    fn test_transfer_stats_record_and_finalize() {
        let mut stats = TransferStats::new();
        stats.record(1024);
        stats.record(512);
        stats.record(1);
        assert_eq!(stats.bytes, 1537);
        assert_eq!(stats.messages, 3);

        let summary = stats.finalize(Duration::from_millis(500));
        assert_eq!(summary.bytes, 1537);
        assert_eq!(summary.messages, 3);
        assert!((summary.seconds - 0.5).abs() < 1e-9);
        assert!((summary.avg_oneway_us - 500_000.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_summary_line() {
        let line = "SUMMARY bytes=2048 seconds=2.000123 gbps=0.000008 msgs=2 avg_oneway_us=1000061.500";
        let summary: Summary = line.parse().unwrap();
        assert_eq!(summary.bytes, 2048);
        assert_eq!(summary.messages, 2);
        assert!((summary.seconds - 2.000123).abs() < 1e-9);
        assert!((summary.avg_oneway_us - 1_000_061.5).abs() < 1e-6);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!("".parse::<Summary>().is_err());
        assert!("RESULT bytes=1".parse::<Summary>().is_err());
        assert!("SUMMARY bytes=1 seconds=1.0".parse::<Summary>().is_err());
        assert!("SUMMARY seconds=1.0 bytes=1 gbps=0 msgs=1 avg_oneway_us=0"
            .parse::<Summary>()
            .is_err());
        assert!("SUMMARY bytes=x seconds=1 gbps=0 msgs=1 avg_oneway_us=0"
            .parse::<Summary>()
            .is_err());
    }

    #[test]
    fn test_aggregate_uses_longest_window() {
        let workers = [
            Summary::new(125_000_000, 1.0, 10),
            Summary::new(125_000_000, 2.0, 20),
        ];
        let aggregate = AggregateSummary::from_workers(&workers);
        assert_eq!(aggregate.connections, 2);
        assert_eq!(aggregate.total_bytes, 250_000_000);
        assert_eq!(aggregate.total_messages, 30);
        assert_eq!(aggregate.window_seconds, 2.0);
        assert!((aggregate.total_gbps - 1.0).abs() < 1e-12);
        // 1.0 Gbit/s plus 0.5 Gbit/s, measured per connection.
        assert!((aggregate.sum_client_gbps - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_aggregate_display() {
        let workers = [Summary::new(125_000_000, 1.0, 10), Summary::new(125_000_000, 1.0, 10)];
        let aggregate = AggregateSummary::from_workers(&workers);
        assert_eq!(
            aggregate.to_string(),
            "connections=2 bytes=250000000 seconds=1.000000 gbps=2.000000 sum_gbps=2.000000 msgs=20"
        );
    }

    #[test]
    fn test_aggregate_of_nothing() {
        let aggregate = AggregateSummary::from_workers(std::iter::empty());
        assert_eq!(aggregate.connections, 0);
        assert_eq!(aggregate.total_gbps, 0.0);
        assert_eq!(aggregate.sum_client_gbps, 0.0);
    }
}
