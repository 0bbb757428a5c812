//! # Utility Functions
//!
//! Small helpers shared by the server, the client and the results writer.
//!
//! - **Formatting**: human-readable byte counts, rates and durations for log
//!   output. The machine-readable `SUMMARY` line never goes through these.
//! - **Identification**: unique run identifiers for JSON result records.
//! - **System Information**: host details recorded next to each run.
//!
//! ```rust
//! use tcp_stream_bench::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! ```

use std::time::Duration;
use uuid::Uuid;

/// Generate a unique identifier for one benchmark run.
///
/// ## Returns
/// String representation of a UUID v4
pub fn generate_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a duration in a human-readable way
///
/// The unit is chosen by magnitude: nanoseconds, microseconds, milliseconds
/// and seconds with two decimals, then `Xm Ys` and `Xh Ym Zs` beyond a minute.
///
/// ## Examples
///
/// ```rust
/// # use tcp_stream_bench::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_nanos(500)), "500ns");
/// assert_eq!(format_duration(Duration::from_millis(2500)), "2.50s");
/// assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let total_ns = duration.as_nanos();

    if total_ns < 1_000 {
        format!("{}ns", total_ns)
    } else if total_ns < 1_000_000 {
        format!("{:.2}μs", total_ns as f64 / 1_000.0)
    } else if total_ns < 1_000_000_000 {
        format!("{:.2}ms", total_ns as f64 / 1_000_000.0)
    } else if total_ns < 60_000_000_000 {
        format!("{:.2}s", total_ns as f64 / 1_000_000_000.0)
    } else {
        let seconds = duration.as_secs();
        let minutes = seconds / 60;
        let remaining_seconds = seconds % 60;

        if minutes < 60 {
            format!("{}m {}s", minutes, remaining_seconds)
        } else {
            let hours = minutes / 60;
            let remaining_minutes = minutes % 60;
            format!("{}h {}m {}s", hours, remaining_minutes, remaining_seconds)
        }
    }
}

/// Format a byte count with binary units (B, KB, MB, GB).
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    let value = bytes as f64;
    if value < KB {
        format!("{} B", bytes)
    } else if value < MB {
        format!("{:.2} KB", value / KB)
    } else if value < GB {
        format!("{:.2} MB", value / MB)
    } else {
        format!("{:.2} GB", value / GB)
    }
}

/// Format a throughput figure in decimal gigabits per second.
pub fn format_gbps(gbps: f64) -> String {
    if gbps >= 1.0 {
        format!("{:.2} Gbit/s", gbps)
    } else {
        format!("{:.2} Mbit/s", gbps * 1_000.0)
    }
}

/// Number of logical CPU cores on this host.
pub fn get_cpu_cores() -> usize {
    num_cpus::get()
}
