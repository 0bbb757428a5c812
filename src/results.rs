use crate::{
    benchmark::{ClientConfig, ServerConfig},
    client::ClientReport,
    error::BenchError,
    server::DispatchReport,
    utils::{generate_run_id, get_cpu_cores},
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// Host details recorded alongside each run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub benchmark_version: String,
}

impl SystemInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: get_cpu_cores(),
            benchmark_version: crate::VERSION.to_string(),
        }
    }
}

/// What one process measured, tagged by the side it ran on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum RunOutcome {
    Server {
        config: ServerConfig,
        report: DispatchReport,
    },
    Client {
        config: ClientConfig,
        report: ClientReport,
    },
}

/// Complete machine-readable record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl RunRecord {
    pub fn new(outcome: RunOutcome) -> Self {
        Self {
            run_id: generate_run_id(),
            timestamp: chrono::Utc::now(),
            system_info: SystemInfo::collect(),
            outcome,
        }
    }

    pub fn server(config: ServerConfig, report: DispatchReport) -> Self {
        Self::new(RunOutcome::Server { config, report })
    }

    pub fn client(config: ClientConfig, report: ClientReport) -> Self {
        Self::new(RunOutcome::Client { config, report })
    }
}

/// Write `record` as pretty-printed JSON, replacing any existing file.
pub fn write_json(record: &RunRecord, path: &Path) -> Result<(), BenchError> {
    debug!("Writing run {} to {:?}", record.run_id, path);
    let file = File::create(path).map_err(BenchError::Output)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, record)
        .map_err(|e| BenchError::Output(io::Error::from(e)))?;
    writeln!(writer).map_err(BenchError::Output)?;
    writer.flush().map_err(BenchError::Output)?;
    info!("Results written to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::BenchmarkConfig;
    use crate::cli::SendMode;
    use crate::metrics::{AggregateSummary, Summary};
    use crate::net::WorkerExit;
    use crate::server::DispatchStop;
    use std::time::Duration;

    fn client_record() -> RunRecord {
        let config = ClientConfig::new(
            BenchmarkConfig::new(4096, Duration::from_secs(10)).unwrap(),
            "127.0.0.1:5201".parse().unwrap(),
        );
        let report = ClientReport {
            server: config.server,
            exit: WorkerExit::Completed,
            summary: Summary::new(1_250_000_000, 1.0, 1000),
        };
        RunRecord::client(config, report)
    }

    #[test]
    fn test_system_info_collect() {
        let info = SystemInfo::collect();
        assert!(!info.os.is_empty());
        assert!(info.cpu_cores >= 1);
        assert_eq!(info.benchmark_version, crate::VERSION);
    }

    #[test]
    fn test_client_record_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let record = client_record();

        write_json(&record, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["role"], "client");
        assert_eq!(value["report"]["summary"]["bytes"], 1_250_000_000u64);
        assert_eq!(value["report"]["exit"], "completed");

        let parsed: RunRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_server_record_is_tagged() {
        let config = ServerConfig::new(
            BenchmarkConfig::new(1024, Duration::from_secs(2)).unwrap(),
            "0.0.0.0:5201".parse().unwrap(),
            4,
            SendMode::ZeroCopy,
        )
        .unwrap();
        let report = DispatchReport {
            configured: 4,
            attempted: 3,
            stop: DispatchStop::AcceptFailed("too many open files".to_string()),
            workers: Vec::new(),
            aggregate: AggregateSummary::from_workers(std::iter::empty()),
        };
        let value = serde_json::to_value(RunRecord::server(config, report)).unwrap();
        assert_eq!(value["role"], "server");
        assert_eq!(value["config"]["send_mode"], "zerocopy");
        assert_eq!(value["report"]["attempted"], 3);
    }

    #[test]
    fn test_write_json_reports_output_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.json");
        let err = write_json(&client_record(), &path).unwrap_err();
        assert!(matches!(err, BenchError::Output(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
