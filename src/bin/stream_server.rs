//! Stream server binary.
//!
//! Usage: `stream-server <port> <msg_size> <duration_sec> <num_clients> [options]`
//!
//! Prints one banner line on stdout once the listener is ready, then streams
//! to exactly `num_clients` connections and exits 0 after every worker has
//! finished. Setup failures exit 1.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::ExitCode;
use tcp_stream_bench::{
    cli::{parse_from_env, ServerArgs},
    logging::init_logging,
    results::{write_json, RunRecord},
    BenchError, ServerConfig, StreamServer,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args: ServerArgs = match parse_from_env() {
        Ok(args) => args,
        Err(code) => return ExitCode::from(code),
    };

    let _log_guard = match init_logging(&args.log) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(
                e.downcast_ref::<BenchError>()
                    .map_or(1, BenchError::exit_code),
            )
        }
    }
}

async fn run(args: ServerArgs) -> Result<()> {
    let server = StreamServer::bind(ServerConfig::from_args(&args)?)?;
    let config = server.config().clone();

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", server.banner()).context("Failed to print banner")?;
    stdout.flush().context("Failed to flush banner")?;

    let report = server.run().await;
    info!(
        "Served {} of {} connections: {}",
        report.attempted, report.configured, report.aggregate
    );

    if let Some(path) = &args.output_file {
        write_json(&RunRecord::server(config, report), path)?;
    }
    Ok(())
}
