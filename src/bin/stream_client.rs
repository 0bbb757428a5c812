//! Stream client binary.
//!
//! Usage: `stream-client <server_ip> <port> <msg_size> <duration_sec> [options]`
//!
//! Prints exactly one `SUMMARY` line on stdout on success. Exits 2 when the
//! server cannot be reached and 1 on any other setup failure.

use anyhow::Result;
use std::process::ExitCode;
use tcp_stream_bench::{
    cli::{parse_from_env, ClientArgs},
    logging::init_logging,
    results::{write_json, RunRecord},
    BenchError, ClientConfig, StreamClient,
};
use tracing::error;

#[tokio::main]
async fn main() -> ExitCode {
    let args: ClientArgs = match parse_from_env() {
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

async fn run(args: ClientArgs) -> Result<()> {
    let config = ClientConfig::from_args(&args)?;
    let client = StreamClient::connect(config.clone()).await?;
    let report = client.run().await;

    println!("{}", report.summary);

    if let Some(path) = &args.output_file {
        write_json(&RunRecord::client(config, report), path)?;
    }
    Ok(())
}
