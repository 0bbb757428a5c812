use anyhow::Result;
use std::time::Duration;
use tcp_stream_bench::{
    net::WorkerExit, BenchmarkConfig, ClientConfig, DispatchStop, SendMode, ServerConfig,
    StreamClient, StreamServer, Summary,
};

/// Several library clients against one server: the server's per-worker byte
/// counts must match what each client received, and a server window shorter
/// than the client window ends the clients early.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_streams_to_every_client_until_window_closes() -> Result<()> {
    const CLIENTS: usize = 3;

    let server_config = ServerConfig::new(
        BenchmarkConfig::new(16 * 1024, Duration::from_secs(1))?,
        "127.0.0.1:0".parse()?,
        CLIENTS,
        SendMode::ZeroCopy,
    )?;
    let server = StreamServer::bind(server_config)?;
    let addr = server.local_addr();
    let server_task = tokio::spawn(server.run());

    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        let config = ClientConfig::new(BenchmarkConfig::new(16 * 1024, Duration::from_secs(5))?, addr);
        let client = StreamClient::connect(config).await?;
        clients.push(tokio::spawn(client.run()));
    }

    let mut received = 0u64;
    for client in clients {
        let report = client.await?;
        assert_eq!(report.exit, WorkerExit::PeerClosed);
        assert!(report.summary.seconds < 4.0);

        let line = report.summary.to_string();
        let parsed: Summary = line.parse()?;
        assert_eq!(parsed.bytes, report.summary.bytes);
        received += report.summary.bytes;
    }

    let report = server_task.await?;
    assert_eq!(report.stop, DispatchStop::AllAccepted);
    assert_eq!(report.workers.len(), CLIENTS);
    assert!(report
        .workers
        .iter()
        .all(|worker| worker.exit == WorkerExit::Completed && worker.summary.bytes > 0));
    assert_eq!(report.aggregate.connections, CLIENTS);
    assert_eq!(report.aggregate.total_bytes, received);
    assert!(report.aggregate.total_gbps > 0.0);
    Ok(())
}

#[tokio::test]
async fn copy_mode_serves_a_single_client() -> Result<()> {
    let server_config = ServerConfig::new(
        BenchmarkConfig::new(1024, Duration::from_millis(500))?,
        "127.0.0.1:0".parse()?,
        1,
        SendMode::Copy,
    )?;
    let server = StreamServer::bind(server_config)?;
    let addr = server.local_addr();
    assert!(server.banner().to_string().contains("mode=copy"));
    let server_task = tokio::spawn(server.run());

    let config = ClientConfig::new(BenchmarkConfig::new(1024, Duration::from_secs(3))?, addr);
    let report = StreamClient::connect(config).await?.run().await;
    let served = server_task.await?;

    assert_eq!(served.workers.len(), 1);
    assert_eq!(served.workers[0].summary.bytes, report.summary.bytes);
    assert!(report.summary.messages > 0);
    Ok(())
}
