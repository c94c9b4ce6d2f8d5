//! sortbench: compare TCP server architectures under a sort workload
//!
//! Two modes:
//! - `serve` runs all four server architectures side by side until Ctrl-C
//! - `bench` drives one running server with concurrent clients and writes
//!   the aggregated points to a CSV file

use sortbench::bench::{self, Benchmark};
use sortbench::config::{BenchConfig, Config, Mode, ServeConfig};
use sortbench::server::{BenchServer, Server, ServerError, ServerKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.mode {
        Mode::Serve(serve) => run_servers(serve),
        Mode::Bench(bench) => run_bench(bench),
    }
}

/// Start every architecture on its own thread and wait for Ctrl-C.
fn run_servers(config: ServeConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        threads = config.threads,
        queue_capacity = config.queue_capacity,
        "Starting sortbench servers"
    );

    let mut servers: Vec<Arc<BenchServer>> = Vec::with_capacity(ServerKind::ALL.len());
    for kind in ServerKind::ALL {
        match BenchServer::bind(kind, &config.server(kind)) {
            Ok(server) => servers.push(Arc::new(server)),
            Err(ServerError::Unsupported(kind)) => {
                warn!(server = %kind, "Skipping server unsupported on this platform");
            }
            Err(e) => {
                for server in &servers {
                    server.close();
                }
                return Err(e.into());
            }
        }
    }

    let mut handles = Vec::with_capacity(servers.len());
    for server in &servers {
        let server = Arc::clone(server);
        let handle = thread::Builder::new()
            .name(format!("{}-acceptor", server.kind()))
            .spawn(move || {
                if let Err(e) = server.run() {
                    error!(server = %server.kind(), error = %e, "Server failed");
                }
            })?;
        handles.push(handle);
    }

    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;

    info!("Shutting down");
    for server in &servers {
        server.close();
    }
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

/// Warm the target server up, run every scenario and export the points.
fn run_bench(config: BenchConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        host = %config.host,
        port = config.port,
        requests = config.requests,
        scenarios = config.elements.len().min(config.clients.len()).min(config.intervals.len()),
        "Starting benchmark"
    );

    let benchmark = Benchmark::new(config.host.clone(), config.port);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    let points = runtime.block_on(async {
        benchmark.warm_up().await?;
        benchmark
            .evaluate(config.requests, &config.elements, &config.clients, &config.intervals)
            .await
    })?;

    let output = config.output.unwrap_or_else(default_output_path);
    bench::write_csv(&output, &points)?;
    info!(points = points.len(), path = %output.display(), "Results written");
    Ok(())
}

fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "results-{}.csv",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}
