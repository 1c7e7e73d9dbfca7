use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use trackd::archive::run_archiver;
use trackd::config::Config;
use trackd::dispatcher::Dispatcher;
use trackd::metrics::init_metrics;
use trackd::position::Position;
use trackd::protocol::{OsmAndDecoder, create_decoder};
use trackd::registry::{DeviceRegistry, initial_load, refresh_task};
use trackd::server::run_server;
use trackd::web::start_web_server;

/// Queue depth between decoders and the archiver.
const POSITION_QUEUE_SIZE: usize = 10000;

#[derive(Parser, Debug)]
#[command(name = "trackd", about = "GPS tracker ingestion server.")]
struct Args {
    /// Configuration file
    #[arg(long = "config", default_value = "trackd.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;

    let metrics_handle = init_metrics();

    let registry = Arc::new(DeviceRegistry::new());
    initial_load(&registry, &config.devices);

    let (position_tx, position_rx) = flume::bounded::<Position>(POSITION_QUEUE_SIZE);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(refresh_task(
        registry.clone(),
        config.devices.clone(),
        Duration::from_secs(config.refresh_interval_seconds),
    )));

    tasks.push(tokio::spawn({
        let archive_dir = config.archive_dir.clone();
        let source = position_rx;
        async move {
            if let Err(err) = run_archiver(archive_dir, source).await {
                error!("archiver failed: {err:#}");
            }
        }
    }));

    for server in &config.servers {
        let decoder = create_decoder(&server.protocol, registry.clone())
            .with_context(|| format!("unknown protocol {:?}", server.protocol))?;
        let sink = position_tx.clone();
        let shutdown = shutdown_tx.subscribe();
        let bind = server.bind;
        tasks.push(tokio::spawn(async move {
            if let Err(err) = run_server(bind, decoder, sink, shutdown).await {
                error!("listener on {bind} failed: {err:#}");
            }
        }));
    }

    let web_dispatcher = Dispatcher::new(
        Arc::new(OsmAndDecoder::new(registry.clone())),
        position_tx.clone(),
    );
    tasks.push(tokio::spawn({
        let bind = config.web.bind;
        let shutdown = shutdown_tx.subscribe();
        async move {
            if let Err(err) = start_web_server(bind, web_dispatcher, metrics_handle, shutdown).await
            {
                error!("web server failed: {err:#}");
            }
        }
    }));

    // The archiver exits when the last sender is dropped; keep ours alive
    // until shutdown so listeners can clone from it.
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    drop(position_tx);

    for task in tasks {
        let _ = task.await;
    }
    info!("bye");
    Ok(())
}
