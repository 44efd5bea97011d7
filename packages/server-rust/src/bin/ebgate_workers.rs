//! `ebgate-workers`: runs one worker pool until Ctrl-C.
//!
//! Pull requests triggered by the pool are logged instead of being sent.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ebgate_core::InMemoryPModeSet;
use ebgate_server::worker::ConfigSource;
use ebgate_server::{
    init_tracing, ChannelDispatcher, FileConfigSource, LogFormat, TaskRegistry, WorkerPool,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn};

/// Pull requests buffered between the pool and the consumer.
const PULL_REQUEST_QUEUE: usize = 256;

#[derive(Parser, Debug)]
#[command(name = "ebgate-workers")]
#[command(about = "Run an ebgate worker pool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Pool configuration file (JSON); re-read when it changes
    #[arg(long, env = "EBGATE_POOL_CONFIG")]
    config: PathBuf,

    /// P-Mode file (JSON array of P-Modes)
    #[arg(long, env = "EBGATE_PMODES")]
    pmodes: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text, env = "EBGATE_LOG_FORMAT")]
    log_format: LogFormat,

    /// Seconds to let running executions finish on shutdown
    #[arg(long, default_value_t = 30)]
    shutdown_timeout_secs: u64,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "EBGATE_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Some(addr) = cli.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let pmodes = load_pmodes(cli.pmodes.as_deref()).await?;
    let source = Arc::new(FileConfigSource::new(&cli.config));
    let config = source.reload().await?;

    let (dispatcher, mut requests) = ChannelDispatcher::channel(PULL_REQUEST_QUEUE);
    let registry = TaskRegistry::with_pull_worker(pmodes, Arc::new(dispatcher));
    let pool = WorkerPool::new(config, Arc::new(registry)).with_config_source(source);
    pool.start().await?;

    let consumer = tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            info!(
                message_id = %request.message_id,
                pmode = %request.pmode_id,
                mpc = %request.mpc,
                "pull request ready for sending"
            );
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    pool.shutdown_in_background(Duration::from_secs(cli.shutdown_timeout_secs))
        .await
        .context("shutdown task failed")?;
    consumer.abort();
    Ok(())
}

async fn load_pmodes(path: Option<&Path>) -> anyhow::Result<Arc<InMemoryPModeSet>> {
    let Some(path) = path else {
        warn!("no P-Mode file given, pull workers have nothing to pull for");
        return Ok(Arc::new(InMemoryPModeSet::new()));
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("cannot read P-Modes from {}", path.display()))?;
    let set = InMemoryPModeSet::from_json(&raw)
        .with_context(|| format!("invalid P-Modes in {}", path.display()))?;
    info!(pmodes = set.len(), path = %path.display(), "P-Modes loaded");
    Ok(Arc::new(set))
}
