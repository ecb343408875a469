//! vectorindex-server: serve a mutable vector index over HTTP.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use vectorindex_server::config::{IndexConfig, IndexKind, LogConfig, RuntimeConfig, ServiceConfig};
use vectorindex_server::remote::StorageBackend;
use vectorindex_server::{logging, DistanceMetric, ServiceRuntime};

#[derive(Parser, Debug)]
#[command(name = "vectorindex-server")]
#[command(about = "A mutable, searchable vector index served over HTTP", long_about = None)]
struct Cli {
    /// Vector dimension, 0 to infer it from the first insert
    #[arg(long, env = "VECTORINDEX_DIM", default_value_t = 0)]
    dim: usize,

    /// Index file to load at startup and persist to (local path or s3://bucket/key)
    #[arg(long, env = "VECTORINDEX_SAVE_PATH", default_value = "vectors.index")]
    save_path: String,

    /// Newline-delimited keys file, line N is the key of id N
    #[arg(long, env = "VECTORINDEX_KEYS_PATH")]
    keys_path: Option<String>,

    /// Append logs to this file instead of stdout
    #[arg(long, env = "VECTORINDEX_LOG")]
    log: Option<PathBuf>,

    /// Log at debug level
    #[arg(long, env = "VECTORINDEX_DEBUG")]
    debug: bool,

    /// Persist the index to the save path on shutdown
    #[arg(long, env = "VECTORINDEX_UPDATEABLE")]
    updateable: bool,

    /// Calls served concurrently
    #[arg(long, env = "VECTORINDEX_MAX_WORKERS", default_value_t = 1)]
    max_workers: usize,

    /// Search quality parameter (HNSW search breadth)
    #[arg(long, alias = "nprobe", env = "VECTORINDEX_QUALITY", default_value_t = 1)]
    quality: usize,

    #[arg(long, env = "VECTORINDEX_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "VECTORINDEX_PORT", default_value_t = 50051)]
    port: u16,

    /// Index engine
    #[arg(long, value_enum, env = "VECTORINDEX_INDEX", default_value = "flat")]
    index: IndexKind,

    /// Distance metric
    #[arg(long, value_enum, env = "VECTORINDEX_METRIC", default_value = "l2")]
    metric: DistanceMetric,

    /// Directory remote files are fetched into (defaults to the system temp dir)
    #[arg(long, env = "VECTORINDEX_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Serve s3:// paths from this directory (one sub-directory per bucket) instead of S3
    #[arg(long, env = "VECTORINDEX_OBJECT_STORE_ROOT")]
    object_store_root: Option<PathBuf>,

    /// Seconds to let in-flight calls finish on shutdown, 0 waits for all
    #[arg(long, env = "VECTORINDEX_GRACE_PERIOD", default_value_t = 0)]
    grace_period: u64,

    /// Run one worker process per CPU, all sharing the port
    #[arg(long, env = "VECTORINDEX_MULTIPROCESS")]
    multiprocess: bool,

    /// Internal: JSON configuration of a shared-port worker
    #[arg(long, hide = true)]
    worker_config: Option<String>,
}

impl Cli {
    fn into_config(self) -> ServiceConfig {
        let defaults = IndexConfig::default();
        ServiceConfig {
            index: IndexConfig {
                dimension: self.dim,
                save_path: self.save_path,
                keys_path: self.keys_path.filter(|p| !p.is_empty()),
                quality: self.quality,
                kind: self.index,
                metric: self.metric,
                scratch_dir: self.scratch_dir.unwrap_or(defaults.scratch_dir),
                storage: self
                    .object_store_root
                    .map(StorageBackend::Directory)
                    .unwrap_or_default(),
            },
            runtime: RuntimeConfig {
                host: self.host,
                port: self.port,
                max_workers: self.max_workers,
                updateable: self.updateable,
                grace_period_secs: self.grace_period,
                multiprocess: self.multiprocess,
            },
            logging: LogConfig {
                log_file: self.log,
                debug: self.debug,
            },
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let worker = cli.worker_config.take();

    let config = match &worker {
        Some(json) => serde_json::from_str::<ServiceConfig>(json)
            .context("Invalid worker configuration")?,
        None => cli.into_config(),
    };

    logging::init(&config.logging)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let service = ServiceRuntime::new(config);
    runtime.block_on(async move {
        if worker.is_some() {
            service.run_worker(shutdown_signal()).await
        } else {
            info!("vectorindex-server starting");
            service.run(shutdown_signal()).await
        }
    })
}
