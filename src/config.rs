//! Service configuration.
//!
//! Built from the command line by the binary, and handed to worker processes
//! as JSON in the shared-port topology.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::remote::StorageBackend;

/// Which nearest-neighbor engine backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum IndexKind {
    /// Exact brute-force scan.
    #[default]
    Flat,
    /// Approximate HNSW graph, quality is the search breadth.
    Hnsw,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub index: IndexConfig,
    pub runtime: RuntimeConfig,
    pub logging: LogConfig,
}

/// What to load and how to search it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension, 0 to infer from the first insert or the loaded file.
    pub dimension: usize,
    /// Index file, local or `s3://bucket/key`.
    pub save_path: String,
    /// Optional newline-delimited keys file, local or remote.
    pub keys_path: Option<String>,
    /// Search quality parameter, applied when greater than 1.
    pub quality: usize,
    pub kind: IndexKind,
    pub metric: DistanceMetric,
    /// Where remote files are fetched to.
    pub scratch_dir: PathBuf,
    pub storage: StorageBackend,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 0,
            save_path: "vectors.index".to_string(),
            keys_path: None,
            quality: 1,
            kind: IndexKind::Flat,
            metric: DistanceMetric::L2,
            scratch_dir: std::env::temp_dir(),
            storage: StorageBackend::S3,
        }
    }
}

/// Listener, worker pool and shutdown behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub host: String,
    pub port: u16,
    /// Calls executed concurrently per process.
    pub max_workers: usize,
    /// Persist the index to its save path on shutdown.
    pub updateable: bool,
    /// Seconds to wait for in-flight calls on shutdown, 0 waits for all.
    pub grace_period_secs: u64,
    /// One worker process per CPU, all sharing the port.
    pub multiprocess: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            max_workers: 1,
            updateable: false,
            grace_period_secs: 0,
            multiprocess: false,
        }
    }
}

impl RuntimeConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", addr, e))
    }

    pub fn grace_period(&self) -> Option<Duration> {
        (self.grace_period_secs > 0).then(|| Duration::from_secs(self.grace_period_secs))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Append logs here instead of stdout.
    pub log_file: Option<PathBuf>,
    pub debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.runtime.port, 50051);
        assert_eq!(config.runtime.max_workers, 1);
        assert_eq!(config.index.quality, 1);
        assert!(!config.runtime.updateable);
        assert_eq!(config.runtime.grace_period(), None);
    }

    #[test]
    fn test_json_round_trip_for_workers() {
        let mut config = ServiceConfig::default();
        config.index.storage = StorageBackend::Directory(PathBuf::from("/mnt/buckets"));
        config.index.kind = IndexKind::Hnsw;
        config.index.keys_path = Some("s3://b/keys.txt".to_string());

        let json = serde_json::to_string(&config).unwrap();
        let decoded: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }

    #[test]
    fn test_addr() {
        let runtime = RuntimeConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..RuntimeConfig::default()
        };
        assert_eq!(runtime.addr().unwrap().port(), 8080);

        let bad = RuntimeConfig {
            host: "not a host".to_string(),
            ..RuntimeConfig::default()
        };
        assert!(bad.addr().is_err());
    }
}
