//! Remote path resolution: object-storage identifiers are fetched to local
//! scratch files before anything is loaded from them.

use std::fs::{self, File, OpenOptions};
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IndexServiceError, Result};

/// Scheme prefix of recognized remote identifiers.
pub const S3_SCHEME: &str = "s3://";

/// Where remote identifiers are fetched from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// Amazon S3 (or compatible), configured from the `AWS_*` environment.
    #[default]
    S3,
    /// A local directory holding one sub-directory per bucket.
    Directory(PathBuf),
}

/// A parsed `s3://bucket/key` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath {
    pub bucket: String,
    pub key: String,
}

impl RemotePath {
    /// Whether `path` names an object in remote storage.
    pub fn is_remote(path: &str) -> bool {
        path.starts_with(S3_SCHEME)
    }

    /// Split a remote identifier into bucket and key.
    pub fn parse(path: &str) -> Result<Self> {
        let malformed = |reason: &str| IndexServiceError::StorageFetch {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        let rest = path
            .strip_prefix(S3_SCHEME)
            .ok_or_else(|| malformed("not an s3:// identifier"))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| malformed("missing object key"))?;
        if bucket.is_empty() {
            return Err(malformed("missing bucket name"));
        }
        if key.is_empty() || key.ends_with('/') {
            return Err(malformed("missing object key"));
        }

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// Last segment of the key.
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// A path after resolution: where it came from and where it now lives locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// The remote identifier as given, if the path was remote.
    pub remote: Option<String>,
    /// Local path to read from.
    pub local: PathBuf,
}

/// Resolves remote identifiers to freshly fetched local scratch files.
#[derive(Debug, Clone)]
pub struct RemotePathResolver {
    scratch_dir: PathBuf,
    backend: StorageBackend,
}

impl RemotePathResolver {
    pub fn new(scratch_dir: impl Into<PathBuf>, backend: StorageBackend) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            backend,
        }
    }

    /// Resolve `path`. Local paths are returned unchanged; remote ones are
    /// downloaded to `<scratch_dir>/<timestamp>-<basename>`.
    ///
    /// Every call on a remote path produces a new scratch file. Blocks on the
    /// download, so it must not be called from inside an async task.
    pub fn resolve(&self, path: &str) -> Result<ResolvedPath> {
        if !RemotePath::is_remote(path) {
            return Ok(ResolvedPath {
                remote: None,
                local: PathBuf::from(path),
            });
        }

        let remote = RemotePath::parse(path)?;
        let (local, mut file) = self.create_scratch(remote.basename())?;
        debug!("fetching {} into {}", path, local.display());

        if let Err(e) = self.fetch(&remote, &mut file) {
            drop(file);
            let _ = fs::remove_file(&local);
            return Err(IndexServiceError::StorageFetch {
                path: path.to_string(),
                reason: e,
            });
        }

        info!("fetched {} to {}", path, local.display());
        Ok(ResolvedPath {
            remote: Some(path.to_string()),
            local,
        })
    }

    fn create_scratch(&self, basename: &str) -> Result<(PathBuf, File)> {
        fs::create_dir_all(&self.scratch_dir)?;
        loop {
            let local = self
                .scratch_dir
                .join(format!("{}-{}", next_stamp(), basename));
            match OpenOptions::new().write(true).create_new(true).open(&local) {
                Ok(file) => return Ok((local, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn fetch(&self, remote: &RemotePath, file: &mut File) -> std::result::Result<(), String> {
        match &self.backend {
            StorageBackend::Directory(root) => {
                if remote.key.split('/').any(|segment| segment == "..") {
                    return Err("object key must not contain '..'".to_string());
                }
                let source = root.join(&remote.bucket).join(&remote.key);
                let mut reader = File::open(&source).map_err(|e| e.to_string())?;
                io::copy(&mut reader, file).map_err(|e| e.to_string())?;
            }
            StorageBackend::S3 => {
                let bytes = block_on(fetch_s3(remote)).map_err(|e| e.to_string())??;
                file.write_all(&bytes).map_err(|e| e.to_string())?;
            }
        }
        file.sync_all().map_err(|e| e.to_string())
    }
}

async fn fetch_s3(remote: &RemotePath) -> std::result::Result<Vec<u8>, String> {
    let store = AmazonS3Builder::from_env()
        .with_bucket_name(&remote.bucket)
        .build()
        .map_err(|e| e.to_string())?;
    let location = ObjectPath::parse(&remote.key).map_err(|e| e.to_string())?;
    let object = store.get(&location).await.map_err(|e| e.to_string())?;
    let bytes = object.bytes().await.map_err(|e| e.to_string())?;
    Ok(bytes.to_vec())
}

/// Drive a future to completion from synchronous code.
///
/// Inside a runtime's blocking pool the ambient handle is reused; elsewhere a
/// throwaway current-thread runtime is built.
fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(future)),
        Err(_) => Ok(tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(future)),
    }
}

static LAST_STAMP: AtomicU64 = AtomicU64::new(0);

/// Nanoseconds since the epoch, strictly increasing within this process.
fn next_stamp() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let prev = LAST_STAMP
        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |prev| {
            Some(now.max(prev + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}
