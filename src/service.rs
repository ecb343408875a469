//! The index service: one vector index, an optional key table and the
//! request operations served on top of them.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::IndexConfig;
use crate::error::{IndexServiceError, Result};
use crate::index::{Neighbor, VectorIndex};
use crate::keys::KeyTable;
use crate::persistence::index_file::IndexFile;
use crate::remote::RemotePathResolver;
use crate::vector::Vector;

/// What a search is anchored on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// A resident vector, by numeric id.
    ById(i64),
    /// A resident vector, by its key in the key table.
    ByKey(String),
}

impl SearchTarget {
    /// A non-empty key takes precedence over the id. A missing id means 0.
    pub fn from_request(id: Option<i64>, key: Option<String>) -> Self {
        match key {
            Some(key) if !key.is_empty() => SearchTarget::ByKey(key),
            _ => SearchTarget::ById(id.unwrap_or_default()),
        }
    }
}

/// Whether a remove found its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotPresent,
}

/// Search hits in rank order.
///
/// `keys` is only filled for by-key searches; an id with no key in the table
/// maps to `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub ids: Vec<i64>,
    pub scores: Vec<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<Option<String>>>,
}

impl SearchResults {
    fn from_neighbors(neighbors: Vec<Neighbor>) -> Self {
        let (ids, scores) = neighbors.into_iter().map(|n| (n.id, n.score)).unzip();
        Self {
            ids,
            scores,
            keys: None,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

struct IndexState<I> {
    index: I,
    /// Local file the index is persisted to.
    save_path: PathBuf,
    /// Remote identifier `save_path` was fetched from, if any.
    remote_path: Option<String>,
}

/// Owns one vector index and serves every request against it.
///
/// Mutations and `save` take the write lock; `total` and searches take the
/// read lock. `dimension` reads an atomic copy kept in sync by the writers.
pub struct IndexService<I: VectorIndex> {
    state: RwLock<IndexState<I>>,
    dimension: AtomicUsize,
    configured_dimension: usize,
    keys: Option<KeyTable>,
    resolver: RemotePathResolver,
}

impl<I: VectorIndex> IndexService<I> {
    /// Build a service around `index`.
    ///
    /// The save path is resolved (fetched if remote) and loaded when the
    /// file exists; otherwise the index starts empty. Then the key table is
    /// loaded. Any failure here means the service cannot start.
    pub fn open(config: &IndexConfig, mut index: I) -> Result<Self> {
        debug!("dim: {}", config.dimension);
        debug!("save_path: {}", config.save_path);
        debug!("keys_path: {:?}", config.keys_path);
        debug!("quality: {}", config.quality);

        let resolver = RemotePathResolver::new(&config.scratch_dir, config.storage.clone());
        let resolved = resolver.resolve(&config.save_path)?;

        if resolved.local.exists() {
            let file = IndexFile::read(&resolved.local)
                .and_then(|file| {
                    file.ensure_compatible(&resolved.local, index.metric(), config.dimension)?;
                    Ok(file)
                })
                .map_err(|e| {
                    IndexServiceError::Startup(format!(
                        "cannot load index {}: {}",
                        config.save_path, e
                    ))
                })?;
            index.load(file)?;
            info!(
                "loaded {} vectors from {}",
                index.total(),
                resolved.local.display()
            );
        } else {
            info!(
                "no index at {}, starting empty",
                resolved.local.display()
            );
        }

        if config.quality > 1 {
            index.set_quality(config.quality);
        }

        let keys = KeyTable::load(config.keys_path.as_deref(), &resolver)?;
        debug!("ntotal: {}", index.total());

        Ok(Self {
            dimension: AtomicUsize::new(index.dimension()),
            configured_dimension: config.dimension,
            state: RwLock::new(IndexState {
                index,
                save_path: resolved.local,
                remote_path: resolved.remote,
            }),
            keys,
            resolver,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState<I>>> {
        self.state
            .read()
            .map_err(|_| IndexServiceError::IndexError("index lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState<I>>> {
        self.state
            .write()
            .map_err(|_| IndexServiceError::IndexError("index lock poisoned".to_string()))
    }

    fn sync_dimension(&self, index: &I) {
        self.dimension.store(index.dimension(), Ordering::Release);
    }

    /// Number of vectors in the index.
    pub fn total(&self) -> Result<usize> {
        Ok(self.read()?.index.total())
    }

    /// Vector dimension, 0 while nothing has fixed it.
    pub fn dimension(&self) -> usize {
        self.dimension.load(Ordering::Acquire)
    }

    /// Insert or replace the vector stored under `id`.
    pub fn add(&self, id: i64, embedding: Vec<f32>) -> Result<i64> {
        debug!("add - id: {}", id);
        let mut state = self.write()?;
        state.index.replace(&[id], vec![Vector::new(embedding)])?;
        self.sync_dimension(&state.index);
        Ok(id)
    }

    pub fn remove(&self, id: i64) -> Result<RemoveOutcome> {
        debug!("remove - id: {}", id);
        let removed = self.write()?.index.remove(&[id]);
        Ok(if removed > 0 {
            RemoveOutcome::Removed
        } else {
            RemoveOutcome::NotPresent
        })
    }

    /// Search around a resident vector.
    ///
    /// An unknown key or an id not in the index gives an empty result.
    /// By-key results carry the key of every hit.
    pub fn search(&self, target: &SearchTarget, count: usize) -> Result<SearchResults> {
        debug!("search - {:?}, count: {}", target, count);
        let (id, keys) = match target {
            SearchTarget::ById(id) => (*id, None),
            SearchTarget::ByKey(key) => {
                let keys = self.keys.as_ref().ok_or(IndexServiceError::KeysNotLoaded)?;
                match keys.id_of(key) {
                    Some(id) => (id, Some(keys)),
                    None => return Ok(SearchResults::default()),
                }
            }
        };
        if count == 0 {
            return Ok(SearchResults::default());
        }

        let neighbors = match self.read()?.index.search_by_id(id, count)? {
            Some(neighbors) => neighbors,
            None => return Ok(SearchResults::default()),
        };

        let mut results = SearchResults::from_neighbors(neighbors);
        if let Some(keys) = keys {
            results.keys = Some(
                results
                    .ids
                    .iter()
                    .map(|&id| keys.key_of(id).map(str::to_string))
                    .collect(),
            );
        }
        Ok(results)
    }

    /// Search around a caller-supplied vector.
    pub fn search_by_embedding(&self, embedding: Vec<f32>, count: usize) -> Result<SearchResults> {
        debug!(
            "search_by_emb - embedding: {:?}",
            &embedding[..embedding.len().min(10)]
        );
        let state = self.read()?;
        let dimension = state.index.dimension();
        if dimension != 0 && embedding.len() != dimension {
            return Err(IndexServiceError::DimensionMismatch {
                expected: dimension,
                actual: embedding.len(),
            });
        }
        if count == 0 || dimension == 0 {
            return Ok(SearchResults::default());
        }

        let neighbors = state.index.search(&Vector::new(embedding), count)?;
        Ok(SearchResults::from_neighbors(neighbors))
    }

    /// Upsert every row of a tab-separated embeddings file, paired by row
    /// with a one-column ids file.
    ///
    /// Both files are parsed and checked before the index is locked, so a
    /// rejected import leaves the index untouched.
    pub fn import(&self, embs_path: &str, ids_path: &str) -> Result<usize> {
        debug!("importing - {}, {}", embs_path, ids_path);
        let embs_local = self.resolver.resolve(embs_path)?.local;
        let ids_local = self.resolver.resolve(ids_path)?.local;

        let vectors = read_rows(&embs_local, embs_path, |row| Vector::parse_row(row, '\t'))?;
        let ids = read_rows(&ids_local, ids_path, |row| {
            row.trim()
                .parse::<i64>()
                .map_err(|e| IndexServiceError::InvalidVector {
                    reason: format!("invalid id {:?}: {}", row.trim(), e),
                })
        })?;
        if vectors.len() != ids.len() {
            return Err(IndexServiceError::RowCountMismatch {
                embeddings: vectors.len(),
                ids: ids.len(),
            });
        }

        let imported = ids.len();
        let mut state = self.write()?;
        state.index.replace(&ids, vectors)?;
        self.sync_dimension(&state.index);
        info!("imported {} vectors from {}", imported, embs_path);
        Ok(imported)
    }

    /// Replace the whole index with a saved file and persist to it from now on.
    pub fn restore(&self, path: &str) -> Result<usize> {
        debug!("restore - {}", path);
        let resolved = self.resolver.resolve(path)?;
        let file = IndexFile::read(&resolved.local)?;

        let mut state = self.write()?;
        file.ensure_compatible(&resolved.local, state.index.metric(), self.configured_dimension)?;
        state.index.load(file)?;
        state.save_path = resolved.local;
        state.remote_path = resolved.remote;
        self.sync_dimension(&state.index);

        let total = state.index.total();
        info!("restored {} vectors from {}", total, path);
        Ok(total)
    }

    /// Persist the index to its current local save path.
    ///
    /// Never uploads to the remote origin.
    pub fn save(&self) -> Result<PathBuf> {
        let state = self.write()?;
        debug!("saving index to {}", state.save_path.display());
        state.index.save(&state.save_path)?;
        info!(
            "saved {} vectors to {}",
            state.index.total(),
            state.save_path.display()
        );
        Ok(state.save_path.clone())
    }

    pub fn save_path(&self) -> Result<PathBuf> {
        Ok(self.read()?.save_path.clone())
    }

    pub fn remote_path(&self) -> Result<Option<String>> {
        Ok(self.read()?.remote_path.clone())
    }

    pub fn keys(&self) -> Option<&KeyTable> {
        self.keys.as_ref()
    }

    pub fn quality(&self) -> Result<usize> {
        Ok(self.read()?.index.quality())
    }
}

/// Parse every non-blank line of `local` with `parse`, in parallel.
///
/// Errors name the file as the caller gave it and the 1-based line.
fn read_rows<T, F>(local: &Path, display: &str, parse: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&str) -> Result<T> + Sync,
{
    let file = File::open(local)?;
    let lines: Vec<(usize, String)> = BufReader::new(file)
        .lines()
        .enumerate()
        .map(|(i, line)| line.map(|l| (i + 1, l)))
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    lines
        .par_iter()
        .map(|(lineno, line)| {
            parse(line.trim_end_matches('\r')).map_err(|e| IndexServiceError::MalformedRow {
                file: display.to_string(),
                line: *lineno,
                reason: e.to_string(),
            })
        })
        .collect()
}
