//! Index file: save/load the full contents of a vector index to/from disk.

use crate::distance::DistanceMetric;
use crate::error::{IndexServiceError, Result};
use crate::index::VectorIndex;
use crate::persistence::serialization;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serializable representation of a whole index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexFile {
    pub format_version: u32,
    pub metric: DistanceMetric,
    pub dimension: usize,
    pub entries: Vec<(i64, Vec<f32>)>,
}

impl IndexFile {
    /// Snapshot the entries of a live index.
    pub fn capture<I: VectorIndex + ?Sized>(index: &I) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            metric: index.metric(),
            dimension: index.dimension(),
            entries: index
                .entries()
                .into_iter()
                .map(|(id, vector)| (id, vector.as_slice().to_vec()))
                .collect(),
        }
    }

    /// Write the file atomically: encode to `<path>.tmp`, then rename over `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let persist_err = |reason: String| IndexServiceError::Persistence {
            path: path.display().to_string(),
            reason,
        };

        let data = serialization::to_bincode(self).map_err(|e| persist_err(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| persist_err(e.to_string()))?;
        }

        let tmp = tmp_path(path);
        fs::write(&tmp, &data).map_err(|e| persist_err(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| persist_err(e.to_string()))?;
        Ok(())
    }

    /// Read and decode an index file.
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        serialization::from_bincode(&data).map_err(|e| IndexServiceError::IncompatibleIndex {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Check the file can be loaded into an index with `metric`.
    ///
    /// A non-zero `dimension` must match the file's dimension exactly.
    pub fn ensure_compatible(
        &self,
        path: &Path,
        metric: DistanceMetric,
        dimension: usize,
    ) -> Result<()> {
        let incompatible = |reason: String| IndexServiceError::IncompatibleIndex {
            path: path.display().to_string(),
            reason,
        };

        if self.format_version != FORMAT_VERSION {
            return Err(incompatible(format!(
                "format version {} is not supported",
                self.format_version
            )));
        }
        if self.metric != metric {
            return Err(incompatible(format!(
                "file uses metric {:?}, index uses {:?}",
                self.metric, metric
            )));
        }
        if dimension != 0 && self.dimension != dimension {
            return Err(incompatible(format!(
                "file dimension {} does not match configured dimension {}",
                self.dimension, dimension
            )));
        }
        if let Some((id, data)) = self
            .entries
            .iter()
            .find(|(_, data)| data.len() != self.dimension)
        {
            return Err(incompatible(format!(
                "entry {} has {} components, expected {}",
                id,
                data.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
