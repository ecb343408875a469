//! Key table: maps human-readable keys to the numeric ids used by the index.
//!
//! The table is loaded once and never follows later Add/Remove calls. Ids
//! added at runtime without a matching keys file have no key.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use tracing::{debug, info};

use crate::error::{IndexServiceError, Result};
use crate::remote::RemotePathResolver;

/// Ordered, unique string keys. A key's 0-based position is its numeric id.
#[derive(Debug, Clone)]
pub struct KeyTable {
    keys: Vec<String>,
    positions: HashMap<String, i64>,
}

impl KeyTable {
    /// Load a newline-delimited keys file, fetching it first if it is remote.
    ///
    /// An absent or empty path means no key table.
    pub fn load(path: Option<&str>, resolver: &RemotePathResolver) -> Result<Option<Self>> {
        let Some(path) = path.filter(|p| !p.is_empty()) else {
            debug!("no keys file configured, key lookups disabled");
            return Ok(None);
        };

        let resolved = resolver.resolve(path)?;
        let file = File::open(&resolved.local).map_err(|e| {
            IndexServiceError::Startup(format!("cannot open keys file {}: {}", path, e))
        })?;
        let table = Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            IndexServiceError::Startup(reason) => {
                IndexServiceError::Startup(format!("keys file {}: {}", path, reason))
            }
            other => other,
        })?;

        info!("loaded {} keys from {}", table.len(), path);
        Ok(Some(table))
    }

    /// Read one key per line. Blank lines are skipped and do not take a position.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut keys = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                IndexServiceError::Startup(format!("line {}: {}", lineno + 1, e))
            })?;
            let key = line.strip_suffix('\r').unwrap_or(&line);
            if key.trim().is_empty() {
                continue;
            }
            keys.push(key.to_string());
        }
        Self::from_keys(keys)
    }

    /// Build a table from keys in id order. Duplicate keys are rejected.
    pub fn from_keys(keys: Vec<String>) -> Result<Self> {
        let mut positions = HashMap::with_capacity(keys.len());
        for (position, key) in keys.iter().enumerate() {
            if positions.insert(key.clone(), position as i64).is_some() {
                return Err(IndexServiceError::Startup(format!(
                    "duplicate key {:?} at position {}",
                    key, position
                )));
            }
        }
        Ok(Self { keys, positions })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.positions.contains_key(key)
    }

    /// Numeric id of `key`, if present.
    pub fn id_of(&self, key: &str) -> Option<i64> {
        self.positions.get(key).copied()
    }

    /// Key at position `id`, if `0 <= id < len`.
    pub fn key_of(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|i| self.keys.get(i))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::StorageBackend;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_positions_are_ids() {
        let table = KeyTable::from_reader(Cursor::new("alpha\nbeta\r\n\ngamma\n")).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.id_of("alpha"), Some(0));
        assert_eq!(table.id_of("beta"), Some(1));
        assert_eq!(table.id_of("gamma"), Some(2));
        assert_eq!(table.key_of(2), Some("gamma"));
        assert!(table.contains("beta"));
        assert!(!table.contains("delta"));
    }

    #[test]
    fn test_key_of_out_of_range() {
        let table = KeyTable::from_keys(vec!["a".into()]).unwrap();
        assert_eq!(table.key_of(1), None);
        assert_eq!(table.key_of(-1), None);
    }

    #[test]
    fn test_duplicate_key_is_startup_error() {
        let result = KeyTable::from_reader(Cursor::new("a\nb\na\n"));
        assert!(matches!(result, Err(IndexServiceError::Startup(_))));
    }

    #[test]
    fn test_load_without_path() {
        let resolver = RemotePathResolver::new("/tmp", StorageBackend::S3);
        assert!(KeyTable::load(None, &resolver).unwrap().is_none());
        assert!(KeyTable::load(Some(""), &resolver).unwrap().is_none());
    }

    #[test]
    fn test_load_local_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.key");
        std::fs::write(&path, "k0\nk1\n").unwrap();

        let resolver = RemotePathResolver::new(dir.path(), StorageBackend::S3);
        let table = KeyTable::load(path.to_str(), &resolver).unwrap().unwrap();
        assert_eq!(table.id_of("k1"), Some(1));
    }

    #[test]
    fn test_load_missing_file_is_startup_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.key");
        let resolver = RemotePathResolver::new(dir.path(), StorageBackend::S3);

        let result = KeyTable::load(path.to_str(), &resolver);
        assert!(matches!(result, Err(IndexServiceError::Startup(_))));
    }

    #[test]
    fn test_invalid_utf8_is_startup_error() {
        let result = KeyTable::from_reader(Cursor::new(vec![b'a', b'\n', 0xff, 0xfe, b'\n']));
        assert!(matches!(result, Err(IndexServiceError::Startup(_))));
    }
}
