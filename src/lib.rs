//! # vectorindex-server
//!
//! A mutable, searchable vector index served over HTTP.
//!
//! This library provides:
//! - `IndexService`: add, remove, search, import and restore against one index
//! - Exact (flat) and approximate (HNSW) engines behind the `VectorIndex` trait
//! - Key tables mapping string keys to numeric ids
//! - Transparent fetching of `s3://` paths to local scratch files
//! - Single-process and shared-port multi-process serving with graceful shutdown
//!
//! ## Example
//!
//! ```rust
//! use vectorindex_server::config::IndexConfig;
//! use vectorindex_server::service::{IndexService, SearchTarget};
//! use vectorindex_server::{DistanceMetric, FlatIndex};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let config = IndexConfig {
//!     dimension: 4,
//!     save_path: dir.path().join("demo.index").display().to_string(),
//!     ..IndexConfig::default()
//! };
//! let service = IndexService::open(&config, FlatIndex::new(4, DistanceMetric::L2)).unwrap();
//!
//! service.add(1, vec![0.0, 0.0, 0.0, 1.0]).unwrap();
//! service.add(2, vec![0.0, 0.0, 1.0, 0.0]).unwrap();
//!
//! let results = service.search(&SearchTarget::ById(1), 1).unwrap();
//! assert_eq!(results.ids, vec![1]);
//! ```

pub mod config;
pub mod distance;
pub mod error;
pub mod flat_index;
pub mod hnsw;
pub mod index;
pub mod keys;
pub mod logging;
pub mod metrics;
pub mod persistence;
pub mod remote;
pub mod runtime;
pub mod server;
pub mod service;
pub mod vector;

pub use config::ServiceConfig;
pub use distance::DistanceMetric;
pub use error::{IndexServiceError, Result};
pub use flat_index::FlatIndex;
pub use hnsw::{HnswIndex, HnswParams};
pub use index::{Neighbor, VectorIndex};
pub use keys::KeyTable;
pub use runtime::ServiceRuntime;
pub use service::{IndexService, RemoveOutcome, SearchResults, SearchTarget};
pub use vector::Vector;
