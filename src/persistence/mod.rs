//! Persistence layer: the on-disk index file and its encoding.

pub mod serialization;
pub mod index_file;
