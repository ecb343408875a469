//! Embedding vector type

use crate::error::{IndexServiceError, Result};
use serde::{Deserialize, Serialize};

/// A fixed-length embedding of 32-bit floats
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    data: Vec<f32>,
}

impl Vector {
    /// Create a new vector from a Vec<f32>
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    /// Get the dimension of the vector
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    /// Get the underlying data as a slice
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Parse one delimited row of floats, e.g. a line of a TSV embeddings file.
    pub fn parse_row(row: &str, delimiter: char) -> Result<Self> {
        let data: Result<Vec<f32>> = row
            .split(delimiter)
            .map(|x| {
                let x = x.trim();
                x.parse::<f32>().map_err(|_| IndexServiceError::InvalidVector {
                    reason: format!("Invalid float: {:?}", x),
                })
            })
            .collect();
        Ok(Vector::new(data?))
    }
}

impl From<Vec<f32>> for Vector {
    fn from(data: Vec<f32>) -> Self {
        Vector::new(data)
    }
}
