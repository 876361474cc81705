//! Row-chunk planning for sub-sharding.

use std::fmt;

use crate::error::{IngestError, Result};

/// Half-open range of source rows `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowChunk {
    pub start: usize,
    pub end: usize,
}

impl RowChunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Output file name, e.g. `[0-200000).parquet`.
    pub fn file_name(&self) -> String {
        format!("{self}.parquet")
    }
}

impl fmt::Display for RowChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}-{})", self.start, self.end)
    }
}

/// Split `row_count` rows into consecutive chunks of at most `chunk_size`.
pub fn plan_row_chunks(row_count: usize, chunk_size: usize) -> Result<Vec<RowChunk>> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidChunkSize);
    }
    Ok((0..row_count)
        .step_by(chunk_size)
        .map(|start| RowChunk {
            start,
            end: (start + chunk_size).min(row_count),
        })
        .collect())
}
