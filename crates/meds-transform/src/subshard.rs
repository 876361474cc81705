//! Row-chunk sub-sharding of raw tables.

use std::path::Path;

use anyhow::Result;
use meds_ingest::{ROW_IDX_NAME, RowChunk, ScanOptions, scan_with_row_idx};
use meds_materialize::Stage;
use polars::prelude::*;

use crate::parquet::{drop_columns, scan_parquet_file, write_parquet};

/// Keep the rows of `chunk` and drop the row index column.
pub fn filter_to_row_chunk(lf: LazyFrame, chunk: RowChunk) -> Result<LazyFrame> {
    let start = lit(chunk.start as u64);
    let end = lit(chunk.end as u64);
    let filtered = lf.filter(
        col(ROW_IDX_NAME)
            .gt_eq(start)
            .and(col(ROW_IDX_NAME).lt(end)),
    );
    drop_columns(filtered, &[ROW_IDX_NAME])
}

/// Writes one row chunk of a raw table as parquet.
#[derive(Debug, Clone)]
pub struct SubshardStage {
    scan: ScanOptions,
    chunk: RowChunk,
}

impl SubshardStage {
    pub fn new(scan: ScanOptions, chunk: RowChunk) -> Self {
        Self { scan, chunk }
    }

    pub fn chunk(&self) -> RowChunk {
        self.chunk
    }
}

impl Stage for SubshardStage {
    type Data = LazyFrame;

    fn read(&self, input: &Path) -> Result<LazyFrame> {
        Ok(scan_with_row_idx(input, &self.scan)?)
    }

    fn transform(&self, data: LazyFrame) -> Result<LazyFrame> {
        filter_to_row_chunk(data, self.chunk)
    }

    fn write(&self, data: &LazyFrame, path: &Path) -> Result<()> {
        write_parquet(data, path)
    }

    fn load(&self, artifact: &Path) -> Result<LazyFrame> {
        scan_parquet_file(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_to_row_chunk() {
        let lf = df! {
            ROW_IDX_NAME => [0u32, 1, 2, 3, 4],
            "MRN" => [10i64, 11, 12, 13, 14],
        }
        .unwrap()
        .lazy();

        let out = filter_to_row_chunk(lf, RowChunk { start: 1, end: 3 })
            .unwrap()
            .collect()
            .unwrap();
        let expected = df! { "MRN" => [11i64, 12] }.unwrap();
        assert!(out.equals(&expected));
    }
}
