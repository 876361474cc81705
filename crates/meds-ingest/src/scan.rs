//! Lazy scanning of raw tables with a stable row index.
//!
//! Row chunks are addressed by their position in the source file, so every
//! scan adds a row index column before anything else can reorder rows.

use std::path::Path;

use polars::io::RowIndex;
use polars::prelude::*;
use tracing::debug;

use crate::discovery::TableFormat;
use crate::error::{IngestError, Result};

/// Name of the row index column added by [`scan_with_row_idx`].
pub const ROW_IDX_NAME: &str = "__row_idx";

/// Default number of rows used to infer a CSV schema.
pub const DEFAULT_INFER_SCHEMA_LENGTH: usize = 10_000;

/// Options for scanning a raw table.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Rows sampled for CSV schema inference. `None` scans the whole file.
    pub infer_schema_length: Option<usize>,
    /// Columns to keep besides the row index. Empty keeps everything.
    pub columns: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            infer_schema_length: Some(DEFAULT_INFER_SCHEMA_LENGTH),
            columns: Vec::new(),
        }
    }
}

impl ScanOptions {
    /// Set the schema inference length.
    pub fn with_infer_schema_length(mut self, rows: Option<usize>) -> Self {
        self.infer_schema_length = rows;
        self
    }

    /// Restrict the scan to the given columns.
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }
}

fn row_index() -> RowIndex {
    RowIndex {
        name: PlSmallStr::from_static(ROW_IDX_NAME),
        offset: 0,
    }
}

/// Scan a csv or parquet file lazily, numbering rows in `__row_idx`.
pub fn scan_with_row_idx(path: &Path, options: &ScanOptions) -> Result<LazyFrame> {
    let path_str = path.to_string_lossy();
    let pl_path = PlPath::new(&path_str);

    let lf = match TableFormat::from_path(path)? {
        TableFormat::Csv => {
            debug!(path = %path.display(), "scanning as csv");
            LazyCsvReader::new(pl_path)
                .with_has_header(true)
                .with_infer_schema_length(options.infer_schema_length)
                .with_row_index(Some(row_index()))
                .finish()?
        }
        TableFormat::Parquet => {
            debug!(path = %path.display(), "scanning as parquet");
            let args = ScanArgsParquet {
                row_index: Some(row_index()),
                ..Default::default()
            };
            LazyFrame::scan_parquet(pl_path, args)?
        }
    };

    if options.columns.is_empty() {
        return Ok(lf);
    }

    let mut selected: Vec<&str> = vec![ROW_IDX_NAME];
    for column in &options.columns {
        if !selected.contains(&column.as_str()) {
            selected.push(column);
        }
    }
    Ok(lf.select(selected.into_iter().map(col).collect::<Vec<_>>()))
}

/// Count the rows of a lazy frame without materializing it.
pub fn count_rows(lf: LazyFrame) -> Result<usize> {
    let df = lf
        .select([len().cast(DataType::UInt64).alias("n_rows")])
        .collect()?;
    let rows = df.column("n_rows")?.u64()?.get(0).unwrap_or(0);
    usize::try_from(rows).map_err(|_| IngestError::DataFrame {
        message: format!("row count {rows} does not fit in memory addressing"),
    })
}
