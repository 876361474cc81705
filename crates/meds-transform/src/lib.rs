//! Stage implementations plugged into the materializer.
//!
//! Every stage works on a [`polars::prelude::LazyFrame`]: reads are scans,
//! computes extend the query plan and only `write` collects.

pub mod filter;
pub mod merge;
pub mod parquet;
pub mod subshard;

pub use filter::{
    CODE_COLUMN, CodeFilter, FilterCodesStage, N_OCCURRENCES_COLUMN, N_PATIENTS_COLUMN,
};
pub use merge::{MERGE_SORT_COLUMNS, MergeStage, list_parquet_files, merge_shards};
pub use parquet::{drop_columns, scan_parquet_file, write_parquet};
pub use subshard::{SubshardStage, filter_to_row_chunk};
