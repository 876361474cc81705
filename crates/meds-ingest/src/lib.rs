//! Input handling for the extraction orchestrators.
//!
//! Finds the raw tables of a cohort, scans them lazily with a stable row
//! index, plans row chunks for sub-sharding and loads the persisted mapping
//! from patient splits to patient ids.

pub mod chunks;
pub mod discovery;
pub mod error;
pub mod scan;
pub mod splits;

pub use chunks::{RowChunk, plan_row_chunks};
pub use discovery::{RawTable, TableFormat, discover_raw_tables, select_tables};
pub use error::{IngestError, Result};
pub use scan::{ROW_IDX_NAME, ScanOptions, count_rows, scan_with_row_idx};
pub use splits::{SPLITS_FILE_NAME, Splits, load_splits};
