//! Merging patient sub-shards into one file per split.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use meds_materialize::Stage;
use polars::prelude::*;
use tracing::info;
use walkdir::WalkDir;

use crate::parquet::{scan_parquet_file, write_parquet};

/// Sort order of a merged split.
pub const MERGE_SORT_COLUMNS: [&str; 2] = ["patient_id", "timestamp"];

/// Every `*.parquet` file under `dir`, recursively, in path order.
pub fn list_parquet_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let is_parquet = entry.file_type().is_file()
            && entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
        if is_parquet {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Concatenate shards (columns aligned by name, missing filled with nulls),
/// remove duplicate rows and sort by patient and time.
pub fn merge_shards(files: &[PathBuf]) -> Result<LazyFrame> {
    let frames = files
        .iter()
        .map(|path| scan_parquet_file(path))
        .collect::<Result<Vec<_>>>()?;
    let merged = concat_lf_diagonal(frames, UnionArgs::default())
        .context("Failed to concatenate shards")?;
    Ok(merged
        .unique(None, UniqueKeepStrategy::Any)
        .sort(MERGE_SORT_COLUMNS, SortMultipleOptions::default()))
}

/// Reads a directory of patient sub-shards and writes the merged split.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStage;

impl Stage for MergeStage {
    type Data = LazyFrame;

    fn read(&self, input: &Path) -> Result<LazyFrame> {
        let files = list_parquet_files(input)?;
        if files.is_empty() {
            bail!("No files found in {}/**/*.parquet", input.display());
        }
        info!(dir = %input.display(), files = files.len(), "merging shards");
        merge_shards(&files)
    }

    fn write(&self, data: &LazyFrame, path: &Path) -> Result<()> {
        write_parquet(data, path)
    }

    fn load(&self, artifact: &Path) -> Result<LazyFrame> {
        scan_parquet_file(artifact)
    }
}
