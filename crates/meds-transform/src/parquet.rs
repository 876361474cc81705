//! Parquet scan and write helpers shared by the stages.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use polars::prelude::*;

/// Scan a single parquet file lazily.
pub fn scan_parquet_file(path: &Path) -> Result<LazyFrame> {
    let path_str = path.to_string_lossy();
    let args = ScanArgsParquet {
        glob: false,
        ..Default::default()
    };
    LazyFrame::scan_parquet(PlPath::new(&path_str), args)
        .with_context(|| format!("Failed to scan parquet: {}", path.display()))
}

/// Collect `lf` and write it to `path` as parquet.
pub fn write_parquet(lf: &LazyFrame, path: &Path) -> Result<()> {
    let mut df = lf
        .clone()
        .collect()
        .with_context(|| format!("Failed to collect frame for {}", path.display()))?;
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .with_context(|| format!("Failed to write parquet: {}", path.display()))?;
    Ok(())
}

/// Remove the named columns, ignoring names the frame does not have.
pub fn drop_columns(mut lf: LazyFrame, names: &[&str]) -> Result<LazyFrame> {
    let schema = lf.collect_schema().context("Failed to resolve schema")?;
    let keep: Vec<Expr> = schema
        .iter_names()
        .filter(|name| !names.contains(&name.as_str()))
        .map(|name| col(name.clone()))
        .collect();
    Ok(lf.select(keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_then_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.parquet");
        let df = df! {
            "patient_id" => [1i64, 2],
            "code" => ["EYE_COLOR//BLUE", "EYE_COLOR//BROWN"],
        }
        .unwrap();

        write_parquet(&df.clone().lazy(), &path).unwrap();
        let back = scan_parquet_file(&path).unwrap().collect().unwrap();
        assert!(back.equals(&df));
    }

    #[test]
    fn test_drop_columns() {
        let df = df! {
            "a" => [1i64],
            "b" => [2i64],
            "c" => [3i64],
        }
        .unwrap();
        let out = drop_columns(df.lazy(), &["b", "missing"])
            .unwrap()
            .collect()
            .unwrap();
        let names: Vec<&str> = out.get_column_names().iter().map(|n| n.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
