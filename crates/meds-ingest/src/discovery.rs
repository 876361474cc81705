//! Raw table discovery.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IngestError, Result};

/// On-disk format of a raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableFormat {
    Parquet,
    Csv,
}

impl TableFormat {
    /// Formats in order of preference.
    pub const PREFERRED: [TableFormat; 2] = [TableFormat::Parquet, TableFormat::Csv];

    /// Lowercase file extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Parquet => "parquet",
            Self::Csv => "csv",
        }
    }

    /// Classifies a path by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        Self::PREFERRED
            .into_iter()
            .find(|format| ext.eq_ignore_ascii_case(format.extension()))
            .ok_or_else(|| IngestError::UnsupportedFormat {
                path: path.to_path_buf(),
            })
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A raw input table, one per file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTable {
    /// File name without extension; names the sub-shard output directory.
    pub stem: String,
    pub path: PathBuf,
    pub format: TableFormat,
}

/// Lists the raw tables directly inside `dir`.
///
/// When a stem exists in several formats, parquet wins and the other file is
/// skipped with a warning. Files of other types and subdirectories are
/// ignored. Returns tables sorted by stem.
pub fn discover_raw_tables(dir: &Path) -> Result<Vec<RawTable>> {
    if !dir.is_dir() {
        return Err(IngestError::DirectoryNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| IngestError::DirectoryRead {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut candidates = Vec::new();
    for entry_result in entries {
        let entry = entry_result.map_err(|e| IngestError::DirectoryRead {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Ok(format) = TableFormat::from_path(&path) else {
            continue;
        };
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        candidates.push(RawTable {
            stem: stem.to_string(),
            path,
            format,
        });
    }

    // Preferred format first so it claims the stem.
    candidates.sort_by(|a, b| a.format.cmp(&b.format).then_with(|| a.path.cmp(&b.path)));

    let mut tables: BTreeMap<String, RawTable> = BTreeMap::new();
    for table in candidates {
        if let Some(kept) = tables.get(&table.stem) {
            warn!(
                skipped = %table.path.display(),
                kept = %kept.path.display(),
                "skipping table already present in a preferred format"
            );
            continue;
        }
        tables.insert(table.stem.clone(), table);
    }

    Ok(tables.into_values().collect())
}

/// Keeps only the tables whose stem is listed. An empty list keeps all.
pub fn select_tables(tables: Vec<RawTable>, stems: &[String]) -> Vec<RawTable> {
    if stems.is_empty() {
        return tables;
    }
    for stem in stems {
        if !tables.iter().any(|t| &t.stem == stem) {
            warn!(table = %stem, "requested table not found");
        }
    }
    tables
        .into_iter()
        .filter(|t| stems.contains(&t.stem))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            TableFormat::from_path(Path::new("a/Subjects.CSV")).unwrap(),
            TableFormat::Csv
        );
        assert_eq!(
            TableFormat::from_path(Path::new("vitals.parquet")).unwrap(),
            TableFormat::Parquet
        );
        assert!(matches!(
            TableFormat::from_path(Path::new("notes.txt")),
            Err(IngestError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_parquet_preferred_over_csv() {
        let dir = TempDir::new().unwrap();
        for name in ["subjects.csv", "subjects.parquet", "vitals.csv", "README.md"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.csv")).unwrap();

        let tables = discover_raw_tables(dir.path()).unwrap();
        let found: Vec<_> = tables.iter().map(|t| (t.stem.as_str(), t.format)).collect();
        assert_eq!(
            found,
            vec![("subjects", TableFormat::Parquet), ("vitals", TableFormat::Csv)]
        );
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let err = discover_raw_tables(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, IngestError::DirectoryNotFound { .. }));
    }

    #[test]
    fn test_select_tables() {
        let table = |stem: &str| RawTable {
            stem: stem.to_string(),
            path: PathBuf::from(format!("{stem}.csv")),
            format: TableFormat::Csv,
        };
        let tables = vec![table("admit_vitals"), table("subjects")];

        assert_eq!(select_tables(tables.clone(), &[]).len(), 2);
        let kept = select_tables(tables, &["subjects".to_string(), "labs".to_string()]);
        assert_eq!(kept, vec![table("subjects")]);
    }
}
