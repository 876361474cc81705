//! Patient split assignments (`splits.json`).
//!
//! The file maps a split name such as `train/0` or `held_out/0` to the ids of
//! the patients assigned to it. Split names double as relative output paths.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

/// File name of the split assignments inside a cohort directory.
pub const SPLITS_FILE_NAME: &str = "splits.json";

/// Split name to patient ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Splits(BTreeMap<String, Vec<i64>>);

impl Splits {
    pub fn new(splits: BTreeMap<String, Vec<i64>>) -> Self {
        Self(splits)
    }

    /// Split names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn patients(&self, split: &str) -> Option<&[i64]> {
        self.0.get(split).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of patients across splits.
    pub fn patient_count(&self) -> usize {
        self.0.values().map(Vec::len).sum()
    }
}

/// Load split assignments from a JSON file.
pub fn load_splits(path: &Path) -> Result<Splits> {
    let text = std::fs::read_to_string(path).map_err(|e| IngestError::SplitsRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&text).map_err(|e| IngestError::SplitsParse {
        path: path.to_path_buf(),
        source: e,
    })
}
