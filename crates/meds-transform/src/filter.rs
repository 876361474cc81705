//! Filtering events to codes that are frequent enough.
//!
//! Code metadata carries one row per `(code, modifiers...)` key with the
//! number of patients and of occurrences observed for it. Events whose key
//! falls below either threshold are dropped; surviving events keep their
//! original order.

use std::path::Path;

use anyhow::{Context, Result};
use meds_materialize::Stage;
use polars::prelude::*;

use crate::parquet::{scan_parquet_file, write_parquet};

pub const CODE_COLUMN: &str = "code";
pub const N_PATIENTS_COLUMN: &str = "code/n_patients";
pub const N_OCCURRENCES_COLUMN: &str = "code/n_occurrences";

/// Thresholds for keeping a code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFilter {
    /// Minimum `code/n_patients`; `None` disables the check.
    pub min_patients_per_code: Option<u64>,
    /// Minimum `code/n_occurrences`; `None` disables the check.
    pub min_occurrences_per_code: Option<u64>,
    /// Columns that together with `code` identify a metadata row.
    pub modifier_columns: Vec<String>,
}

impl CodeFilter {
    pub fn with_min_patients(mut self, min: Option<u64>) -> Self {
        self.min_patients_per_code = min;
        self
    }

    pub fn with_min_occurrences(mut self, min: Option<u64>) -> Self {
        self.min_occurrences_per_code = min;
        self
    }

    pub fn with_modifier_columns(mut self, columns: Vec<String>) -> Self {
        self.modifier_columns = columns;
        self
    }

    /// True when no threshold is set and events pass through untouched.
    pub fn is_identity(&self) -> bool {
        self.min_patients_per_code.is_none() && self.min_occurrences_per_code.is_none()
    }

    /// `code` followed by the modifier columns.
    pub fn join_columns(&self) -> Vec<String> {
        std::iter::once(CODE_COLUMN.to_string())
            .chain(self.modifier_columns.iter().cloned())
            .collect()
    }

    /// Keys of the metadata rows that pass every threshold, or `None` for the
    /// identity filter.
    pub fn allowed_codes(&self, metadata: LazyFrame) -> Option<LazyFrame> {
        let thresholds = [
            (N_PATIENTS_COLUMN, self.min_patients_per_code),
            (N_OCCURRENCES_COLUMN, self.min_occurrences_per_code),
        ];
        let predicate = thresholds
            .into_iter()
            .filter_map(|(column, min)| min.map(|min| col(column).gt_eq(lit(min))))
            .reduce(Expr::and)?;

        let keys: Vec<Expr> = self.join_columns().iter().map(|c| col(c.as_str())).collect();
        Some(metadata.filter(predicate).select(keys))
    }
}

/// Inner-join `events` with `allowed` on `join_columns`, keeping the event
/// order and columns.
fn retain_allowed(
    mut events: LazyFrame,
    allowed: LazyFrame,
    join_columns: &[String],
) -> Result<LazyFrame> {
    let schema = events
        .collect_schema()
        .context("Failed to resolve event schema")?;

    let mut idx_col = String::from("_row_idx");
    while schema.contains(&idx_col) {
        idx_col = format!("_{idx_col}");
    }

    let on: Vec<Expr> = join_columns.iter().map(|c| col(c.as_str())).collect();
    let original: Vec<Expr> = schema.iter_names().map(|n| col(n.clone())).collect();

    Ok(events
        .with_row_index(idx_col.as_str(), None)
        .join(allowed, on.clone(), on, JoinArgs::new(JoinType::Inner))
        .sort([idx_col.as_str()], SortMultipleOptions::default())
        .select(original))
}

/// Filters a split's events against precomputed code metadata.
#[derive(Clone)]
pub struct FilterCodesStage {
    allowed: Option<LazyFrame>,
    join_columns: Vec<String>,
}

impl FilterCodesStage {
    pub fn new(filter: &CodeFilter, metadata: LazyFrame) -> Self {
        Self {
            allowed: filter.allowed_codes(metadata),
            join_columns: filter.join_columns(),
        }
    }

    /// Stage reading code metadata from a parquet file.
    pub fn from_metadata_file(filter: &CodeFilter, path: &Path) -> Result<Self> {
        Ok(Self::new(filter, scan_parquet_file(path)?))
    }

    pub fn is_identity(&self) -> bool {
        self.allowed.is_none()
    }
}

impl std::fmt::Debug for FilterCodesStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterCodesStage")
            .field("identity", &self.is_identity())
            .field("join_columns", &self.join_columns)
            .finish()
    }
}

impl Stage for FilterCodesStage {
    type Data = LazyFrame;

    fn read(&self, input: &Path) -> Result<LazyFrame> {
        scan_parquet_file(input)
    }

    fn transform(&self, data: LazyFrame) -> Result<LazyFrame> {
        match &self.allowed {
            Some(allowed) => retain_allowed(data, allowed.clone(), &self.join_columns),
            None => Ok(data),
        }
    }

    fn write(&self, data: &LazyFrame, path: &Path) -> Result<()> {
        write_parquet(data, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code_metadata() -> LazyFrame {
        df! {
            "code" => ["A", "A", "B", "C"],
            "modifier1" => [1i64, 2, 1, 2],
            "code/n_patients" => [2i64, 1, 3, 2],
            "code/n_occurrences" => [4i64, 5, 3, 2],
        }
        .unwrap()
        .lazy()
    }

    fn events() -> LazyFrame {
        df! {
            "patient_id" => [1i64, 1, 2, 2],
            "code" => ["A", "B", "A", "C"],
            "modifier1" => [1i64, 1, 2, 2],
        }
        .unwrap()
        .lazy()
    }

    fn run(filter: CodeFilter) -> DataFrame {
        let stage = FilterCodesStage::new(
            &filter.with_modifier_columns(vec!["modifier1".to_string()]),
            code_metadata(),
        );
        stage.transform(events()).unwrap().collect().unwrap()
    }

    #[test]
    fn test_both_thresholds() {
        let out = run(CodeFilter::default()
            .with_min_patients(Some(2))
            .with_min_occurrences(Some(3)));
        let expected = df! {
            "patient_id" => [1i64, 1],
            "code" => ["A", "B"],
            "modifier1" => [1i64, 1],
        }
        .unwrap();
        assert!(out.equals(&expected));
    }

    #[test]
    fn test_modifiers_distinguish_codes() {
        let out = run(CodeFilter::default()
            .with_min_patients(Some(1))
            .with_min_occurrences(Some(4)));
        let expected = df! {
            "patient_id" => [1i64, 2],
            "code" => ["A", "A"],
            "modifier1" => [1i64, 2],
        }
        .unwrap();
        assert!(out.equals(&expected));
    }

    #[test]
    fn test_single_threshold() {
        let out = run(CodeFilter::default().with_min_occurrences(Some(5)));
        let expected = df! {
            "patient_id" => [2i64],
            "code" => ["A"],
            "modifier1" => [2i64],
        }
        .unwrap();
        assert!(out.equals(&expected));

        let out = run(CodeFilter::default().with_min_patients(Some(1)));
        assert!(out.equals(&events().collect().unwrap()));
    }

    #[test]
    fn test_no_thresholds_is_identity() {
        let filter = CodeFilter::default();
        assert!(filter.is_identity());
        assert!(FilterCodesStage::new(&filter, code_metadata()).is_identity());
        assert!(run(filter).equals(&events().collect().unwrap()));
    }

    #[test]
    fn test_row_index_name_avoids_collisions() {
        let events = df! {
            "_row_idx" => [9i64, 8],
            "code" => ["C", "B"],
        }
        .unwrap()
        .lazy();
        let stage = FilterCodesStage::new(
            &CodeFilter::default().with_min_patients(Some(2)),
            df! {
                "code" => ["B", "C"],
                "code/n_patients" => [3i64, 2],
            }
            .unwrap()
            .lazy(),
        );
        let out = stage.transform(events).unwrap().collect().unwrap();
        let expected = df! {
            "_row_idx" => [9i64, 8],
            "code" => ["C", "B"],
        }
        .unwrap();
        assert!(out.equals(&expected));
    }
}
