//! Per-stage drivers.
//!
//! Each driver enumerates its work items, shuffles them so that a fleet of
//! workers started together spreads out over different outputs, and hands
//! every item to the materializer. Work order affects throughput only.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use meds_ingest::{
    SPLITS_FILE_NAME, ScanOptions, Splits, count_rows, discover_raw_tables, load_splits,
    plan_row_chunks, scan_with_row_idx, select_tables,
};
use meds_materialize::{
    LOCK_SUFFIX, LocalStorage, LockManager, LockRecord, MaterializeOptions, Materializer,
    StalenessPolicy, Stage, WorkItem,
};
use meds_transform::{CodeFilter, FilterCodesStage, MergeStage, SubshardStage};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, info_span, warn};
use walkdir::WalkDir;

use crate::progress::progress_bar;
use crate::types::{LockListing, RunReport};

/// Directory of row-chunked raw tables inside a cohort.
pub const SUB_SHARDED_DIR: &str = "sub_sharded";
/// Directory of per-split patient sub-shards inside a cohort.
pub const PATIENT_SUB_SHARDED_DIR: &str = "patient_sub_sharded_events";
/// Directory of merged splits inside a cohort.
pub const FINAL_COHORT_DIR: &str = "final_cohort";

/// Settings shared by every orchestrator.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub options: MaterializeOptions,
    pub policy: StalenessPolicy,
    /// Seed for the work order; `None` draws one from the OS.
    pub seed: Option<u64>,
    pub shuffle: bool,
    pub show_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            options: MaterializeOptions::default(),
            policy: StalenessPolicy::default(),
            seed: None,
            shuffle: true,
            show_progress: true,
        }
    }
}

impl RunSettings {
    fn materializer(&self) -> Materializer {
        Materializer::new().with_policy(self.policy)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    fn order<T>(&self, items: &mut [T], rng: &mut StdRng) {
        if self.shuffle {
            items.shuffle(rng);
        }
    }

    fn run<T: Stage>(
        &self,
        materializer: &Materializer,
        item: &WorkItem<T>,
        report: &mut RunReport,
    ) -> Result<()> {
        let options = self.options.with_return_result(false);
        let outcome = materializer
            .materialize(item, &options)
            .with_context(|| format!("Failed to materialize {}", item.output.display()))?;
        report.record(item.output.clone(), outcome.decision());
        Ok(())
    }
}

/// Inputs of the `shard-events` stage.
#[derive(Debug, Clone)]
pub struct ShardEventsConfig {
    pub raw_dir: PathBuf,
    pub cohort_dir: PathBuf,
    pub row_chunk_size: usize,
    pub scan: ScanOptions,
    /// Table stems to process; empty processes every table.
    pub tables: Vec<String>,
}

/// Split every raw table into row chunks under `<cohort>/sub_sharded/<stem>/`.
pub fn shard_events(config: &ShardEventsConfig, settings: &RunSettings) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport::new("shard-events");
    let mut rng = settings.rng();
    let materializer = settings.materializer();

    let mut tables = select_tables(
        discover_raw_tables(&config.raw_dir).context("Failed to discover raw tables")?,
        &config.tables,
    );
    settings.order(&mut tables, &mut rng);
    info!(
        tables = tables.len(),
        raw_dir = %config.raw_dir.display(),
        "starting event sub-sharding"
    );

    for table in &tables {
        let span = info_span!("table", stem = %table.stem);
        let _guard = span.enter();
        let out_dir = config.cohort_dir.join(SUB_SHARDED_DIR).join(&table.stem);

        let lf = scan_with_row_idx(&table.path, &config.scan)
            .with_context(|| format!("Failed to scan {}", table.path.display()))?;
        let rows = count_rows(lf)
            .with_context(|| format!("Failed to count rows of {}", table.path.display()))?;
        let mut chunks = plan_row_chunks(rows, config.row_chunk_size)?;
        settings.order(&mut chunks, &mut rng);
        info!(
            rows,
            chunks = chunks.len(),
            chunk_size = config.row_chunk_size,
            "splitting table into row chunks"
        );

        let bar = progress_bar(chunks.len(), table.stem.clone(), settings.show_progress);
        for chunk in chunks {
            let item = WorkItem::new(
                &table.path,
                out_dir.join(chunk.file_name()),
                SubshardStage::new(config.scan.clone(), chunk),
            );
            settings.run(&materializer, &item, &mut report)?;
            bar.inc(1);
        }
        bar.finish_and_clear();
    }

    report.elapsed = start.elapsed();
    info!(elapsed_secs = report.elapsed.as_secs_f64(), "sub-sharding completed");
    Ok(report)
}

fn cohort_splits(cohort_dir: &Path) -> Result<Splits> {
    let splits = load_splits(&cohort_dir.join(SPLITS_FILE_NAME))?;
    if splits.is_empty() {
        warn!(cohort = %cohort_dir.display(), "no splits defined");
    }
    Ok(splits)
}

/// Merge each split's patient sub-shards into `<cohort>/final_cohort/<split>.parquet`.
pub fn merge_cohort(cohort_dir: &Path, settings: &RunSettings) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport::new("merge-cohort");
    let mut rng = settings.rng();
    let materializer = settings.materializer();

    let splits = cohort_splits(cohort_dir)?;
    let sub_sharded = cohort_dir.join(PATIENT_SUB_SHARDED_DIR);
    if !sub_sharded.is_dir() {
        bail!(
            "Patient sub-sharded directory not found: {}",
            sub_sharded.display()
        );
    }

    let mut names: Vec<&str> = splits.names().collect();
    settings.order(&mut names, &mut rng);
    info!(splits = names.len(), "starting patient shard merging");

    let bar = progress_bar(names.len(), "splits", settings.show_progress);
    for split in names {
        let output = cohort_dir
            .join(FINAL_COHORT_DIR)
            .join(format!("{split}.parquet"));
        let item = WorkItem::new(sub_sharded.join(split), output, MergeStage);
        settings.run(&materializer, &item, &mut report)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    report.elapsed = start.elapsed();
    info!("output cohort written");
    Ok(report)
}

/// Inputs of the `filter-codes` stage.
#[derive(Debug, Clone)]
pub struct FilterCodesConfig {
    pub cohort_dir: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub code_metadata: PathBuf,
    pub filter: CodeFilter,
}

/// Filter every split in `input_dir` to frequent codes, writing to `output_dir`.
pub fn filter_codes(config: &FilterCodesConfig, settings: &RunSettings) -> Result<RunReport> {
    let start = Instant::now();
    let mut report = RunReport::new("filter-codes");
    let mut rng = settings.rng();
    let materializer = settings.materializer();

    let splits = cohort_splits(&config.cohort_dir)?;
    let stage = FilterCodesStage::from_metadata_file(&config.filter, &config.code_metadata)?;
    if stage.is_identity() {
        warn!("no code thresholds set; splits are copied unchanged");
    }

    let mut names: Vec<&str> = splits.names().collect();
    settings.order(&mut names, &mut rng);
    info!(splits = names.len(), "starting code filtering");

    let bar = progress_bar(names.len(), "splits", settings.show_progress);
    for split in names {
        let file_name = format!("{split}.parquet");
        let item = WorkItem::new(
            config.input_dir.join(&file_name),
            config.output_dir.join(&file_name),
            &stage,
        );
        settings.run(&materializer, &item, &mut report)?;
        bar.inc(1);
    }
    bar.finish_and_clear();

    report.elapsed = start.elapsed();
    Ok(report)
}

/// Every lock marker under `dir` with its owner and staleness. Read-only.
pub fn list_locks(dir: &Path, policy: StalenessPolicy) -> Result<Vec<LockListing>> {
    let storage = LocalStorage;
    let locks = LockManager::new(&storage, policy);
    let mut listings = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy();
        let Some(output_name) = name.strip_suffix(LOCK_SUFFIX) else {
            continue;
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let output = entry.path().with_file_name(output_name);
        let Some(state) = locks.inspect(&output)? else {
            continue;
        };
        listings.push(LockListing {
            marker: entry.path().to_path_buf(),
            age: state.age,
            owner: state.record.as_ref().map(LockRecord::owner),
            stale: policy.is_stale(&state),
        });
    }
    Ok(listings)
}
