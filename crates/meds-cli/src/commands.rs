use std::time::Duration;

use anyhow::Result;
use meds_ingest::ScanOptions;
use meds_materialize::{MaterializeOptions, OwnerCheck, StalenessPolicy};
use meds_transform::CodeFilter;
use tracing::info_span;

use meds_cli::orchestrate::{
    FilterCodesConfig, RunSettings, ShardEventsConfig, filter_codes, list_locks, merge_cohort,
    shard_events,
};
use meds_cli::types::{LockListing, RunReport};

use crate::cli::{
    FilterCodesArgs, LocksArgs, MaterializeArgs, MergeCohortArgs, ShardEventsArgs, StalenessArgs,
};

fn staleness_policy(args: StalenessArgs) -> StalenessPolicy {
    let owner_check = if args.no_owner_check {
        OwnerCheck::Disabled
    } else {
        OwnerCheck::SameHost
    };
    StalenessPolicy::new(Duration::from_secs(args.stale_after_secs)).with_owner_check(owner_check)
}

fn run_settings(args: MaterializeArgs) -> RunSettings {
    RunSettings {
        options: MaterializeOptions::default().with_force_overwrite(args.overwrite),
        policy: staleness_policy(args.staleness),
        seed: args.seed,
        shuffle: !args.no_shuffle,
        show_progress: true,
    }
}

pub fn run_shard_events(args: &ShardEventsArgs) -> Result<RunReport> {
    let span = info_span!("shard_events", cohort = %args.cohort_dir.display());
    let _guard = span.enter();
    let config = ShardEventsConfig {
        raw_dir: args.raw_dir.clone(),
        cohort_dir: args.cohort_dir.clone(),
        row_chunk_size: args.row_chunk_size,
        scan: ScanOptions::default()
            .with_infer_schema_length(Some(args.infer_schema_length))
            .with_columns(args.columns.clone()),
        tables: args.tables.clone(),
    };
    shard_events(&config, &run_settings(args.materialize))
}

pub fn run_merge_cohort(args: &MergeCohortArgs) -> Result<RunReport> {
    let span = info_span!("merge_cohort", cohort = %args.cohort_dir.display());
    let _guard = span.enter();
    merge_cohort(&args.cohort_dir, &run_settings(args.materialize))
}

pub fn run_filter_codes(args: &FilterCodesArgs) -> Result<RunReport> {
    let span = info_span!("filter_codes", cohort = %args.cohort_dir.display());
    let _guard = span.enter();
    let config = FilterCodesConfig {
        cohort_dir: args.cohort_dir.clone(),
        input_dir: args.input_dir.clone(),
        output_dir: args.output_dir.clone(),
        code_metadata: args.code_metadata.clone(),
        filter: CodeFilter::default()
            .with_min_patients(args.min_patients_per_code)
            .with_min_occurrences(args.min_occurrences_per_code)
            .with_modifier_columns(args.modifier_columns.clone()),
    };
    filter_codes(&config, &run_settings(args.materialize))
}

pub fn run_locks(args: &LocksArgs) -> Result<Vec<LockListing>> {
    list_locks(&args.dir, staleness_policy(args.staleness))
}
