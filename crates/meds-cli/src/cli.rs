//! CLI argument definitions for the MEDS extraction pipeline.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "meds",
    version,
    about = "Sharded, restartable extraction of raw medical tables into MEDS cohorts",
    long_about = "Run one stage of the MEDS extraction pipeline.\n\n\
                  Any number of workers may run the same stage concurrently on a shared\n\
                  filesystem: each output is produced exactly once, existing outputs are\n\
                  reused, and a killed worker's outputs are picked up by later runs."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Append logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Split raw tables into row-chunk sub-shards.
    ShardEvents(ShardEventsArgs),

    /// Merge patient sub-shards into one file per split.
    MergeCohort(MergeCohortArgs),

    /// Drop events whose codes are too rare.
    FilterCodes(FilterCodesArgs),

    /// List lock markers left under a directory.
    Locks(LocksArgs),
}

/// Lock staleness flags.
#[derive(Args, Clone, Copy)]
pub struct StalenessArgs {
    /// Age in seconds after which a lock is presumed abandoned.
    #[arg(long = "stale-after-secs", value_name = "SECS", default_value_t = 86_400)]
    pub stale_after_secs: u64,

    /// Judge locks by age only, even when their owner ran on this host.
    #[arg(long = "no-owner-check")]
    pub no_owner_check: bool,
}

/// Flags shared by every materializing stage.
#[derive(Args, Clone, Copy)]
pub struct MaterializeArgs {
    /// Recompute outputs that already exist.
    #[arg(long = "overwrite")]
    pub overwrite: bool,

    #[command(flatten)]
    pub staleness: StalenessArgs,

    /// Seed for the randomized work order.
    #[arg(long = "seed", value_name = "N")]
    pub seed: Option<u64>,

    /// Process work items in their natural order.
    #[arg(long = "no-shuffle")]
    pub no_shuffle: bool,
}

#[derive(Parser)]
pub struct ShardEventsArgs {
    /// Directory holding the raw csv/parquet tables.
    #[arg(long = "raw-dir", value_name = "DIR")]
    pub raw_dir: PathBuf,

    /// Cohort output directory.
    #[arg(long = "cohort-dir", value_name = "DIR")]
    pub cohort_dir: PathBuf,

    /// Rows per sub-shard.
    #[arg(long = "row-chunk-size", value_name = "ROWS", default_value_t = 200_000)]
    pub row_chunk_size: usize,

    /// Rows sampled to infer csv column types.
    #[arg(long = "infer-schema-length", value_name = "ROWS", default_value_t = 10_000)]
    pub infer_schema_length: usize,

    /// Only process these tables (file stems). Repeatable.
    #[arg(long = "table", value_name = "STEM")]
    pub tables: Vec<String>,

    /// Only keep these columns. Repeatable.
    #[arg(long = "column", value_name = "NAME")]
    pub columns: Vec<String>,

    #[command(flatten)]
    pub materialize: MaterializeArgs,
}

#[derive(Parser)]
pub struct MergeCohortArgs {
    /// Cohort directory containing splits.json and patient sub-shards.
    #[arg(long = "cohort-dir", value_name = "DIR")]
    pub cohort_dir: PathBuf,

    #[command(flatten)]
    pub materialize: MaterializeArgs,
}

#[derive(Parser)]
pub struct FilterCodesArgs {
    /// Cohort directory containing splits.json.
    #[arg(long = "cohort-dir", value_name = "DIR")]
    pub cohort_dir: PathBuf,

    /// Directory with one `<split>.parquet` per split.
    #[arg(long = "input-dir", value_name = "DIR")]
    pub input_dir: PathBuf,

    /// Directory receiving the filtered splits.
    #[arg(long = "output-dir", value_name = "DIR")]
    pub output_dir: PathBuf,

    /// Parquet file of per-code counts.
    #[arg(long = "code-metadata", value_name = "PATH")]
    pub code_metadata: PathBuf,

    /// Keep codes seen in at least this many patients.
    #[arg(long = "min-patients-per-code", value_name = "N")]
    pub min_patients_per_code: Option<u64>,

    /// Keep codes seen at least this many times.
    #[arg(long = "min-occurrences-per-code", value_name = "N")]
    pub min_occurrences_per_code: Option<u64>,

    /// Columns that qualify a code. Repeatable.
    #[arg(long = "modifier-column", value_name = "NAME")]
    pub modifier_columns: Vec<String>,

    #[command(flatten)]
    pub materialize: MaterializeArgs,
}

#[derive(Parser)]
pub struct LocksArgs {
    /// Directory to search recursively.
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    #[command(flatten)]
    pub staleness: StalenessArgs,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
