//! Locked, idempotent artifact materialization.
//!
//! Pipeline stages run as many independent processes over a shared
//! filesystem, each producing one artifact per shard. This crate turns a
//! stage's read / compute / write recipe into an operation that is safe to
//! run concurrently and to re-run after a crash:
//!
//! - completed outputs are cache hits and cost no locking;
//! - a per-output lock marker keeps peers from duplicating work, and a
//!   worker that finds a live marker skips the item instead of waiting;
//! - markers abandoned by crashed workers are reclaimed once stale;
//! - artifacts are written to a temporary sibling and renamed into place, so
//!   no reader ever sees a partial file.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use meds_materialize::{FnStage, MaterializeOptions, Materializer, WorkItem};
//!
//! let stage = FnStage::new(
//!     |input: &Path| Ok(std::fs::read_to_string(input)?),
//!     |text: String| Ok(text.to_uppercase()),
//!     |text: &String, out: &Path| Ok(std::fs::write(out, text)?),
//! );
//! let item = WorkItem::new("raw/notes.txt", "out/notes.txt", stage);
//! let outcome = Materializer::new()
//!     .materialize(&item, &MaterializeOptions::default())
//!     .unwrap();
//! println!("{}", outcome.decision());
//! ```

mod cache;
mod error;
mod lock;
mod materializer;
mod stage;
mod stale;
mod storage;

pub use cache::{CacheDecision, should_skip};
pub use error::{BoxError, MaterializeError, Result};
pub use lock::{Acquisition, LOCK_SUFFIX, LockGuard, LockManager, LockRecord, MarkerState, marker_path};
pub use materializer::{
    MaterializeOptions, Materializer, Outcome, cache_dir_path, temp_path,
};
pub use stage::{FnStage, Stage, Step, WorkItem};
pub use stale::{
    DEFAULT_STALE_AFTER, OwnerCheck, StalenessPolicy, is_process_running, local_hostname,
};
pub use storage::{LocalStorage, Storage};
