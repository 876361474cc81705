//! Read → compute → write, made safe across uncoordinated processes.
//!
//! For each work item the materializer:
//!
//! 1. returns early if the output already exists (no lock taken);
//! 2. fails with [`MaterializeError::MissingInput`] if the input is absent;
//! 3. tries to take the output's lock marker, skipping the item if a live
//!    peer holds it (reclaiming a stale marker once);
//! 4. reads, runs the compute steps, writes to a temporary sibling and
//!    renames it onto the output;
//! 5. releases the lock and optionally loads the published artifact back.
//!
//! Nothing is shared in memory between workers. Safety comes from the
//! filesystem: exclusive create for the marker, atomic rename for publish.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

use crate::cache::{CacheDecision, should_skip};
use crate::error::{MaterializeError, Result};
use crate::lock::{Acquisition, LockGuard, LockManager, LockRecord};
use crate::stage::{Stage, Step, WorkItem};
use crate::stale::StalenessPolicy;
use crate::storage::{LocalStorage, Storage};

const TEMP_SUFFIX: &str = ".tmp";
const CACHE_DIR_SUFFIX: &str = ".cache";

/// Per-call materialization options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterializeOptions {
    /// Recompute even if the output exists. The old artifact is replaced
    /// atomically, never deleted first.
    pub force_overwrite: bool,
    /// Load and return the artifact as stored on disk.
    pub return_result: bool,
    /// Checkpoint intermediate results of multi-step stages.
    pub cache_intermediate: bool,
    /// Remove checkpointed intermediates after a successful publish.
    pub clear_cache_on_completion: bool,
}

impl Default for MaterializeOptions {
    fn default() -> Self {
        Self {
            force_overwrite: false,
            return_result: true,
            cache_intermediate: true,
            clear_cache_on_completion: true,
        }
    }
}

impl MaterializeOptions {
    #[must_use]
    pub fn with_force_overwrite(mut self, enable: bool) -> Self {
        self.force_overwrite = enable;
        self
    }

    #[must_use]
    pub fn with_return_result(mut self, enable: bool) -> Self {
        self.return_result = enable;
        self
    }

    #[must_use]
    pub fn with_cache_intermediate(mut self, enable: bool) -> Self {
        self.cache_intermediate = enable;
        self
    }

    #[must_use]
    pub fn with_clear_cache_on_completion(mut self, enable: bool) -> Self {
        self.clear_cache_on_completion = enable;
        self
    }
}

/// Result of one materialization call.
#[derive(Debug)]
pub enum Outcome<D> {
    /// This call produced the artifact.
    Computed(Option<D>),
    /// The artifact already existed.
    CacheHit(Option<D>),
    /// A peer holds the lock; nothing was done.
    Locked,
}

impl<D> Outcome<D> {
    pub fn decision(&self) -> CacheDecision {
        match self {
            Self::Computed(_) => CacheDecision::Recompute,
            Self::CacheHit(_) => CacheDecision::SkipCacheHit,
            Self::Locked => CacheDecision::SkipLocked,
        }
    }

    /// The materialized value, or `None` for the empty sentinel.
    pub fn into_data(self) -> Option<D> {
        match self {
            Self::Computed(data) | Self::CacheHit(data) => data,
            Self::Locked => None,
        }
    }
}

/// Orchestrates cache check, locking, compute and atomic publish.
#[derive(Debug, Clone, Default)]
pub struct Materializer<S: Storage = LocalStorage> {
    storage: S,
    policy: StalenessPolicy,
}

impl Materializer<LocalStorage> {
    /// Materializer over the local filesystem with the default staleness
    /// policy.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Storage> Materializer<S> {
    pub fn with_storage(storage: S) -> Self {
        Self {
            storage,
            policy: StalenessPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: StalenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Lock manager sharing this materializer's storage and policy.
    pub fn locks(&self) -> LockManager<'_, S> {
        LockManager::new(&self.storage, self.policy)
    }

    /// Materialize one work item.
    ///
    /// Errors from the stage propagate after the lock is released; a partially
    /// written temporary file is discarded and never appears at the output.
    pub fn materialize<T: Stage>(
        &self,
        item: &WorkItem<T>,
        options: &MaterializeOptions,
    ) -> Result<Outcome<T::Data>> {
        let span = info_span!("materialize", output = %item.output.display());
        let _guard = span.enter();
        let output = item.output.as_path();

        if should_skip(&self.storage, output, options.force_overwrite) {
            info!("output exists; skipping");
            let data = if options.return_result {
                Some(self.load(&item.stage, output)?)
            } else {
                None
            };
            return Ok(Outcome::CacheHit(data));
        }

        if !self.storage.exists(&item.input) {
            return Err(MaterializeError::MissingInput {
                path: item.input.clone(),
            });
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.storage
                .create_dir_all(parent)
                .map_err(|e| MaterializeError::io(parent, e))?;
        }

        let lock = match self.locks().acquire(output)? {
            Acquisition::Acquired(lock) => lock,
            Acquisition::Conflict(state) => {
                info!(
                    owner = %state.record.as_ref().map_or_else(|| "unknown".to_string(), LockRecord::owner),
                    age_secs = state.age.as_secs(),
                    "output is being produced by another worker; skipping"
                );
                return Ok(Outcome::Locked);
            }
        };

        // A peer may have published between the cache check and the lock.
        if should_skip(&self.storage, output, options.force_overwrite) {
            release(lock);
            info!("output published by another worker; skipping");
            let data = if options.return_result {
                Some(self.load(&item.stage, output)?)
            } else {
                None
            };
            return Ok(Outcome::CacheHit(data));
        }

        self.sweep_orphaned_temps(output);
        self.compute_and_publish(item, options)?;
        // The artifact is published; a marker left behind is only reclaimed late.
        release(lock);
        info!("published artifact");

        let data = if options.return_result {
            Some(self.load(&item.stage, output)?)
        } else {
            None
        };
        Ok(Outcome::Computed(data))
    }

    fn compute_and_publish<T: Stage>(
        &self,
        item: &WorkItem<T>,
        options: &MaterializeOptions,
    ) -> Result<()> {
        let output = item.output.as_path();
        let steps = item.stage.steps();
        let cache_dir = cache_dir_path(output);
        let checkpoint = options.cache_intermediate && steps.len() > 1;

        let resumed = if checkpoint && !options.force_overwrite {
            self.latest_checkpoint(&item.stage, &cache_dir, steps.len())?
        } else {
            None
        };

        let (first_step, mut data) = match resumed {
            Some((index, data)) => (index + 1, data),
            None => {
                debug!(input = %item.input.display(), "reading input");
                let data = item
                    .stage
                    .read(&item.input)
                    .map_err(|e| MaterializeError::Read {
                        input: item.input.clone(),
                        source: e.into(),
                    })?;
                (0, data)
            }
        };

        let last = steps.len().saturating_sub(1);
        for (index, step) in steps.iter().enumerate().skip(first_step) {
            data = run_step(step, data, output)?;
            if checkpoint && index < last {
                self.storage
                    .create_dir_all(&cache_dir)
                    .map_err(|e| MaterializeError::io(&cache_dir, e))?;
                self.write_atomic(&item.stage, &data, &checkpoint_path(&cache_dir, index))?;
            }
        }

        self.write_atomic(&item.stage, &data, output)?;

        if checkpoint && options.clear_cache_on_completion {
            if let Err(e) = self.storage.remove_dir_all(&cache_dir) {
                warn!(cache_dir = %cache_dir.display(), "failed to clear intermediate cache: {e}");
            }
        }
        Ok(())
    }

    /// Highest completed checkpoint, loaded, if any.
    fn latest_checkpoint<T: Stage>(
        &self,
        stage: &T,
        cache_dir: &Path,
        step_count: usize,
    ) -> Result<Option<(usize, T::Data)>> {
        for index in (0..step_count - 1).rev() {
            let path = checkpoint_path(cache_dir, index);
            if self.storage.is_file(&path) {
                info!(step = index, "resuming from cached intermediate");
                let data = self.load(stage, &path)?;
                return Ok(Some((index, data)));
            }
        }
        Ok(None)
    }

    /// Write `data` beside `target` and rename it into place.
    fn write_atomic<T: Stage>(&self, stage: &T, data: &T::Data, target: &Path) -> Result<()> {
        let temp = temp_path(target);
        debug!(temp = %temp.display(), "writing temporary file");

        if let Err(e) = stage.write(data, &temp) {
            self.discard(&temp);
            return Err(MaterializeError::Write {
                path: target.to_path_buf(),
                source: e.into(),
            });
        }
        let published = self
            .storage
            .sync(&temp)
            .and_then(|()| self.storage.rename(&temp, target));
        if let Err(e) = published {
            self.discard(&temp);
            return Err(MaterializeError::io(target, e));
        }
        Ok(())
    }

    fn load<T: Stage>(&self, stage: &T, path: &Path) -> Result<T::Data> {
        stage.load(path).map_err(|e| MaterializeError::Load {
            path: path.to_path_buf(),
            source: e.into(),
        })
    }

    fn discard(&self, temp: &Path) {
        let removed = if self.storage.is_file(temp) {
            self.storage.remove(temp)
        } else {
            self.storage.remove_dir_all(temp)
        };
        if let Err(e) = removed {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(temp = %temp.display(), "failed to discard temporary file: {e}");
            }
        }
    }

    /// Remove temporaries for `output` left behind by crashed writers, next
    /// to the output and inside its checkpoint directory.
    fn sweep_orphaned_temps(&self, output: &Path) {
        let (Some(parent), Some(prefix)) = (output.parent(), temp_prefix(output)) else {
            return;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        self.sweep_dir(parent, &prefix);

        let cache_dir = cache_dir_path(output);
        if self.storage.exists(&cache_dir) {
            self.sweep_dir(&cache_dir, ".");
        }
    }

    fn sweep_dir(&self, dir: &Path, prefix: &str) {
        let Ok(entries) = self.storage.list_dir(dir) else {
            return;
        };

        for path in entries {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            if !name.starts_with(prefix) || !name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            match self.storage.modified_age(&path) {
                Ok(age) if age > self.policy.threshold => {
                    warn!(temp = %path.display(), "removing orphaned temporary file");
                    self.discard(&path);
                }
                _ => {}
            }
        }
    }
}

/// Release `lock`, logging rather than failing if the marker cannot be
/// removed. Staleness detection reclaims a marker left behind.
fn release<S: Storage>(lock: LockGuard<'_, S>) {
    let marker = lock.marker().to_path_buf();
    if let Err(e) = lock.release() {
        warn!(marker = %marker.display(), "failed to release lock: {e}");
    }
}

fn run_step<D>(step: &Step<'_, D>, data: D, output: &Path) -> Result<D> {
    debug!(step = step.name(), "running step");
    step.run(data).map_err(|e| MaterializeError::Compute {
        step: step.name().to_string(),
        output: output.to_path_buf(),
        source: e.into(),
    })
}

fn file_name(path: &Path) -> OsString {
    path.file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"))
}

fn temp_prefix(output: &Path) -> Option<String> {
    output
        .file_name()
        .map(|name| format!(".{}.", name.to_string_lossy()))
}

/// Unique temporary sibling of `target`: `.<name>.<uuid>.tmp`.
pub fn temp_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(file_name(target));
    name.push(format!(".{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));
    target.with_file_name(name)
}

/// Directory holding checkpointed intermediates: `.<name>.cache`.
pub fn cache_dir_path(output: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(file_name(output));
    name.push(CACHE_DIR_SUFFIX);
    output.with_file_name(name)
}

fn checkpoint_path(cache_dir: &Path, index: usize) -> PathBuf {
    cache_dir.join(format!("step_{index}"))
}
