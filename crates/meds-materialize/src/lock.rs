//! Per-output lock markers.
//!
//! A marker is a file next to the output (`<output>.lock`) created with
//! create-if-absent semantics. Its existence means a computation for that
//! output is in progress, or was abandoned. The marker is advisory: a stale
//! marker reclaimed by two workers at once can briefly be held twice, which
//! the atomic rename on publish makes harmless.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{MaterializeError, Result};
use crate::stale::{StalenessPolicy, local_hostname};
use crate::storage::Storage;

/// Suffix appended to an output's file name to form its lock marker.
pub const LOCK_SUFFIX: &str = ".lock";

/// Returns the lock marker path for an output path.
pub fn marker_path(output: &Path) -> PathBuf {
    let mut path = output.as_os_str().to_os_string();
    path.push(LOCK_SUFFIX);
    PathBuf::from(path)
}

/// Metadata stored in a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Unique per acquisition; release only removes a marker carrying it.
    pub token: String,
    pub process_id: u32,
    pub hostname: String,
    pub output: PathBuf,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    /// Record for the current process acquiring `output`.
    pub fn new(output: &Path) -> Self {
        Self {
            token: Uuid::new_v4().to_string(),
            process_id: std::process::id(),
            hostname: local_hostname().to_string(),
            output: output.to_path_buf(),
            acquired_at: Utc::now(),
        }
    }

    /// Human-readable owner description.
    pub fn owner(&self) -> String {
        format!(
            "PID {} on {} (acquired {})",
            self.process_id,
            self.hostname,
            self.acquired_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
    }
}

/// Observed state of an existing marker.
#[derive(Debug, Clone)]
pub struct MarkerState {
    /// Time since the marker was last modified.
    pub age: Duration,
    /// Parsed payload; `None` if the marker is empty or unreadable.
    pub record: Option<LockRecord>,
}

/// Result of a lock acquisition attempt.
#[derive(Debug)]
pub enum Acquisition<'a, S: Storage> {
    /// This worker now holds the marker.
    Acquired(LockGuard<'a, S>),
    /// Another worker holds a live marker.
    Conflict(MarkerState),
}

/// Creates, inspects and reclaims lock markers.
#[derive(Debug, Clone, Copy)]
pub struct LockManager<'a, S: Storage> {
    storage: &'a S,
    policy: StalenessPolicy,
}

impl<'a, S: Storage> LockManager<'a, S> {
    pub fn new(storage: &'a S, policy: StalenessPolicy) -> Self {
        Self { storage, policy }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Try to acquire the marker for `output`.
    ///
    /// Never blocks. When a marker exists and is stale (or disappears while
    /// being inspected), it is removed and acquisition is retried once; a
    /// second conflict is reported as a normal conflict.
    pub fn acquire(&self, output: &Path) -> Result<Acquisition<'a, S>> {
        let marker = marker_path(output);
        if let Some(guard) = self.try_create(output, &marker)? {
            return Ok(Acquisition::Acquired(guard));
        }

        match self.inspect_marker(&marker)? {
            Some(state) if !self.policy.is_stale(&state) => {
                return Ok(Acquisition::Conflict(state));
            }
            Some(state) => {
                warn!(
                    marker = %marker.display(),
                    age_secs = state.age.as_secs(),
                    owner = %state.record.as_ref().map_or_else(|| "unknown".to_string(), LockRecord::owner),
                    "reclaiming stale lock"
                );
                self.storage
                    .remove(&marker)
                    .map_err(|e| MaterializeError::io(&marker, e))?;
            }
            None => debug!(marker = %marker.display(), "lock released during inspection"),
        }

        match self.try_create(output, &marker)? {
            Some(guard) => Ok(Acquisition::Acquired(guard)),
            None => {
                let state = self.inspect_marker(&marker)?.unwrap_or(MarkerState {
                    age: Duration::ZERO,
                    record: None,
                });
                Ok(Acquisition::Conflict(state))
            }
        }
    }

    /// Current state of the marker for `output`, if one exists.
    pub fn inspect(&self, output: &Path) -> Result<Option<MarkerState>> {
        self.inspect_marker(&marker_path(output))
    }

    fn inspect_marker(&self, marker: &Path) -> Result<Option<MarkerState>> {
        let age = match self.storage.modified_age(marker) {
            Ok(age) => age,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MaterializeError::io(marker, e)),
        };
        let record = match self.storage.read(marker) {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MaterializeError::io(marker, e)),
        };
        Ok(Some(MarkerState { age, record }))
    }

    fn try_create(&self, output: &Path, marker: &Path) -> Result<Option<LockGuard<'a, S>>> {
        let record = LockRecord::new(output);
        let payload = serde_json::to_vec_pretty(&record)
            .map_err(|e| MaterializeError::io(marker, io::Error::other(e)))?;

        let created = self
            .storage
            .create_exclusive(marker, &payload)
            .map_err(|e| MaterializeError::io(marker, e))?;
        if !created {
            return Ok(None);
        }

        debug!(marker = %marker.display(), "acquired lock");
        Ok(Some(LockGuard {
            storage: self.storage,
            marker: marker.to_path_buf(),
            token: record.token,
            released: false,
        }))
    }
}

/// RAII guard for a held lock marker.
///
/// Removes the marker when dropped, on normal return and on error
/// propagation alike. A killed process never runs this, which is what
/// staleness detection is for.
#[derive(Debug)]
pub struct LockGuard<'a, S: Storage> {
    storage: &'a S,
    marker: PathBuf,
    token: String,
    released: bool,
}

impl<S: Storage> LockGuard<'_, S> {
    /// Path of the held marker.
    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Token identifying this acquisition.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock, reporting any failure to remove the marker.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_if_owned()
            .map_err(|e| MaterializeError::io(&self.marker, e))
    }

    fn remove_if_owned(&self) -> io::Result<()> {
        let bytes = match self.storage.read(&self.marker) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(marker = %self.marker.display(), "lock vanished before release");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<LockRecord>(&bytes) {
            Ok(record) if record.token == self.token => {
                self.storage.remove(&self.marker)?;
                debug!(marker = %self.marker.display(), "released lock");
            }
            Ok(record) => warn!(
                marker = %self.marker.display(),
                owner = %record.owner(),
                "lock was reclaimed by another worker; leaving it in place"
            ),
            Err(_) => warn!(
                marker = %self.marker.display(),
                "lock payload unreadable; leaving it in place"
            ),
        }
        Ok(())
    }
}

impl<S: Storage> Drop for LockGuard<'_, S> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.remove_if_owned() {
            warn!(marker = %self.marker.display(), "failed to release lock: {e}");
        }
    }
}
