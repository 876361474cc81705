//! Detection of abandoned lock markers.
//!
//! A worker killed mid-computation leaves its marker behind. Without
//! reclamation the corresponding output would never be produced again, so a
//! marker is considered stale once it is older than a threshold, or as soon as
//! its owner is known to be dead.

#[cfg(windows)]
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use crate::lock::MarkerState;

/// Default age after which a lock marker is presumed abandoned.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Whether the recorded owner of a marker is consulted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OwnerCheck {
    /// Judge markers by age alone.
    Disabled,
    /// Also treat a marker as stale when its owner ran on this host and is no
    /// longer running.
    #[default]
    SameHost,
}

/// Rules for deciding whether a lock marker may be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    /// Age past which any marker is stale.
    pub threshold: Duration,
    /// Owner liveness check.
    pub owner_check: OwnerCheck,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_STALE_AFTER,
            owner_check: OwnerCheck::default(),
        }
    }
}

impl StalenessPolicy {
    /// Policy with the given threshold and the default owner check.
    #[must_use]
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    /// Set the age threshold.
    #[must_use]
    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set the owner liveness check.
    #[must_use]
    pub fn with_owner_check(mut self, owner_check: OwnerCheck) -> Self {
        self.owner_check = owner_check;
        self
    }

    /// Returns true if the marker represents an abandoned computation.
    pub fn is_stale(&self, marker: &MarkerState) -> bool {
        if marker.age > self.threshold {
            return true;
        }
        if self.owner_check == OwnerCheck::Disabled {
            return false;
        }
        match &marker.record {
            Some(record) if record.hostname == local_hostname() => {
                !is_process_running(record.process_id)
            }
            _ => false,
        }
    }
}

/// Hostname of this machine, resolved once.
pub fn local_hostname() -> &'static str {
    static HOSTNAME: OnceLock<String> = OnceLock::new();
    HOSTNAME.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string())
    })
}

/// Check if a process with the given PID is running on this host.
pub fn is_process_running(pid: u32) -> bool {
    if pid == std::process::id() {
        return true;
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Zero and negative pids address process groups, not a process.
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => signal_probe_alive(kill(Pid::from_raw(raw), None)),
            _ => true,
        }
    }

    #[cfg(windows)]
    {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output()
            .ok()
            .and_then(|output| String::from_utf8(output.stdout).ok())
            .map(|s| s.contains(&pid.to_string()))
            .unwrap_or(true)
    }

    #[cfg(not(any(unix, windows)))]
    {
        tracing::warn!("process detection not supported on this platform");
        true
    }
}

/// Interprets the result of sending signal 0 to a process.
///
/// Only `ESRCH` proves the process is gone. `EPERM` means it exists but
/// belongs to another user.
#[cfg(unix)]
fn signal_probe_alive(result: nix::Result<()>) -> bool {
    !matches!(result, Err(nix::errno::Errno::ESRCH))
}
