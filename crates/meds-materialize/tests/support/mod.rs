//! Instrumented stages shared by the integration tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, bail};
use meds_materialize::{LOCK_SUFFIX, LocalStorage, LockRecord, Stage, Step, Storage};

/// Call counts observed across every clone of a stage.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    reads: Arc<AtomicUsize>,
    computes: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
}

impl Counters {
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn computes(&self) -> usize {
        self.computes.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

/// Upper-cases a text file.
#[derive(Debug, Clone, Default)]
pub struct UpperStage {
    pub counters: Counters,
    pub compute_delay: Duration,
    pub fail_compute: bool,
    pub fail_write: bool,
}

impl UpperStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.compute_delay = delay;
        self
    }
}

impl Stage for UpperStage {
    type Data = String;

    fn read(&self, input: &Path) -> anyhow::Result<String> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        fs::read_to_string(input).with_context(|| format!("read {}", input.display()))
    }

    fn transform(&self, data: String) -> anyhow::Result<String> {
        self.counters.computes.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.compute_delay);
        if self.fail_compute {
            bail!("injected compute failure");
        }
        Ok(data.to_uppercase())
    }

    fn write(&self, data: &String, path: &Path) -> anyhow::Result<()> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_write {
            // Leave a truncated file behind before failing.
            fs::write(path, &data[..data.len() / 2])?;
            bail!("injected write failure");
        }
        fs::write(path, data)?;
        Ok(())
    }
}

/// Three steps: trim, upper-case, append a marker. Fails in the last step
/// while `fail_last` is set.
#[derive(Debug, Clone, Default)]
pub struct ThreeStepStage {
    pub step_runs: Arc<[AtomicUsize; 3]>,
    pub reads: Arc<AtomicUsize>,
    pub fail_last: Arc<AtomicBool>,
}

impl ThreeStepStage {
    pub fn runs(&self, step: usize) -> usize {
        self.step_runs[step].load(Ordering::SeqCst)
    }
}

impl Stage for ThreeStepStage {
    type Data = String;

    fn read(&self, input: &Path) -> anyhow::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(fs::read_to_string(input)?)
    }

    fn write(&self, data: &String, path: &Path) -> anyhow::Result<()> {
        fs::write(path, data)?;
        Ok(())
    }

    fn steps(&self) -> Vec<Step<'_, String>> {
        vec![
            Step::new("trim", |data: String| {
                self.step_runs[0].fetch_add(1, Ordering::SeqCst);
                Ok(data.trim().to_string())
            }),
            Step::new("upper", |data: String| {
                self.step_runs[1].fetch_add(1, Ordering::SeqCst);
                Ok(data.to_uppercase())
            }),
            Step::new("suffix", |data: String| {
                self.step_runs[2].fetch_add(1, Ordering::SeqCst);
                if self.fail_last.load(Ordering::SeqCst) {
                    bail!("injected failure in last step");
                }
                Ok(format!("{data}!"))
            }),
        ]
    }
}

/// Local storage with injectable faults and a log of every call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStorage {
    /// Every rename fails, standing in for a process killed between writing
    /// the temporary file and publishing it.
    pub fail_rename: bool,
    /// Lock markers cannot be removed.
    pub fail_marker_remove: bool,
    /// A peer re-creates a lock marker the moment it is removed.
    pub peer_recreates_marker: bool,
    log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedStorage {
    pub fn failing_rename() -> Self {
        Self {
            fail_rename: true,
            ..Self::default()
        }
    }

    pub fn stuck_marker() -> Self {
        Self {
            fail_marker_remove: true,
            ..Self::default()
        }
    }

    pub fn peer_wins_reclaim() -> Self {
        Self {
            peer_recreates_marker: true,
            ..Self::default()
        }
    }

    /// Calls made so far, as `"<op> <path>"`.
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().expect("log").clone()
    }

    /// Position of the first call matching `op` whose path satisfies `pred`.
    pub fn position(&self, op: &str, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.calls().iter().position(|call| {
            call.split_once(' ')
                .is_some_and(|(name, path)| name == op && pred(path))
        })
    }

    fn record(&self, op: &str, path: &Path) {
        self.log
            .lock()
            .expect("log")
            .push(format!("{op} {}", path.display()));
    }
}

fn is_marker(path: &Path) -> bool {
    path.to_string_lossy().ends_with(LOCK_SUFFIX)
}

impl Storage for ScriptedStorage {
    fn is_file(&self, path: &Path) -> bool {
        self.record("is_file", path);
        LocalStorage.is_file(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.record("exists", path);
        LocalStorage.exists(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.record("create_dir_all", path);
        LocalStorage.create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        self.record("remove_dir_all", path);
        LocalStorage.remove_dir_all(path)
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        self.record("list_dir", dir);
        LocalStorage.list_dir(dir)
    }

    fn sync(&self, path: &Path) -> io::Result<()> {
        self.record("sync", path);
        LocalStorage.sync(path)
    }

    fn create_exclusive(&self, path: &Path, contents: &[u8]) -> io::Result<bool> {
        self.record("create_exclusive", path);
        LocalStorage.create_exclusive(path, contents)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        self.record("read", path);
        LocalStorage.read(path)
    }

    fn modified_age(&self, path: &Path) -> io::Result<Duration> {
        self.record("modified_age", path);
        LocalStorage.modified_age(path)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        self.record("remove", path);
        if is_marker(path) {
            if self.fail_marker_remove {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "marker is read-only"));
            }
            if self.peer_recreates_marker {
                LocalStorage.remove(path)?;
                let output = PathBuf::from(
                    path.to_string_lossy()
                        .trim_end_matches(LOCK_SUFFIX)
                        .to_string(),
                );
                let peer = serde_json::to_vec(&LockRecord::new(&output))
                    .map_err(io::Error::other)?;
                LocalStorage.create_exclusive(path, &peer)?;
                return Ok(());
            }
        }
        LocalStorage.remove(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.record("rename", from);
        if self.fail_rename {
            return Err(io::Error::other("simulated termination before rename"));
        }
        LocalStorage.rename(from, to)
    }
}

/// Writes `contents` to `dir/name` and returns the path.
pub fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write input");
    path
}

/// Names of every entry in `dir`, sorted.
pub fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Backdates the modification time of `path`.
pub fn set_age(path: &Path, age: Duration) {
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("open for mtime");
    file.set_modified(std::time::SystemTime::now() - age)
        .expect("set mtime");
}
