//! Filesystem primitives used for cross-process coordination.
//!
//! Every guarantee the materializer makes rests on three operations being
//! atomic on the target filesystem: exclusive create, remove, and rename.
//! They and every other filesystem access of the core are gathered behind
//! [`Storage`] so a different backend can be used without touching call
//! sites.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

/// Coordination primitives over a shared namespace of paths.
pub trait Storage: Send + Sync {
    /// Returns true if `path` exists and is a regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Returns true if `path` exists (file or directory).
    fn exists(&self, path: &Path) -> bool;

    /// Creates `path` and any missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Removes a directory and everything below it. A missing directory is
    /// not an error.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Paths of the entries directly inside `dir`.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Flushes the contents of `path` to durable storage. Directories are
    /// flushed file by file.
    fn sync(&self, path: &Path) -> io::Result<()>;

    /// Creates `path` only if it does not exist and writes `contents` to it.
    ///
    /// Returns `Ok(false)` when the entry already exists. Of several callers
    /// racing on the same path, exactly one observes `Ok(true)`.
    fn create_exclusive(&self, path: &Path, contents: &[u8]) -> io::Result<bool>;

    /// Reads the full contents of `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Time elapsed since `path` was last modified.
    fn modified_age(&self, path: &Path) -> io::Result<Duration>;

    /// Removes `path`. A missing entry is not an error.
    fn remove(&self, path: &Path) -> io::Result<()>;

    /// Atomically moves `from` onto `to`, replacing any existing file.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`Storage`] backed by the local (or network-mounted) filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl Storage for LocalStorage {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn list_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        fs::read_dir(dir)?
            .map(|entry| entry.map(|e| e.path()))
            .collect()
    }

    fn sync(&self, path: &Path) -> io::Result<()> {
        if path.is_dir() {
            for entry in self.list_dir(path)? {
                self.sync(&entry)?;
            }
            return Ok(());
        }
        File::open(path)?.sync_all()
    }

    fn create_exclusive(&self, path: &Path, contents: &[u8]) -> io::Result<bool> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => return Err(e),
        };

        if let Err(e) = file.write_all(contents).and_then(|()| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(path);
            return Err(e);
        }
        Ok(true)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn modified_age(&self, path: &Path) -> io::Result<Duration> {
        let modified = fs::metadata(path)?.modified()?;
        // Clock skew on shared filesystems can put mtimes in the future.
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO))
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}
