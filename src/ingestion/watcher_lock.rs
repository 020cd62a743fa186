//! Single watcher host per database directory.
//!
//! The pending queue and per-path serialization live in one process, so two
//! watchers on the same ingest directory would race each other. Whoever runs
//! a watcher holds an exclusive advisory lock on `watcher.lock`; the OS drops
//! it when the process exits, so a crash never leaves a stale lock behind.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum WatcherLockError {
    #[error("Another watcher is already running ({holder}); lock file {path:?}")]
    Held { path: PathBuf, holder: String },

    #[error("Could not open watcher lock {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Held for as long as the watcher runs.
#[derive(Debug)]
pub struct WatcherLock {
    path: PathBuf,
    file: File,
}

impl WatcherLock {
    /// Takes the lock, recording this process as the holder.
    pub fn acquire(path: &Path, ingest_dir: &Path) -> Result<Self, WatcherLockError> {
        let io_err = |source| WatcherLockError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        if file.try_lock_exclusive().is_err() {
            let mut holder = String::new();
            if file.read_to_string(&mut holder).is_err() {
                holder.clear();
            }
            let holder = holder.trim();
            return Err(WatcherLockError::Held {
                path: path.to_path_buf(),
                holder: if holder.is_empty() {
                    "unknown process".to_string()
                } else {
                    holder.to_string()
                },
            });
        }

        file.set_len(0).map_err(io_err)?;
        file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        write!(file, "pid {} watching {}", std::process::id(), ingest_dir.display())
            .map_err(io_err)?;
        file.flush().map_err(io_err)?;
        debug!("Acquired watcher lock {:?}", path);

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WatcherLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("Releasing watcher lock {:?} failed: {}", self.path, err);
        }
    }
}
