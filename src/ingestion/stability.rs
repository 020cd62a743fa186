//! Poll-based detection of files that have finished being written.

use super::file_operator::FileOperator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Observation {
    size: u64,
    modified: Option<SystemTime>,
    unchanged_since: Instant,
    emitted: bool,
}

/// Tracks size and mtime of every whitelisted file under a root and reports
/// a file once both stayed unchanged for the stability window across two
/// polls. A reported file is not reported again until it changes.
pub struct StableFileDetector {
    operator: Arc<FileOperator>,
    root: PathBuf,
    recursive: bool,
    window: Duration,
    observations: HashMap<PathBuf, Observation>,
}

impl StableFileDetector {
    pub fn new(
        operator: Arc<FileOperator>,
        root: impl Into<PathBuf>,
        recursive: bool,
        window: Duration,
    ) -> Self {
        Self {
            operator,
            root: root.into(),
            recursive,
            window,
            observations: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Number of files currently being watched.
    pub fn tracked(&self) -> usize {
        self.observations.len()
    }

    /// Drops any state for `path`, so it is treated as new on the next poll.
    pub fn forget(&mut self, path: &Path) {
        self.observations.remove(path);
    }

    pub fn poll(&mut self) -> Vec<PathBuf> {
        self.poll_at(Instant::now())
    }

    pub fn poll_at(&mut self, now: Instant) -> Vec<PathBuf> {
        let files = match self.operator.list_files(&self.root, self.recursive) {
            Ok(files) => files,
            Err(err) => {
                warn!("Failed to list {:?}: {}", self.root, err);
                return Vec::new();
            }
        };

        let mut seen = HashMap::with_capacity(files.len());
        let mut stable = Vec::new();

        for path in files {
            let meta = match std::fs::metadata(&path) {
                Ok(meta) => meta,
                // vanished between listing and stat
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => {
                    warn!("Skipping {:?} this pass: {}", path, err);
                    if let Some(previous) = self.observations.get(&path) {
                        seen.insert(path, *previous);
                    }
                    continue;
                }
            };
            let size = meta.len();
            let modified = meta.modified().ok();

            let observation = match self.observations.get(&path) {
                Some(previous) if previous.size == size && previous.modified == modified => {
                    let mut current = *previous;
                    if !current.emitted && now.duration_since(current.unchanged_since) >= self.window {
                        current.emitted = true;
                        stable.push(path.clone());
                    }
                    current
                }
                Some(_) => {
                    debug!("{:?} changed, restarting stability window", path);
                    Observation {
                        size,
                        modified,
                        unchanged_since: now,
                        emitted: false,
                    }
                }
                None => Observation {
                    size,
                    modified,
                    unchanged_since: now,
                    emitted: false,
                },
            };
            seen.insert(path, observation);
        }

        self.observations = seen;
        stable
    }
}
