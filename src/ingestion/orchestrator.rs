//! Ingest orchestration.
//!
//! Stable files flow through the match engine into one of two paths:
//! - auto-accept: moved into the library and recorded in the ledger
//! - pending review: parked in memory until a human approves or rejects
//!
//! Every executed attempt first writes a `pending` ledger row, then moves the
//! file, then resolves the row to `success` or `failed`. A file is never left
//! moved without a terminal record: if the final write fails the move is
//! undone.

use super::file_operator::{FileOperator, FileOperatorError};
use super::ledger::IngestLedger;
use super::models::{
    DuplicateCriteria, IngestRecord, IngestStatistics, IngestStatus, NewIngestRecord,
    PendingQueueEntry, PendingReason, RecordQuery, RecordUpdate,
};
use super::stability::StableFileDetector;
use super::watcher_lock::{WatcherLock, WatcherLockError};
use crate::matching::{MatchCandidate, MatchEngine, MatchOutcome, UnmatchedReason};
use crate::media_server::CatalogClient;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Errors
// =============================================================================

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    NotFound,
    TransientExternal,
    Storage,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    File(#[from] FileOperatorError),

    /// The file operation failed after the attempt was recorded.
    #[error("Ingest {record_id} failed: {source}")]
    Transfer {
        record_id: i64,
        source: FileOperatorError,
    },

    #[error("No match for {path:?}: {reason}")]
    Unmatched {
        path: PathBuf,
        reason: UnmatchedReason,
    },

    #[error("{0:?} is not in the pending queue")]
    PendingNotFound(PathBuf),

    #[error("{0:?} has no match candidate; a destination is required")]
    NoCandidate(PathBuf),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Watcher is already running")]
    AlreadyRunning,

    #[error("Watcher is not running")]
    NotRunning,

    #[error("{0}")]
    WatcherLock(#[from] WatcherLockError),

    #[error("Ledger error: {0}")]
    Storage(String),
}

impl IngestError {
    pub fn category(&self) -> ErrorCategory {
        fn file_category(err: &FileOperatorError) -> ErrorCategory {
            match err {
                err if err.is_validation() => ErrorCategory::Validation,
                FileOperatorError::NotFound(_) => ErrorCategory::NotFound,
                _ => ErrorCategory::Storage,
            }
        }

        match self {
            IngestError::File(err) => file_category(err),
            IngestError::Transfer { source, .. } => file_category(source),
            IngestError::Unmatched {
                reason: UnmatchedReason::SearchFailed(_),
                ..
            } => ErrorCategory::TransientExternal,
            IngestError::Unmatched { .. } => ErrorCategory::NotFound,
            IngestError::PendingNotFound(_) => ErrorCategory::NotFound,
            IngestError::NoCandidate(_)
            | IngestError::InvalidSetting(_)
            | IngestError::AlreadyRunning
            | IngestError::NotRunning => ErrorCategory::Validation,
            IngestError::WatcherLock(WatcherLockError::Held { .. }) => ErrorCategory::Validation,
            IngestError::WatcherLock(WatcherLockError::Io { .. }) => ErrorCategory::Storage,
            IngestError::Storage(_) => ErrorCategory::Storage,
        }
    }

    fn storage(err: anyhow::Error) -> Self {
        IngestError::Storage(format!("{:#}", err))
    }
}

// =============================================================================
// Settings, status and results
// =============================================================================

/// Runtime-adjustable policy. Changes apply to files discovered afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherSettings {
    pub auto_ingest: bool,
    pub confidence_threshold: f64,
    pub stability_seconds: u64,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            auto_ingest: false,
            confidence_threshold: 0.85,
            stability_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub auto_ingest: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub stability_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub settings: WatcherSettings,
    pub poll_interval: Duration,
    pub max_workers: usize,
    pub recursive: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            settings: WatcherSettings::default(),
            poll_interval: Duration::from_secs(1),
            max_workers: 4,
            recursive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherStatus {
    pub running: bool,
    pub settings: WatcherSettings,
    pub pending: usize,
    pub processed: u64,
    pub auto_ingested: u64,
    pub queued: u64,
    pub failed: u64,
}

/// How a stable file was resolved by the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum FileDecision {
    AutoIngested(IngestRecord),
    Queued(PendingReason),
    Failed { record_id: Option<i64>, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Copy,
    Move,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenamePreview {
    pub filename: String,
    pub outcome: MatchOutcome,
    pub warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub filename: String,
    pub outcome: MatchOutcome,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub matched: usize,
    pub failed: usize,
    pub low_confidence: usize,
    pub confidence_threshold: f64,
    pub results: Vec<BatchItem>,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    auto_ingested: AtomicU64,
    queued: AtomicU64,
    failed: AtomicU64,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn validate_threshold(threshold: f64) -> Result<f64, IngestError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(IngestError::InvalidSetting(format!(
            "confidence_threshold must be within [0, 1], got {}",
            threshold
        )))
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

struct Inner {
    engine: Arc<MatchEngine>,
    ledger: Arc<dyn IngestLedger>,
    operator: Arc<FileOperator>,
    catalog: Option<Arc<dyn CatalogClient>>,
    watcher_lock: Option<PathBuf>,
    settings: RwLock<WatcherSettings>,
    detector: Mutex<StableFileDetector>,
    pending: Mutex<BTreeMap<PathBuf, PendingQueueEntry>>,
    path_locks: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
    counters: Counters,
    poll_interval: Duration,
    max_workers: usize,
    recursive: bool,
}

struct WatcherHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
    // released when the handle is dropped
    _lock: Option<WatcherLock>,
}

pub struct IngestOrchestrator {
    inner: Arc<Inner>,
    watcher: tokio::sync::Mutex<Option<WatcherHandle>>,
}

impl IngestOrchestrator {
    pub fn new(
        engine: Arc<MatchEngine>,
        ledger: Arc<dyn IngestLedger>,
        operator: Arc<FileOperator>,
        config: OrchestratorConfig,
    ) -> Result<Self, IngestError> {
        validate_threshold(config.settings.confidence_threshold)?;
        if config.max_workers == 0 {
            return Err(IngestError::InvalidSetting(
                "max_workers must be at least 1".to_string(),
            ));
        }

        let detector = StableFileDetector::new(
            operator.clone(),
            operator.ingest_root().to_path_buf(),
            config.recursive,
            Duration::from_secs(config.settings.stability_seconds),
        );

        Ok(Self {
            inner: Arc::new(Inner {
                engine,
                ledger,
                operator,
                catalog: None,
                watcher_lock: None,
                settings: RwLock::new(config.settings),
                detector: Mutex::new(detector),
                pending: Mutex::new(BTreeMap::new()),
                path_locks: Mutex::new(HashMap::new()),
                counters: Counters::default(),
                poll_interval: config.poll_interval,
                max_workers: config.max_workers,
                recursive: config.recursive,
            }),
            watcher: tokio::sync::Mutex::new(None),
        })
    }

    /// Enables a best-effort library rescan after each successful ingest.
    /// Must be called before the orchestrator is shared.
    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogClient>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.catalog = Some(catalog);
        }
        self
    }

    /// Makes `start` take an exclusive lock on `path`, so only one process
    /// watches the ingest directory. Must be called before the orchestrator
    /// is shared.
    pub fn with_watcher_lock(mut self, path: PathBuf) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.watcher_lock = Some(path);
        }
        self
    }

    pub fn engine(&self) -> &Arc<MatchEngine> {
        &self.inner.engine
    }

    pub fn catalog(&self) -> Option<&Arc<dyn CatalogClient>> {
        self.inner.catalog.as_ref()
    }

    // ==================== Watcher control ====================

    pub async fn start(&self) -> Result<(), IngestError> {
        let mut watcher = self.watcher.lock().await;
        if let Some(handle) = watcher.as_ref() {
            if !handle.task.is_finished() {
                return Err(IngestError::AlreadyRunning);
            }
        }
        // a finished loop still holds its lock
        watcher.take();

        let lock = match &self.inner.watcher_lock {
            Some(path) => Some(WatcherLock::acquire(path, self.inner.operator.ingest_root())?),
            None => None,
        };
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(watch_loop(self.inner.clone(), shutdown.clone()));
        *watcher = Some(WatcherHandle {
            shutdown,
            task,
            _lock: lock,
        });
        info!(
            "Watching {:?} for new media",
            self.inner.operator.ingest_root()
        );
        Ok(())
    }

    /// Stops the watch loop and waits for in-flight ingests to resolve.
    pub async fn stop(&self) -> Result<(), IngestError> {
        let handle = self.watcher.lock().await.take();
        let Some(handle) = handle else {
            return Err(IngestError::NotRunning);
        };
        handle.shutdown.cancel();
        if let Err(err) = handle.task.await {
            error!("Watch loop terminated abnormally: {}", err);
        }
        info!("Watcher stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.watcher
            .lock()
            .await
            .as_ref()
            .map(|handle| !handle.task.is_finished())
            .unwrap_or(false)
    }

    pub fn settings(&self) -> WatcherSettings {
        self.inner.settings.read().unwrap().clone()
    }

    pub fn configure(&self, update: SettingsUpdate) -> Result<WatcherSettings, IngestError> {
        if let Some(threshold) = update.confidence_threshold {
            validate_threshold(threshold)?;
        }

        let updated = {
            let mut settings = self.inner.settings.write().unwrap();
            if let Some(auto_ingest) = update.auto_ingest {
                settings.auto_ingest = auto_ingest;
            }
            if let Some(threshold) = update.confidence_threshold {
                settings.confidence_threshold = threshold;
            }
            if let Some(seconds) = update.stability_seconds {
                settings.stability_seconds = seconds;
            }
            settings.clone()
        };
        info!(
            "Watcher settings updated: auto_ingest={}, threshold={:.2}, stability={}s",
            updated.auto_ingest, updated.confidence_threshold, updated.stability_seconds
        );
        Ok(updated)
    }

    pub async fn status(&self) -> WatcherStatus {
        let running = self.is_running().await;
        let counters = &self.inner.counters;
        WatcherStatus {
            running,
            settings: self.settings(),
            pending: self.inner.pending.lock().unwrap().len(),
            processed: counters.processed.load(Ordering::Relaxed),
            auto_ingested: counters.auto_ingested.load(Ordering::Relaxed),
            queued: counters.queued.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Runs one detection pass and handles every stable file inline. Without
    /// a running watcher the pass holds the watcher lock itself.
    pub async fn scan_once(&self) -> Result<Vec<(PathBuf, FileDecision)>, IngestError> {
        let running = self.is_running().await;
        let _lock = match &self.inner.watcher_lock {
            Some(path) if !running => {
                Some(WatcherLock::acquire(path, self.inner.operator.ingest_root())?)
            }
            _ => None,
        };

        let stable = poll_detector(&self.inner).await;
        let mut decisions = Vec::with_capacity(stable.len());
        for path in stable {
            let decision = self.inner.handle_stable_file(&path).await;
            decisions.push((path, decision));
        }
        Ok(decisions)
    }

    /// Matches and decides a single stable file.
    pub async fn handle_stable_file(&self, path: &Path) -> FileDecision {
        self.inner.handle_stable_file(path).await
    }

    // ==================== Pending queue ====================

    /// Pending entries, oldest first.
    pub fn pending(&self) -> Vec<PendingQueueEntry> {
        let mut entries: Vec<_> = self
            .inner
            .pending
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.first_seen);
        entries
    }

    /// Executes a pending entry with its candidate or an explicit
    /// destination. A second call for the same source fails with
    /// `PendingNotFound`.
    pub async fn approve(
        &self,
        source: &Path,
        destination: Option<PathBuf>,
    ) -> Result<IngestRecord, IngestError> {
        let _guard = self.inner.lock_path(source).await;

        let entry = {
            let mut pending = self.inner.pending.lock().unwrap();
            let has_candidate = match pending.get(source) {
                Some(entry) => entry.candidate.is_some(),
                None => return Err(IngestError::PendingNotFound(source.to_path_buf())),
            };
            if !has_candidate && destination.is_none() {
                return Err(IngestError::NoCandidate(source.to_path_buf()));
            }
            pending.remove(source)
        };
        let Some(entry) = entry else {
            return Err(IngestError::PendingNotFound(source.to_path_buf()));
        };

        let destination = match (destination, &entry.candidate) {
            (Some(destination), _) => destination,
            (None, Some(candidate)) => candidate.destination.clone(),
            (None, None) => return Err(IngestError::NoCandidate(source.to_path_buf())),
        };

        info!("Approved {:?} -> {:?}", source, destination);
        let result = self
            .inner
            .execute(source, &destination, entry.candidate.as_ref(), TransferMode::Move)
            .await;
        match &result {
            Ok(_) => {}
            // recorded as failed: the attempt is resolved
            Err(IngestError::Transfer { .. }) => {
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                warn!("Approval of {:?} not recorded, keeping it queued: {}", source, err);
                self.inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .pending
                    .lock()
                    .unwrap()
                    .insert(source.to_path_buf(), entry);
            }
        }
        result
    }

    /// Drops a pending entry, optionally leaving a `failed` ledger record.
    pub async fn reject(
        &self,
        source: &Path,
        record_failure: bool,
    ) -> Result<Option<IngestRecord>, IngestError> {
        let _guard = self.inner.lock_path(source).await;

        let entry = self
            .inner
            .pending
            .lock()
            .unwrap()
            .remove(source)
            .ok_or_else(|| IngestError::PendingNotFound(source.to_path_buf()))?;
        info!("Rejected {:?}", source);

        if !record_failure {
            return Ok(None);
        }

        let destination = entry
            .candidate
            .as_ref()
            .map(|c| c.destination.display().to_string())
            .unwrap_or_default();
        let mut record = NewIngestRecord::new(source.display().to_string(), destination)
            .with_status(IngestStatus::Failed)
            .with_error(format!("Rejected by reviewer ({})", entry.reason));
        if let Some(candidate) = &entry.candidate {
            record = record.with_candidate(candidate);
        }
        let record = self
            .inner
            .ledger
            .add_record(record)
            .map_err(IngestError::storage)?;
        Ok(Some(record))
    }

    // ==================== Manual operations ====================

    /// Whitelisted files currently in the ingest root.
    pub fn list_ingest_files(&self) -> Result<Vec<PathBuf>, IngestError> {
        let operator = &self.inner.operator;
        Ok(operator.list_files(operator.ingest_root(), self.inner.recursive)?)
    }

    /// Ingests one file right away. Without a destination the match engine
    /// picks one. The attempt is always recorded once a destination is known.
    pub async fn ingest_file(
        &self,
        source: &Path,
        destination: Option<PathBuf>,
        mode: TransferMode,
    ) -> Result<IngestRecord, IngestError> {
        let _guard = self.inner.lock_path(source).await;

        let (destination, candidate) = match destination {
            Some(destination) => (destination, None),
            None => match self.inner.engine.match_file(&source.to_string_lossy()).await {
                MatchOutcome::Matched(candidate) => (candidate.destination.clone(), Some(candidate)),
                MatchOutcome::Unmatched(reason) => {
                    return Err(IngestError::Unmatched {
                        path: source.to_path_buf(),
                        reason,
                    })
                }
            },
        };

        let record = self
            .inner
            .execute(source, &destination, candidate.as_ref(), mode)
            .await?;
        self.inner.pending.lock().unwrap().remove(source);
        Ok(record)
    }

    pub async fn preview(&self, filename: &str) -> RenamePreview {
        let threshold = self.settings().confidence_threshold;
        let outcome = self.inner.engine.match_file(filename).await;
        let warning = match &outcome {
            MatchOutcome::Matched(candidate) if candidate.confidence < threshold => Some(format!(
                "Low confidence match ({:.2}). Verify before ingesting.",
                candidate.confidence
            )),
            _ => None,
        };
        RenamePreview {
            filename: filename.to_string(),
            outcome,
            warning,
        }
    }

    /// Identifies many names at once; a failure on one never affects the
    /// others.
    pub async fn batch_identify(
        &self,
        filenames: &[String],
        threshold: Option<f64>,
    ) -> Result<BatchReport, IngestError> {
        let threshold = match threshold {
            Some(threshold) => validate_threshold(threshold)?,
            None => self.settings().confidence_threshold,
        };

        let outcomes = self.inner.engine.match_batch(filenames).await;
        let mut report = BatchReport {
            total: filenames.len(),
            matched: 0,
            failed: 0,
            low_confidence: 0,
            confidence_threshold: threshold,
            results: Vec::with_capacity(filenames.len()),
        };

        for (filename, outcome) in filenames.iter().zip(outcomes) {
            let low_confidence = match outcome.candidate() {
                Some(candidate) => {
                    report.matched += 1;
                    candidate.confidence < threshold
                }
                None => {
                    report.failed += 1;
                    false
                }
            };
            if low_confidence {
                report.low_confidence += 1;
            }
            report.results.push(BatchItem {
                filename: filename.clone(),
                outcome,
                low_confidence,
            });
        }
        Ok(report)
    }

    // ==================== Ledger queries ====================

    pub fn history(&self, query: &RecordQuery) -> Result<Vec<IngestRecord>, IngestError> {
        self.inner
            .ledger
            .query_records(query)
            .map_err(IngestError::storage)
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<IngestRecord>, IngestError> {
        self.inner
            .ledger
            .recent_records(limit)
            .map_err(IngestError::storage)
    }

    pub fn record(&self, id: i64) -> Result<Option<IngestRecord>, IngestError> {
        self.inner.ledger.get_record(id).map_err(IngestError::storage)
    }

    pub fn check_duplicate(&self, criteria: &DuplicateCriteria) -> Result<bool, IngestError> {
        self.inner
            .ledger
            .is_duplicate(criteria)
            .map_err(IngestError::storage)
    }

    pub fn statistics(&self) -> Result<IngestStatistics, IngestError> {
        self.inner.ledger.statistics().map_err(IngestError::storage)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

impl Inner {
    /// Serializes work on one source path.
    async fn lock_path(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.path_locks.lock().unwrap();
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    async fn handle_stable_file(&self, path: &Path) -> FileDecision {
        let _guard = self.lock_path(path).await;
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        // policy is read once per file
        let settings = self.settings.read().unwrap().clone();
        let outcome = self.engine.match_file(&path.to_string_lossy()).await;

        let candidate = match outcome {
            MatchOutcome::Matched(candidate) => candidate,
            MatchOutcome::Unmatched(reason) => {
                return self.enqueue(path, None, PendingReason::Unmatched { reason });
            }
        };

        if !settings.auto_ingest {
            return self.enqueue(path, Some(candidate), PendingReason::AutoIngestDisabled);
        }
        if candidate.confidence < settings.confidence_threshold {
            let reason = PendingReason::BelowThreshold {
                threshold: settings.confidence_threshold,
            };
            return self.enqueue(path, Some(candidate), reason);
        }

        match self
            .ledger
            .is_duplicate(&DuplicateCriteria::external_id(candidate.external_id))
        {
            Ok(false) => {}
            Ok(true) => {
                let reason = PendingReason::Duplicate {
                    external_id: candidate.external_id,
                };
                return self.enqueue(path, Some(candidate), reason);
            }
            Err(err) => {
                error!("Duplicate check failed for {:?}: {:#}", path, err);
                let reason = PendingReason::LedgerUnavailable {
                    error: format!("{:#}", err),
                };
                return self.enqueue(path, Some(candidate), reason);
            }
        }

        info!(
            "Auto-ingesting {:?} as {} ({:.0}% confidence)",
            path,
            candidate.metadata.title,
            candidate.confidence * 100.0
        );
        let destination = candidate.destination.clone();
        match self
            .execute(path, &destination, Some(&candidate), TransferMode::Move)
            .await
        {
            Ok(record) => {
                self.pending.lock().unwrap().remove(path);
                self.counters.auto_ingested.fetch_add(1, Ordering::Relaxed);
                FileDecision::AutoIngested(record)
            }
            Err(IngestError::Transfer { record_id, source }) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                FileDecision::Failed {
                    record_id: Some(record_id),
                    error: source.to_string(),
                }
            }
            Err(err) => {
                // the ledger refused the attempt, so the file is still in place
                error!("Auto-ingest of {:?} not recorded: {}", path, err);
                let reason = PendingReason::LedgerUnavailable {
                    error: err.to_string(),
                };
                self.enqueue(path, Some(candidate), reason)
            }
        }
    }

    /// Parks a file for review, replacing any previous entry for the same
    /// path while keeping its first-seen time.
    fn enqueue(
        &self,
        path: &Path,
        candidate: Option<MatchCandidate>,
        reason: PendingReason,
    ) -> FileDecision {
        info!("Queued {:?} for review: {}", path, reason);
        let mut pending = self.pending.lock().unwrap();
        let first_seen = pending
            .get(path)
            .map(|entry| entry.first_seen)
            .unwrap_or_else(now_millis);
        pending.insert(
            path.to_path_buf(),
            PendingQueueEntry {
                source: path.to_path_buf(),
                candidate,
                reason: reason.clone(),
                first_seen,
            },
        );
        self.counters.queued.fetch_add(1, Ordering::Relaxed);
        FileDecision::Queued(reason)
    }

    /// Records the attempt, performs the transfer and resolves the record.
    async fn execute(
        &self,
        source: &Path,
        destination: &Path,
        candidate: Option<&MatchCandidate>,
        mode: TransferMode,
    ) -> Result<IngestRecord, IngestError> {
        let mut new_record =
            NewIngestRecord::new(source.display().to_string(), destination.display().to_string());
        if let Some(candidate) = candidate {
            new_record = new_record.with_candidate(candidate);
        }
        let record = self
            .ledger
            .add_record(new_record)
            .map_err(IngestError::storage)?;

        let transfer = match mode {
            TransferMode::Move => self.operator.move_file(source, destination).await,
            TransferMode::Copy => self.operator.copy_file(source, destination).await,
        };

        let placed = match transfer {
            Ok(placed) => placed,
            Err(err) => {
                warn!("Ingest of {:?} failed: {}", source, err);
                self.ledger
                    .update_record(record.id, RecordUpdate::failed(err.to_string()))
                    .map_err(IngestError::storage)?;
                return Err(IngestError::Transfer {
                    record_id: record.id,
                    source: err,
                });
            }
        };

        let update = RecordUpdate {
            destination_path: Some(placed.display().to_string()),
            ..RecordUpdate::success()
        };
        match self.ledger.update_record(record.id, update) {
            Ok(record) => {
                info!("Ingested {:?} -> {:?} (record {})", source, placed, record.id);
                self.request_rescan(placed);
                Ok(record)
            }
            Err(err) => {
                error!(
                    "Could not record success for {:?}, undoing transfer: {:#}",
                    source, err
                );
                let undo = match mode {
                    TransferMode::Move => self.operator.move_file(&placed, source).await.map(|_| ()),
                    TransferMode::Copy => self.operator.delete_file(&placed).await,
                };
                if let Err(undo_err) = undo {
                    error!("Failed to undo transfer of {:?}: {}", placed, undo_err);
                }
                Err(IngestError::storage(err))
            }
        }
    }

    /// Triggers a rescan of the library section holding `destination`.
    /// Failures are logged only.
    fn request_rescan(&self, destination: PathBuf) {
        let Some(catalog) = self.catalog.clone() else {
            return;
        };
        tokio::spawn(async move {
            let sections = match catalog.list_sections().await {
                Ok(sections) => sections,
                Err(err) => {
                    warn!("Could not list library sections for rescan: {}", err);
                    return;
                }
            };
            let section = sections.into_iter().find(|section| {
                section
                    .locations
                    .iter()
                    .any(|location| destination.starts_with(location))
            });
            match section {
                Some(section) => match catalog.scan_section(&section.id).await {
                    Ok(()) => debug!("Requested rescan of section {}", section.title),
                    Err(err) => warn!("Rescan of section {} failed: {}", section.title, err),
                },
                None => debug!("No library section contains {:?}", destination),
            }
        });
    }
}

async fn poll_detector(inner: &Arc<Inner>) -> Vec<PathBuf> {
    let inner = inner.clone();
    let result = tokio::task::spawn_blocking(move || {
        let window = Duration::from_secs(inner.settings.read().unwrap().stability_seconds);
        let mut detector = inner.detector.lock().unwrap();
        detector.set_window(window);
        detector.poll()
    })
    .await;
    match result {
        Ok(stable) => stable,
        Err(err) => {
            error!("Stability poll panicked: {}", err);
            Vec::new()
        }
    }
}

async fn watch_loop(inner: Arc<Inner>, shutdown: CancellationToken) {
    let permits = Arc::new(Semaphore::new(inner.max_workers));
    let mut workers: JoinSet<()> = JoinSet::new();
    let mut ticker = tokio::time::interval(inner.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Watch loop received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                for path in poll_detector(&inner).await {
                    debug!("{:?} is stable", path);
                    let inner = inner.clone();
                    let permits = permits.clone();
                    let shutdown = shutdown.clone();
                    workers.spawn(async move {
                        let permit = tokio::select! {
                            permit = permits.acquire_owned() => permit,
                            _ = shutdown.cancelled() => {
                                // not started: let the next watcher run see it again
                                inner.detector.lock().unwrap().forget(&path);
                                return;
                            }
                        };
                        let Ok(_permit) = permit else {
                            return;
                        };
                        inner.handle_stable_file(&path).await;
                    });
                }
            }
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(err) = joined {
                    error!("Ingest worker panicked: {}", err);
                }
            }
        }
    }

    if !workers.is_empty() {
        info!("Waiting for {} in-flight ingest(s) to finish", workers.len());
    }
    while let Some(joined) = workers.join_next().await {
        if let Err(err) = joined {
            error!("Ingest worker panicked: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::file_operator::ExtensionWhitelist;
    use crate::ingestion::ledger::SqliteIngestLedger;
    use crate::matching::RegexTokenExtractor;
    use crate::metadata::{
        CacheTtl, MediaKind, MetadataCache, MetadataCandidate, MetadataError, MetadataSearch,
    };
    use async_trait::async_trait;
    use tempfile::TempDir;

    use std::sync::atomic::{AtomicBool, AtomicUsize};

    /// Serves Inception for every title except "offline", optionally after
    /// a delay.
    struct StaticSearch {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MetadataSearch for StaticSearch {
        async fn search(
            &self,
            title: &str,
            _year: Option<i32>,
            _kind: MediaKind,
        ) -> Result<Vec<MetadataCandidate>, MetadataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if title.eq_ignore_ascii_case("offline") {
                return Err(MetadataError::Status(503));
            }
            Ok(vec![MetadataCandidate {
                id: 27205,
                title: "Inception".to_string(),
                original_title: None,
                release_date: Some("2010-07-16".to_string()),
            }])
        }
    }

    /// A ledger whose reads and writes fail while `broken` is set.
    struct FlakyLedger {
        inner: Arc<SqliteIngestLedger>,
        broken: AtomicBool,
    }

    impl FlakyLedger {
        fn check(&self) -> anyhow::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("disk I/O error");
            }
            Ok(())
        }
    }

    impl IngestLedger for FlakyLedger {
        fn add_record(&self, record: NewIngestRecord) -> anyhow::Result<IngestRecord> {
            self.check()?;
            self.inner.add_record(record)
        }

        fn get_record(&self, id: i64) -> anyhow::Result<Option<IngestRecord>> {
            self.inner.get_record(id)
        }

        fn update_record(&self, id: i64, update: RecordUpdate) -> anyhow::Result<IngestRecord> {
            self.check()?;
            self.inner.update_record(id, update)
        }

        fn query_records(&self, query: &RecordQuery) -> anyhow::Result<Vec<IngestRecord>> {
            self.inner.query_records(query)
        }

        fn is_duplicate(&self, criteria: &DuplicateCriteria) -> anyhow::Result<bool> {
            self.check()?;
            self.inner.is_duplicate(criteria)
        }

        fn recent_records(&self, limit: usize) -> anyhow::Result<Vec<IngestRecord>> {
            self.inner.recent_records(limit)
        }

        fn statistics(&self) -> anyhow::Result<IngestStatistics> {
            self.inner.statistics()
        }
    }

    struct Fixture {
        _dir: TempDir,
        ingest: PathBuf,
        media: PathBuf,
        ledger: Arc<SqliteIngestLedger>,
        search: Arc<StaticSearch>,
        orchestrator: IngestOrchestrator,
    }

    fn fixture(settings: WatcherSettings) -> Fixture {
        fixture_with(settings, Duration::ZERO, |ledger| ledger as Arc<dyn IngestLedger>)
    }

    fn fixture_with(
        settings: WatcherSettings,
        search_delay: Duration,
        wrap_ledger: impl FnOnce(Arc<SqliteIngestLedger>) -> Arc<dyn IngestLedger>,
    ) -> Fixture {
        let dir = TempDir::new().unwrap();
        let operator = Arc::new(
            FileOperator::new(
                dir.path().join("media"),
                dir.path().join("ingest"),
                ExtensionWhitelist::default(),
            )
            .unwrap(),
        );
        let search = Arc::new(StaticSearch {
            delay: search_delay,
            calls: AtomicUsize::new(0),
        });
        let engine = Arc::new(MatchEngine::new(
            Arc::new(RegexTokenExtractor),
            search.clone(),
            Arc::new(MetadataCache::in_memory(CacheTtl::Never).unwrap()),
            operator.media_root().to_path_buf(),
        ));
        let ledger = Arc::new(SqliteIngestLedger::in_memory().unwrap());
        let orchestrator = IngestOrchestrator::new(
            engine,
            wrap_ledger(ledger.clone()),
            operator.clone(),
            OrchestratorConfig {
                settings,
                poll_interval: Duration::from_millis(20),
                max_workers: 2,
                recursive: true,
            },
        )
        .unwrap();

        Fixture {
            ingest: operator.ingest_root().to_path_buf(),
            media: operator.media_root().to_path_buf(),
            _dir: dir,
            ledger,
            search,
            orchestrator,
        }
    }

    fn flaky(ledger: Arc<SqliteIngestLedger>) -> Arc<FlakyLedger> {
        Arc::new(FlakyLedger {
            inner: ledger,
            broken: AtomicBool::new(false),
        })
    }

    fn auto(threshold: f64) -> WatcherSettings {
        WatcherSettings {
            auto_ingest: true,
            confidence_threshold: threshold,
            stability_seconds: 0,
        }
    }

    fn drop_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name).unwrap();
        path
    }

    #[tokio::test]
    async fn test_auto_ingest_moves_and_records() {
        let f = fixture(auto(0.85));
        let source = drop_file(&f.ingest, "Inception.2010.1080p.BluRay.x264.mkv");

        let decision = f.orchestrator.handle_stable_file(&source).await;

        let FileDecision::AutoIngested(record) = decision else {
            panic!("expected auto ingest, got {:?}", decision);
        };
        assert_eq!(record.status, IngestStatus::Success);
        assert_eq!(record.external_id, Some(27205));
        assert!(!source.exists());
        let placed = PathBuf::from(&record.destination_path);
        assert!(placed.starts_with(&f.media));
        assert!(placed.exists());
    }

    #[tokio::test]
    async fn test_disabled_auto_ingest_queues_confident_match() {
        let f = fixture(WatcherSettings {
            auto_ingest: false,
            confidence_threshold: 0.5,
            stability_seconds: 0,
        });
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        let decision = f.orchestrator.handle_stable_file(&source).await;

        assert_eq!(decision, FileDecision::Queued(PendingReason::AutoIngestDisabled));
        assert!(source.exists());
        assert_eq!(f.ledger.statistics().unwrap().total, 0);
        let pending = f.orchestrator.pending();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].candidate.as_ref().unwrap().confidence >= 0.95);
    }

    #[tokio::test]
    async fn test_below_threshold_is_queued() {
        let f = fixture(auto(0.85));
        // year off by one: 1.0 * 0.85 < 0.9
        f.orchestrator
            .configure(SettingsUpdate {
                confidence_threshold: Some(0.9),
                ..Default::default()
            })
            .unwrap();
        let source = drop_file(&f.ingest, "Inception.2011.mkv");

        let decision = f.orchestrator.handle_stable_file(&source).await;
        assert!(matches!(
            decision,
            FileDecision::Queued(PendingReason::BelowThreshold { .. })
        ));
    }

    #[tokio::test]
    async fn test_unmatched_is_queued_without_candidate() {
        let f = fixture(auto(0.85));
        let source = drop_file(&f.ingest, "Offline.2010.mkv");

        let decision = f.orchestrator.handle_stable_file(&source).await;
        assert!(matches!(
            decision,
            FileDecision::Queued(PendingReason::Unmatched {
                reason: UnmatchedReason::SearchFailed(_)
            })
        ));
        assert!(f.orchestrator.pending()[0].candidate.is_none());

        let err = f.orchestrator.approve(&source, None).await.unwrap_err();
        assert!(matches!(err, IngestError::NoCandidate(_)));
        // still pending after a refused approve
        assert_eq!(f.orchestrator.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_redetection_replaces_pending_entry() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        f.orchestrator.handle_stable_file(&source).await;
        let first_seen = f.orchestrator.pending()[0].first_seen;
        f.orchestrator.handle_stable_file(&source).await;

        let pending = f.orchestrator.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].first_seen, first_seen);
    }

    #[tokio::test]
    async fn test_duplicate_external_id_is_not_written() {
        let f = fixture(auto(0.85));
        let first = drop_file(&f.ingest, "Inception.2010.mkv");
        assert!(matches!(
            f.orchestrator.handle_stable_file(&first).await,
            FileDecision::AutoIngested(_)
        ));

        let second = drop_file(&f.ingest, "Inception.2010.720p.mp4");
        let decision = f.orchestrator.handle_stable_file(&second).await;

        assert_eq!(
            decision,
            FileDecision::Queued(PendingReason::Duplicate { external_id: 27205 })
        );
        assert!(second.exists());
        assert_eq!(f.ledger.statistics().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_approve_executes_once() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        let record = f.orchestrator.approve(&source, None).await.unwrap();
        assert_eq!(record.status, IngestStatus::Success);
        assert!(!source.exists());

        let err = f.orchestrator.approve(&source, None).await.unwrap_err();
        assert!(matches!(err, IngestError::PendingNotFound(_)));
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(f.ledger.statistics().unwrap().success, 1);
    }

    #[tokio::test]
    async fn test_concurrent_approvals_execute_once() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        let (a, b) = tokio::join!(
            f.orchestrator.approve(&source, None),
            f.orchestrator.approve(&source, None)
        );
        assert!(a.is_ok() ^ b.is_ok());
        assert_eq!(f.ledger.statistics().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_approve_with_override_destination() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Offline.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        let destination = f.media.join("Movies/Offline (2010)/Offline (2010).mkv");
        let record = f
            .orchestrator
            .approve(&source, Some(destination.clone()))
            .await
            .unwrap();
        assert_eq!(record.destination_path, destination.display().to_string());
        assert!(destination.exists());
        assert!(record.external_id.is_none());
    }

    #[tokio::test]
    async fn test_failed_approve_records_failure() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        let err = f
            .orchestrator
            .approve(&source, Some(PathBuf::from("/etc/Inception.mkv")))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        let IngestError::Transfer { record_id, .. } = err else {
            panic!("expected transfer error");
        };
        let record = f.ledger.get_record(record_id).unwrap().unwrap();
        assert_eq!(record.status, IngestStatus::Failed);
        assert!(record.error_message.unwrap().contains("outside"));
        assert!(source.exists());
    }

    #[tokio::test]
    async fn test_reject_twice_fails_second_time() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        let record = f.orchestrator.reject(&source, true).await.unwrap().unwrap();
        assert_eq!(record.status, IngestStatus::Failed);
        assert_eq!(record.external_id, Some(27205));

        let err = f.orchestrator.reject(&source, true).await.unwrap_err();
        assert!(matches!(err, IngestError::PendingNotFound(_)));
        assert!(source.exists());
        // a rejection does not block a later retry
        assert!(!f
            .orchestrator
            .check_duplicate(&DuplicateCriteria::external_id(27205))
            .unwrap());
    }

    #[tokio::test]
    async fn test_manual_copy_ingest_keeps_source() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        let record = f
            .orchestrator
            .ingest_file(&source, None, TransferMode::Copy)
            .await
            .unwrap();
        assert!(source.exists());
        assert!(Path::new(&record.destination_path).exists());
        assert!(record.destination_path.contains("Inception (2010)"));
    }

    #[tokio::test]
    async fn test_manual_ingest_outside_roots_is_recorded_as_failed() {
        let f = fixture(WatcherSettings::default());
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        let err = f
            .orchestrator
            .ingest_file(&source, Some(PathBuf::from("/etc/a.mkv")), TransferMode::Copy)
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(f.orchestrator.statistics().unwrap().failed, 1);
    }

    #[tokio::test]
    async fn test_configure_validates_threshold() {
        let f = fixture(WatcherSettings::default());
        let err = f
            .orchestrator
            .configure(SettingsUpdate {
                confidence_threshold: Some(1.5),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
        assert_eq!(f.orchestrator.settings().confidence_threshold, 0.85);
    }

    #[tokio::test]
    async fn test_batch_identify_counts() {
        let f = fixture(WatcherSettings::default());
        let report = f
            .orchestrator
            .batch_identify(
                &[
                    "Inception.2010.mkv".to_string(),
                    "Inception.2009.mkv".to_string(),
                    "Offline.mkv".to_string(),
                ],
                Some(0.9),
            )
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.matched, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.low_confidence, 1);
    }

    #[tokio::test]
    async fn test_preview_warns_on_low_confidence() {
        let f = fixture(WatcherSettings::default());
        let preview = f.orchestrator.preview("Inception.2005.mkv").await;
        assert!(preview.outcome.candidate().is_some());
        assert!(preview.warning.is_some());

        let preview = f.orchestrator.preview("Inception.2010.mkv").await;
        assert!(preview.warning.is_none());
    }

    #[tokio::test]
    async fn test_scan_once_waits_for_stability() {
        let f = fixture(auto(0.85));
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        // first pass only observes
        assert!(f.orchestrator.scan_once().await.unwrap().is_empty());
        let decisions = f.orchestrator.scan_once().await.unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].0, source);
        assert!(matches!(decisions[0].1, FileDecision::AutoIngested(_)));
        // moved away, nothing left to report
        assert!(f.orchestrator.scan_once().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watcher_start_stop() {
        let f = fixture(auto(0.85));
        f.orchestrator.start().await.unwrap();
        assert!(matches!(
            f.orchestrator.start().await,
            Err(IngestError::AlreadyRunning)
        ));

        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while source.exists() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        f.orchestrator.stop().await.unwrap();
        assert!(!f.orchestrator.is_running().await);
        assert!(!source.exists());
        let status = f.orchestrator.status().await;
        assert_eq!(status.auto_ingested, 1);
        assert!(matches!(
            f.orchestrator.stop().await,
            Err(IngestError::NotRunning)
        ));
    }

    #[tokio::test]
    async fn test_unrecorded_approve_stays_pending() {
        let mut flaky_ledger = None;
        let f = fixture_with(WatcherSettings::default(), Duration::ZERO, |ledger| {
            let wrapped = flaky(ledger);
            flaky_ledger = Some(wrapped.clone());
            wrapped as Arc<dyn IngestLedger>
        });
        let flaky_ledger = flaky_ledger.unwrap();
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.handle_stable_file(&source).await;

        flaky_ledger.broken.store(true, Ordering::SeqCst);
        let err = f.orchestrator.approve(&source, None).await.unwrap_err();

        assert_eq!(err.category(), ErrorCategory::Storage);
        assert!(source.exists());
        let pending = f.orchestrator.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, PendingReason::AutoIngestDisabled);
        assert!(pending[0].candidate.is_some());

        flaky_ledger.broken.store(false, Ordering::SeqCst);
        let record = f.orchestrator.approve(&source, None).await.unwrap();
        assert_eq!(record.status, IngestStatus::Success);
        assert!(f.orchestrator.pending().is_empty());
    }

    #[tokio::test]
    async fn test_auto_ingest_with_broken_ledger_is_queued() {
        let mut flaky_ledger = None;
        let f = fixture_with(auto(0.85), Duration::ZERO, |ledger| {
            let wrapped = flaky(ledger);
            wrapped.broken.store(true, Ordering::SeqCst);
            flaky_ledger = Some(wrapped.clone());
            wrapped as Arc<dyn IngestLedger>
        });
        let source = drop_file(&f.ingest, "Inception.2010.mkv");

        let decision = f.orchestrator.handle_stable_file(&source).await;

        assert!(matches!(
            decision,
            FileDecision::Queued(PendingReason::LedgerUnavailable { .. })
        ));
        assert!(source.exists());
        assert_eq!(f.orchestrator.pending().len(), 1);

        flaky_ledger.unwrap().broken.store(false, Ordering::SeqCst);
        f.orchestrator.approve(&source, None).await.unwrap();
        assert_eq!(f.ledger.statistics().unwrap().success, 1);
    }

    #[tokio::test]
    async fn test_configure_leaves_earlier_decisions_alone() {
        let f = fixture(auto(0.9));
        let accepted = drop_file(&f.ingest, "Inception.2010.mkv");
        let queued = drop_file(&f.ingest, "Inception.2011.mkv");
        let FileDecision::AutoIngested(record) = f.orchestrator.handle_stable_file(&accepted).await
        else {
            panic!("expected auto ingest");
        };
        f.orchestrator.handle_stable_file(&queued).await;
        let before = f.orchestrator.pending();
        assert_eq!(
            before[0].reason,
            PendingReason::BelowThreshold { threshold: 0.9 }
        );

        f.orchestrator
            .configure(SettingsUpdate {
                auto_ingest: Some(false),
                confidence_threshold: Some(0.5),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(f.orchestrator.pending(), before);
        assert!(queued.exists());
        assert_eq!(f.ledger.get_record(record.id).unwrap(), Some(record));
        assert_eq!(f.ledger.statistics().unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_ingest() {
        let f = fixture_with(auto(0.85), Duration::from_millis(300), |ledger| {
            ledger as Arc<dyn IngestLedger>
        });
        let source = drop_file(&f.ingest, "Inception.2010.mkv");
        f.orchestrator.start().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while f.search.calls.load(Ordering::SeqCst) == 0 {
            assert!(tokio::time::Instant::now() < deadline, "match never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // the metadata lookup is still sleeping
        f.orchestrator.stop().await.unwrap();

        let stats = f.ledger.statistics().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.pending, 0);
        assert_eq!(stats.success, 1);
        assert!(!source.exists());
    }
}
