//! Watch-folder ingestion.
//!
//! Workflow:
//! 1. Files land in the ingest root (downloads, manual copies)
//! 2. The stability detector reports them once they stop changing
//! 3. The match engine identifies title and destination
//! 4. Confident, non-duplicate matches are moved into the library;
//!    everything else waits in the pending queue for a human decision
//! 5. Every executed attempt is written to the ingest ledger

mod file_operator;
mod ledger;
mod models;
mod orchestrator;
mod schema;
mod stability;
mod watcher_lock;

pub use file_operator::{ExtensionWhitelist, FileOperator, FileOperatorError, DEFAULT_EXTENSIONS};
#[cfg(feature = "mock")]
pub use ledger::MockIngestLedger;
pub use ledger::{IngestLedger, LedgerError, SqliteIngestLedger, DEFAULT_RECENT_LIMIT};
pub use models::{
    DuplicateCriteria, IngestRecord, IngestStatistics, IngestStatus, NewIngestRecord,
    PendingQueueEntry, PendingReason, RecordQuery, RecordUpdate,
};
pub use orchestrator::{
    BatchItem, BatchReport, ErrorCategory, FileDecision, IngestError, IngestOrchestrator,
    OrchestratorConfig, RenamePreview, SettingsUpdate, TransferMode, WatcherSettings,
    WatcherStatus,
};
pub use schema::INGEST_LEDGER_VERSIONED_SCHEMAS;
pub use stability::StableFileDetector;
pub use watcher_lock::{WatcherLock, WatcherLockError};
