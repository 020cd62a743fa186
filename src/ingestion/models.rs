//! Data models for the ingest ledger and the pending review queue.

use crate::matching::{MatchCandidate, UnmatchedReason};
use crate::metadata::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of one ingest attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Pending,
    Success, // terminal
    Failed,  // terminal
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Pending => "pending",
            IngestStatus::Success => "success",
            IngestStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(IngestStatus::Pending),
            "success" => Some(IngestStatus::Success),
            "failed" => Some(IngestStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IngestStatus::Success | IngestStatus::Failed)
    }
}

impl std::fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestRecord {
    pub id: i64,
    /// Unix milliseconds.
    pub created_at: i64,
    pub source_path: String,
    pub destination_path: String,
    pub status: IngestStatus,
    pub external_id: Option<u64>,
    pub media_kind: Option<MediaKind>,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Fields supplied when an attempt starts. `id` and `created_at` are
/// assigned by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIngestRecord {
    pub source_path: String,
    pub destination_path: String,
    pub status: IngestStatus,
    pub external_id: Option<u64>,
    pub media_kind: Option<MediaKind>,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl NewIngestRecord {
    pub fn new(source_path: impl Into<String>, destination_path: impl Into<String>) -> Self {
        Self {
            source_path: source_path.into(),
            destination_path: destination_path.into(),
            status: IngestStatus::Pending,
            external_id: None,
            media_kind: None,
            confidence: None,
            metadata: None,
            error_message: None,
        }
    }

    pub fn with_status(mut self, status: IngestStatus) -> Self {
        self.status = status;
        self
    }

    /// Copies identification fields from a match.
    pub fn with_candidate(mut self, candidate: &MatchCandidate) -> Self {
        self.external_id = Some(candidate.external_id);
        self.media_kind = Some(candidate.kind());
        self.confidence = Some(candidate.confidence);
        self.metadata = serde_json::to_value(candidate).ok();
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Partial update for a pending record. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub status: Option<IngestStatus>,
    pub destination_path: Option<String>,
    pub external_id: Option<u64>,
    pub media_kind: Option<MediaKind>,
    pub confidence: Option<f64>,
    pub metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl RecordUpdate {
    pub fn success() -> Self {
        Self {
            status: Some(IngestStatus::Success),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(IngestStatus::Failed),
            error_message: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Filters for `query_records`; all set filters must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    pub status: Option<IngestStatus>,
    pub external_id: Option<u64>,
    pub media_kind: Option<MediaKind>,
    /// Inclusive lower bound, unix millis.
    pub since: Option<i64>,
    /// Inclusive upper bound, unix millis.
    pub until: Option<i64>,
    pub limit: Option<usize>,
}

/// A record is a duplicate if it matches any of the given identifiers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DuplicateCriteria {
    pub external_id: Option<u64>,
    pub source_path: Option<String>,
    /// Failed attempts are ignored unless this is set.
    pub include_failed: bool,
}

impl DuplicateCriteria {
    pub fn external_id(external_id: u64) -> Self {
        Self {
            external_id: Some(external_id),
            ..Default::default()
        }
    }

    pub fn source_path(source_path: impl Into<String>) -> Self {
        Self {
            source_path: Some(source_path.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStatistics {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
    pub movies: usize,
    pub tv: usize,
}

/// Why a file is waiting for a human decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingReason {
    AutoIngestDisabled,
    BelowThreshold { threshold: f64 },
    Duplicate { external_id: u64 },
    Unmatched { reason: UnmatchedReason },
    /// The ledger could not be read or written; nothing was moved.
    LedgerUnavailable { error: String },
}

impl std::fmt::Display for PendingReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingReason::AutoIngestDisabled => write!(f, "auto-ingest disabled"),
            PendingReason::BelowThreshold { threshold } => {
                write!(f, "below threshold ({:.0}%)", threshold * 100.0)
            }
            PendingReason::Duplicate { external_id } => {
                write!(f, "external id {} already ingested", external_id)
            }
            PendingReason::Unmatched { reason } => write!(f, "unmatched: {}", reason),
            PendingReason::LedgerUnavailable { error } => write!(f, "ledger unavailable: {}", error),
        }
    }
}

/// A file parked for approve/reject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingQueueEntry {
    pub source: PathBuf,
    pub candidate: Option<MatchCandidate>,
    pub reason: PendingReason,
    /// Unix millis of the first detection; kept when the entry is replaced.
    pub first_seen: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in [
            IngestStatus::Pending,
            IngestStatus::Success,
            IngestStatus::Failed,
        ] {
            assert_eq!(IngestStatus::parse(status.as_str()), Some(status));
        }
        assert!(!IngestStatus::Pending.is_terminal());
        assert!(IngestStatus::Success.is_terminal());
        assert!(IngestStatus::Failed.is_terminal());
        assert_eq!(IngestStatus::parse("done"), None);
    }

    #[test]
    fn test_failed_update_carries_error() {
        let update = RecordUpdate::failed("disk full");
        assert_eq!(update.status, Some(IngestStatus::Failed));
        assert_eq!(update.error_message.as_deref(), Some("disk full"));
        assert!(update.destination_path.is_none());
    }
}
