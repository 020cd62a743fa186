//! Durable log of every ingest attempt.
//!
//! The ledger is the only source of truth for duplicate detection and
//! statistics. Rows start `pending` or terminal; a pending row may be
//! updated until it reaches `success` or `failed`, after which it is frozen.

use super::models::{
    DuplicateCriteria, IngestRecord, IngestStatistics, IngestStatus, NewIngestRecord, RecordQuery,
    RecordUpdate,
};
use super::schema::INGEST_LEDGER_VERSIONED_SCHEMAS;
use crate::metadata::MediaKind;
use crate::sqlite_persistence::{create_in_memory, open_versioned};
use anyhow::Result;
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub const DEFAULT_RECENT_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ingest record {0} not found")]
    RecordNotFound(i64),

    #[error("Ingest record {0} is already {1} and cannot be updated")]
    RecordFinalized(i64, IngestStatus),
}

/// Trait for ingest ledger storage.
#[cfg_attr(feature = "mock", mockall::automock)]
pub trait IngestLedger: Send + Sync {
    /// Insert a record; returns it with its assigned id and timestamp.
    fn add_record(&self, record: NewIngestRecord) -> Result<IngestRecord>;

    fn get_record(&self, id: i64) -> Result<Option<IngestRecord>>;

    /// Apply a partial update to a pending record. Fails with
    /// [`LedgerError`] if the record is missing or already terminal.
    fn update_record(&self, id: i64, update: RecordUpdate) -> Result<IngestRecord>;

    /// Newest first (created_at DESC, id DESC).
    fn query_records(&self, query: &RecordQuery) -> Result<Vec<IngestRecord>>;

    fn is_duplicate(&self, criteria: &DuplicateCriteria) -> Result<bool>;

    fn recent_records(&self, limit: usize) -> Result<Vec<IngestRecord>>;

    /// Counts computed from the current rows on every call.
    fn statistics(&self) -> Result<IngestStatistics>;
}

/// SQLite implementation of IngestLedger.
pub struct SqliteIngestLedger {
    conn: Arc<Mutex<Connection>>,
}

const SELECT_COLUMNS: &str = "id, created_at, source_path, destination_path, status, \
     external_id, media_kind, confidence, metadata, error_message";

impl SqliteIngestLedger {
    /// Opens or creates the ledger database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path, INGEST_LEDGER_VERSIONED_SCHEMAS, "ingest ledger")?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(create_in_memory(INGEST_LEDGER_VERSIONED_SCHEMAS)?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        // Each committed write reaches disk before the call returns.
        conn.pragma_update(None, "synchronous", "FULL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<IngestRecord> {
        let status: String = row.get("status")?;
        let metadata: Option<String> = row.get("metadata")?;
        Ok(IngestRecord {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            source_path: row.get("source_path")?,
            destination_path: row.get("destination_path")?,
            status: IngestStatus::parse(&status).unwrap_or(IngestStatus::Failed),
            external_id: row
                .get::<_, Option<i64>>("external_id")?
                .map(|id| id as u64),
            media_kind: row
                .get::<_, Option<String>>("media_kind")?
                .and_then(|s| MediaKind::parse(&s)),
            confidence: row.get("confidence")?,
            metadata: metadata.and_then(|s| serde_json::from_str(&s).ok()),
            error_message: row.get("error_message")?,
        })
    }

    fn fetch(conn: &Connection, id: i64) -> Result<Option<IngestRecord>> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM ingest_records WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_record,
            )
            .optional()?)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn metadata_to_sql(metadata: &Option<serde_json::Value>) -> Result<Option<String>> {
    Ok(metadata.as_ref().map(serde_json::to_string).transpose()?)
}

impl IngestLedger for SqliteIngestLedger {
    fn add_record(&self, record: NewIngestRecord) -> Result<IngestRecord> {
        let conn = self.conn.lock().unwrap();
        let created_at = now_millis();
        conn.execute(
            "INSERT INTO ingest_records (
                created_at, source_path, destination_path, status,
                external_id, media_kind, confidence, metadata, error_message
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                created_at,
                record.source_path,
                record.destination_path,
                record.status.as_str(),
                record.external_id.map(|id| id as i64),
                record.media_kind.map(|k| k.as_str()),
                record.confidence,
                metadata_to_sql(&record.metadata)?,
                record.error_message,
            ],
        )?;

        Ok(IngestRecord {
            id: conn.last_insert_rowid(),
            created_at,
            source_path: record.source_path,
            destination_path: record.destination_path,
            status: record.status,
            external_id: record.external_id,
            media_kind: record.media_kind,
            confidence: record.confidence,
            metadata: record.metadata,
            error_message: record.error_message,
        })
    }

    fn get_record(&self, id: i64) -> Result<Option<IngestRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::fetch(&conn, id)
    }

    fn update_record(&self, id: i64, update: RecordUpdate) -> Result<IngestRecord> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let current = Self::fetch(&tx, id)?.ok_or(LedgerError::RecordNotFound(id))?;
        if current.status.is_terminal() {
            return Err(LedgerError::RecordFinalized(id, current.status).into());
        }

        tx.execute(
            "UPDATE ingest_records SET
                status = COALESCE(?1, status),
                destination_path = COALESCE(?2, destination_path),
                external_id = COALESCE(?3, external_id),
                media_kind = COALESCE(?4, media_kind),
                confidence = COALESCE(?5, confidence),
                metadata = COALESCE(?6, metadata),
                error_message = COALESCE(?7, error_message)
            WHERE id = ?8",
            params![
                update.status.map(|s| s.as_str()),
                update.destination_path,
                update.external_id.map(|id| id as i64),
                update.media_kind.map(|k| k.as_str()),
                update.confidence,
                metadata_to_sql(&update.metadata)?,
                update.error_message,
                id,
            ],
        )?;
        let updated = Self::fetch(&tx, id)?.ok_or(LedgerError::RecordNotFound(id))?;
        tx.commit()?;
        Ok(updated)
    }

    fn query_records(&self, query: &RecordQuery) -> Result<Vec<IngestRecord>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = query.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(external_id) = query.external_id {
            clauses.push("external_id = ?");
            values.push(Value::Integer(external_id as i64));
        }
        if let Some(kind) = query.media_kind {
            clauses.push("media_kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(since) = query.since {
            clauses.push("created_at >= ?");
            values.push(Value::Integer(since));
        }
        if let Some(until) = query.until {
            clauses.push("created_at <= ?");
            values.push(Value::Integer(until));
        }

        let mut sql = format!("SELECT {} FROM ingest_records", SELECT_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(limit as i64));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(values), Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn is_duplicate(&self, criteria: &DuplicateCriteria) -> Result<bool> {
        let mut identifiers: Vec<&str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(external_id) = criteria.external_id {
            identifiers.push("external_id = ?");
            values.push(Value::Integer(external_id as i64));
        }
        if let Some(source_path) = &criteria.source_path {
            identifiers.push("source_path = ?");
            values.push(Value::Text(source_path.clone()));
        }
        if identifiers.is_empty() {
            return Ok(false);
        }

        let mut sql = format!(
            "SELECT EXISTS(SELECT 1 FROM ingest_records WHERE ({})",
            identifiers.join(" OR ")
        );
        if !criteria.include_failed {
            sql.push_str(" AND status != 'failed'");
        }
        sql.push(')');

        let conn = self.conn.lock().unwrap();
        let exists: bool = conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?;
        Ok(exists)
    }

    fn recent_records(&self, limit: usize) -> Result<Vec<IngestRecord>> {
        self.query_records(&RecordQuery {
            limit: Some(limit),
            ..Default::default()
        })
    }

    fn statistics(&self) -> Result<IngestStatistics> {
        let conn = self.conn.lock().unwrap();
        let mut stats = IngestStatistics::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM ingest_records GROUP BY status")?;
        let by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (status, count) in by_status {
            let count = count as usize;
            stats.total += count;
            match IngestStatus::parse(&status) {
                Some(IngestStatus::Success) => stats.success += count,
                Some(IngestStatus::Failed) => stats.failed += count,
                Some(IngestStatus::Pending) => stats.pending += count,
                None => {}
            }
        }

        let mut stmt = conn.prepare(
            "SELECT media_kind, COUNT(*) FROM ingest_records
             WHERE media_kind IS NOT NULL GROUP BY media_kind",
        )?;
        let by_kind = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        for (kind, count) in by_kind {
            match MediaKind::parse(&kind) {
                Some(MediaKind::Movie) => stats.movies += count as usize,
                Some(MediaKind::Tv) => stats.tv += count as usize,
                None => {}
            }
        }

        Ok(stats)
    }
}
