//! Database schema for ingest_ledger.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Ingest Records Table - Version 0
// =============================================================================

/// One row per ingest attempt. Rows are never deleted, so the integer
/// primary key only grows.
const INGEST_RECORDS_TABLE_V0: Table = Table {
    name: "ingest_records",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("source_path", &SqlType::Text, non_null = true),
        sqlite_column!("destination_path", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("external_id", &SqlType::Integer),
        sqlite_column!("media_kind", &SqlType::Text),
        sqlite_column!("confidence", &SqlType::Real),
        sqlite_column!("metadata", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
    ],
    indices: &[
        ("idx_ingest_records_status", "status"),
        ("idx_ingest_records_external_id", "external_id"),
        ("idx_ingest_records_created_at", "created_at"),
    ],
};

pub const INGEST_LEDGER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[INGEST_RECORDS_TABLE_V0],
    migration: None,
}];
