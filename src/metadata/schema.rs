//! Database schema for metadata_cache.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const METADATA_CACHE_TABLE_V0: Table = Table {
    name: "metadata_cache",
    columns: &[
        sqlite_column!("title", &SqlType::Text, non_null = true),
        sqlite_column!("year", &SqlType::Integer),
        sqlite_column!("media_kind", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_metadata_cache_key", "title, year, media_kind")],
};

pub const METADATA_CACHE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[METADATA_CACHE_TABLE_V0],
    migration: None,
}];
