//! SQLite cache for metadata search responses.
//!
//! Keyed by (lowercased title, year or NULL, media kind). A missing year is
//! its own key value, never a wildcard. Entries past the TTL are deleted by
//! the lookup that finds them.

use super::models::{MediaKind, MetadataCandidate};
use super::schema::METADATA_CACHE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::{create_in_memory, open_versioned};
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// How long a cached response stays valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTtl {
    Expires(Duration),
    Never,
}

impl CacheTtl {
    /// Negative day counts disable expiry, and so do counts too large to
    /// express in milliseconds.
    pub fn from_days(days: i64) -> Self {
        if days < 0 {
            return CacheTtl::Never;
        }
        match days.checked_mul(24 * 60 * 60 * 1000) {
            Some(millis) => CacheTtl::Expires(Duration::from_millis(millis as u64)),
            None => CacheTtl::Never,
        }
    }

    fn cutoff_millis(&self, now_millis: i64) -> Option<i64> {
        match self {
            CacheTtl::Expires(ttl) => {
                let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
                Some(now_millis.saturating_sub(ttl))
            }
            CacheTtl::Never => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub total: usize,
    pub movie: usize,
    pub tv: usize,
}

pub struct MetadataCache {
    conn: Arc<Mutex<Connection>>,
    ttl: CacheTtl,
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl MetadataCache {
    pub fn new<P: AsRef<Path>>(db_path: P, ttl: CacheTtl) -> Result<Self> {
        let conn = open_versioned(db_path, METADATA_CACHE_VERSIONED_SCHEMAS, "metadata cache")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    pub fn in_memory(ttl: CacheTtl) -> Result<Self> {
        let conn = create_in_memory(METADATA_CACHE_VERSIONED_SCHEMAS)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            ttl,
        })
    }

    pub fn ttl(&self) -> CacheTtl {
        self.ttl
    }

    /// Returns the cached candidates, or None when absent or expired. An
    /// expired entry is removed before returning.
    pub fn get(
        &self,
        title: &str,
        year: Option<i32>,
        kind: MediaKind,
    ) -> Result<Option<Vec<MetadataCandidate>>> {
        let title = normalize_title(title);
        let conn = self.conn.lock().unwrap();

        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT payload, created_at FROM metadata_cache
                 WHERE title = ?1 AND year IS ?2 AND media_kind = ?3",
                params![title, year, kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((payload, created_at)) = row else {
            return Ok(None);
        };

        if let Some(cutoff) = self.ttl.cutoff_millis(now_millis()) {
            if created_at < cutoff {
                conn.execute(
                    "DELETE FROM metadata_cache WHERE title = ?1 AND year IS ?2 AND media_kind = ?3",
                    params![title, year, kind.as_str()],
                )?;
                debug!("Evicted expired cache entry for {:?} ({:?}, {})", title, year, kind);
                return Ok(None);
            }
        }

        let candidates = serde_json::from_str(&payload)
            .with_context(|| format!("Corrupt cache payload for {:?}", title))?;
        Ok(Some(candidates))
    }

    /// Stores a response, replacing any previous entry for the same key.
    pub fn put(
        &self,
        title: &str,
        year: Option<i32>,
        kind: MediaKind,
        candidates: &[MetadataCandidate],
    ) -> Result<()> {
        let title = normalize_title(title);
        let payload = serde_json::to_string(candidates)?;
        let mut conn = self.conn.lock().unwrap();

        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM metadata_cache WHERE title = ?1 AND year IS ?2 AND media_kind = ?3",
            params![title, year, kind.as_str()],
        )?;
        tx.execute(
            "INSERT INTO metadata_cache (title, year, media_kind, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![title, year, kind.as_str(), payload, now_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes every entry, returning how many were deleted.
    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM metadata_cache", [])?)
    }

    /// Counts live entries by kind. Expired entries are purged first so the
    /// counts never include dead rows.
    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().unwrap();
        if let Some(cutoff) = self.ttl.cutoff_millis(now_millis()) {
            conn.execute(
                "DELETE FROM metadata_cache WHERE created_at < ?1",
                params![cutoff],
            )?;
        }

        let mut stmt =
            conn.prepare("SELECT media_kind, COUNT(*) FROM metadata_cache GROUP BY media_kind")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stats = CacheStats::default();
        for (kind, count) in counts {
            let count = count as usize;
            match MediaKind::parse(&kind) {
                Some(MediaKind::Movie) => stats.movie += count,
                Some(MediaKind::Tv) => stats.tv += count,
                None => {}
            }
            stats.total += count;
        }
        Ok(stats)
    }
}
