//! Pipeline fixture and the in-process metadata service behind it.

#![allow(dead_code)]

use super::constants::*;
use async_trait::async_trait;
use media_ingest::ingestion::{
    ExtensionWhitelist, FileOperator, IngestOrchestrator, OrchestratorConfig, SqliteIngestLedger,
    WatcherSettings,
};
use media_ingest::matching::{MatchEngine, RegexTokenExtractor};
use media_ingest::metadata::{
    CacheTtl, MediaKind, MetadataCache, MetadataCandidate, MetadataError, MetadataSearch,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Serves a fixed catalog and counts requests.
pub struct FakeMetadataService {
    movies: Vec<MetadataCandidate>,
    shows: Vec<MetadataCandidate>,
    calls: AtomicUsize,
}

impl FakeMetadataService {
    pub fn new() -> Self {
        Self {
            movies: vec![MetadataCandidate {
                id: INCEPTION_ID,
                title: "Inception".to_string(),
                original_title: None,
                release_date: Some("2010-07-16".to_string()),
            }],
            shows: vec![MetadataCandidate {
                id: BREAKING_BAD_ID,
                title: "Breaking Bad".to_string(),
                original_title: None,
                release_date: Some("2008-01-20".to_string()),
            }],
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataSearch for FakeMetadataService {
    async fn search(
        &self,
        title: &str,
        _year: Option<i32>,
        kind: MediaKind,
    ) -> Result<Vec<MetadataCandidate>, MetadataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let pool = match kind {
            MediaKind::Movie => &self.movies,
            MediaKind::Tv => &self.shows,
        };
        Ok(pool
            .iter()
            .filter(|c| c.title.eq_ignore_ascii_case(title))
            .cloned()
            .collect())
    }
}

/// A full pipeline on temporary directories. Databases live in files so
/// they can be reopened.
pub struct TestPipeline {
    pub dir: TempDir,
    pub ingest: PathBuf,
    pub media: PathBuf,
    pub db_dir: PathBuf,
    pub search: Arc<FakeMetadataService>,
    pub ledger: Arc<SqliteIngestLedger>,
    pub cache: Arc<MetadataCache>,
    pub orchestrator: IngestOrchestrator,
}

impl TestPipeline {
    /// Auto-ingest disabled, default threshold.
    pub fn new() -> Self {
        Self::with_settings(WatcherSettings {
            stability_seconds: 0,
            ..WatcherSettings::default()
        })
    }

    pub fn auto_ingest(threshold: f64) -> Self {
        Self::with_settings(WatcherSettings {
            auto_ingest: true,
            confidence_threshold: threshold,
            stability_seconds: 0,
        })
    }

    pub fn with_settings(settings: WatcherSettings) -> Self {
        let dir = TempDir::new().unwrap();
        let db_dir = dir.path().join("db");
        std::fs::create_dir_all(&db_dir).unwrap();

        let operator = Arc::new(
            FileOperator::new(
                dir.path().join("media"),
                dir.path().join("ingest"),
                ExtensionWhitelist::default(),
            )
            .unwrap(),
        );
        let search = Arc::new(FakeMetadataService::new());
        let cache = Arc::new(
            MetadataCache::new(db_dir.join("metadata_cache.db"), CacheTtl::from_days(30)).unwrap(),
        );
        let ledger = Arc::new(SqliteIngestLedger::new(db_dir.join("ingest_ledger.db")).unwrap());
        let engine = Arc::new(MatchEngine::new(
            Arc::new(RegexTokenExtractor),
            search.clone(),
            cache.clone(),
            operator.media_root().to_path_buf(),
        ));
        let orchestrator = IngestOrchestrator::new(
            engine,
            ledger.clone(),
            operator.clone(),
            OrchestratorConfig {
                settings,
                poll_interval: Duration::from_millis(25),
                max_workers: 2,
                recursive: true,
            },
        )
        .unwrap();

        Self {
            ingest: operator.ingest_root().to_path_buf(),
            media: operator.media_root().to_path_buf(),
            dir,
            db_dir,
            search,
            ledger,
            cache,
            orchestrator,
        }
    }

    /// Writes a complete file into the ingest directory.
    pub fn drop_file(&self, relative: &str) -> PathBuf {
        let path = self.ingest.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, format!("contents of {}", relative)).unwrap();
        path
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.db_dir.join("ingest_ledger.db")
    }

    pub fn cache_path(&self) -> PathBuf {
        self.db_dir.join("metadata_cache.db")
    }

    /// Polls until `path` disappears or the timeout elapses.
    pub async fn wait_until_gone(path: &Path, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while path.exists() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}
