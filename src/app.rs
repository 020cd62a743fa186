//! Wiring of the ingest pipeline from a resolved [`AppConfig`].

use crate::config::AppConfig;
use crate::ingestion::{FileOperator, IngestOrchestrator, SqliteIngestLedger};
use crate::matching::{MatchEngine, RegexTokenExtractor};
use crate::media_server::{CatalogClient, PlexClient};
use crate::metadata::{MetadataCache, TmdbClient};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Opens both databases and builds the orchestrator. The watcher is not
/// started.
pub fn build_orchestrator(config: &AppConfig) -> Result<IngestOrchestrator> {
    let operator = Arc::new(
        FileOperator::new(
            &config.media_root,
            &config.ingest_dir,
            config.extension_whitelist(),
        )
        .context("Failed to prepare media and ingest directories")?,
    );

    info!("Opening ingest ledger at {:?}...", config.ledger_db_path());
    let ledger = Arc::new(SqliteIngestLedger::new(config.ledger_db_path())?);

    info!("Opening metadata cache at {:?}...", config.cache_db_path());
    let cache = Arc::new(MetadataCache::new(
        config.cache_db_path(),
        config.metadata.cache_ttl,
    )?);

    let api_key = match &config.metadata.tmdb_api_key {
        Some(key) => key.clone(),
        None => {
            warn!("No TMDb API key configured, metadata searches will fail");
            String::new()
        }
    };
    let search = Arc::new(TmdbClient::new(
        api_key,
        config.metadata.tmdb_base_url.clone(),
        config.request_timeout_sec,
    )?);

    let engine = Arc::new(MatchEngine::new(
        Arc::new(RegexTokenExtractor),
        search,
        cache,
        operator.media_root().to_path_buf(),
    ));

    let mut orchestrator =
        IngestOrchestrator::new(engine, ledger, operator, config.orchestrator_config())?
            .with_watcher_lock(config.watcher_lock_path());

    if let Some(plex) = &config.plex {
        info!("Plex server configured at {}", plex.url);
        let client = PlexClient::new(plex.url.clone(), plex.token.clone(), config.request_timeout_sec)?;
        orchestrator = orchestrator.with_catalog(Arc::new(client) as Arc<dyn CatalogClient>);
    }

    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CliConfig;
    use crate::ingestion::{IngestError, WatcherLockError};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let cli = CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            media_root: Some(dir.path().join("media")),
            ingest_dir: Some(dir.path().join("ingest")),
            ..Default::default()
        };
        AppConfig::resolve(&cli, None).unwrap()
    }

    #[tokio::test]
    async fn test_build_creates_databases_and_roots() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);

        let orchestrator = build_orchestrator(&config).unwrap();

        assert!(config.ledger_db_path().exists());
        assert!(config.cache_db_path().exists());
        assert!(dir.path().join("ingest").is_dir());
        assert!(orchestrator.catalog().is_none());
        assert!(!orchestrator.status().await.running);
    }

    #[tokio::test]
    async fn test_only_one_watcher_per_db_dir() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let daemon = build_orchestrator(&config).unwrap();
        let console = build_orchestrator(&config).unwrap();

        daemon.start().await.unwrap();
        let err = console.start().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::WatcherLock(WatcherLockError::Held { .. })
        ));
        assert!(!console.is_running().await);
        assert!(console.scan_once().await.is_err());

        daemon.stop().await.unwrap();
        console.start().await.unwrap();
        console.stop().await.unwrap();
    }
}
