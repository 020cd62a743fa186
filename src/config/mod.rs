mod file_config;

pub use file_config::{FileConfig, MetadataConfig, PlexConfig, WatcherConfig};

use crate::ingestion::{ExtensionWhitelist, OrchestratorConfig, WatcherSettings, DEFAULT_EXTENSIONS};
use crate::metadata::{CacheTtl, DEFAULT_TMDB_BASE_URL};
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_root: Option<PathBuf>,
    pub ingest_dir: Option<PathBuf>,
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub plex_url: Option<String>,
    pub plex_token: Option<String>,
    pub auto_ingest: bool,
    pub confidence_threshold: f64,
    pub stability_seconds: u64,
    pub poll_interval_ms: u64,
    pub max_workers: usize,
    pub cache_ttl_days: i64,
    pub request_timeout_sec: u64,
    pub no_watcher: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            media_root: None,
            ingest_dir: None,
            tmdb_api_key: None,
            tmdb_base_url: DEFAULT_TMDB_BASE_URL.to_string(),
            plex_url: None,
            plex_token: None,
            auto_ingest: false,
            confidence_threshold: 0.85,
            stability_seconds: 5,
            poll_interval_ms: 1000,
            max_workers: 4,
            cache_ttl_days: 30,
            request_timeout_sec: 30,
            no_watcher: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_root: PathBuf,
    pub ingest_dir: PathBuf,
    pub request_timeout_sec: u64,

    // Feature configs (with defaults)
    pub metadata: MetadataSettings,
    pub watcher: WatcherConfigSettings,

    // Media server integration, only when a URL is configured
    pub plex: Option<PlexSettings>,
}

#[derive(Debug, Clone)]
pub struct MetadataSettings {
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: String,
    pub cache_ttl: CacheTtl,
}

#[derive(Debug, Clone)]
pub struct PlexSettings {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct WatcherConfigSettings {
    pub auto_start: bool,
    pub auto_ingest: bool,
    pub confidence_threshold: f64,
    pub stability_seconds: u64,
    pub poll_interval: Duration,
    pub max_workers: usize,
    pub recursive: bool,
    pub allowed_extensions: Vec<String>,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_root = file
            .media_root
            .map(PathBuf::from)
            .or_else(|| cli.media_root.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("media_root must be specified via --media-root or in config file")
            })?;
        let ingest_dir = file
            .ingest_dir
            .map(PathBuf::from)
            .or_else(|| cli.ingest_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("ingest_dir must be specified via --ingest-dir or in config file")
            })?;

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);

        let metadata_file = file.metadata.unwrap_or_default();
        let metadata = MetadataSettings {
            tmdb_api_key: metadata_file
                .tmdb_api_key
                .or_else(|| cli.tmdb_api_key.clone())
                .filter(|key| !key.trim().is_empty()),
            tmdb_base_url: metadata_file
                .tmdb_base_url
                .unwrap_or_else(|| cli.tmdb_base_url.clone()),
            cache_ttl: CacheTtl::from_days(
                metadata_file.cache_ttl_days.unwrap_or(cli.cache_ttl_days),
            ),
        };

        let watcher_file = file.watcher.unwrap_or_default();
        let confidence_threshold = watcher_file
            .confidence_threshold
            .unwrap_or(cli.confidence_threshold);
        if !(0.0..=1.0).contains(&confidence_threshold) {
            bail!(
                "confidence_threshold must be within [0, 1], got {}",
                confidence_threshold
            );
        }
        let max_workers = watcher_file.max_workers.unwrap_or(cli.max_workers);
        if max_workers == 0 {
            bail!("max_workers must be at least 1");
        }
        let allowed_extensions = watcher_file.allowed_extensions.unwrap_or_else(|| {
            DEFAULT_EXTENSIONS.iter().map(|ext| ext.to_string()).collect()
        });
        if allowed_extensions.is_empty() {
            bail!("allowed_extensions must not be empty");
        }
        let watcher = WatcherConfigSettings {
            auto_start: watcher_file.auto_start.unwrap_or(!cli.no_watcher),
            auto_ingest: watcher_file.auto_ingest.unwrap_or(cli.auto_ingest),
            confidence_threshold,
            stability_seconds: watcher_file
                .stability_seconds
                .unwrap_or(cli.stability_seconds),
            poll_interval: Duration::from_millis(
                watcher_file.poll_interval_ms.unwrap_or(cli.poll_interval_ms),
            ),
            max_workers,
            recursive: watcher_file.recursive.unwrap_or(true),
            allowed_extensions,
        };

        // Plex settings - TOML [plex] section takes precedence over CLI args
        let plex_file = file.plex.unwrap_or_default();
        let plex_url = plex_file.url.or_else(|| cli.plex_url.clone());
        let plex_token = plex_file.token.or_else(|| cli.plex_token.clone());
        let plex = match (plex_url, plex_token) {
            (Some(url), token) => Some(PlexSettings {
                url,
                token: token.unwrap_or_default(),
            }),
            (None, Some(_)) => bail!("A Plex token was given without a Plex URL"),
            (None, None) => None,
        };

        Ok(Self {
            db_dir,
            media_root,
            ingest_dir,
            request_timeout_sec,
            metadata,
            watcher,
            plex,
        })
    }

    pub fn ledger_db_path(&self) -> PathBuf {
        self.db_dir.join("ingest_ledger.db")
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.db_dir.join("metadata_cache.db")
    }

    /// Held by whichever process runs the watcher.
    pub fn watcher_lock_path(&self) -> PathBuf {
        self.db_dir.join("watcher.lock")
    }

    /// An unattended watcher must be able to resolve files on its own: with
    /// auto-ingest off every file would wait for a review nobody can give.
    pub fn check_unattended(&self) -> Result<()> {
        if self.watcher.auto_start && !self.watcher.auto_ingest {
            bail!(
                "auto_ingest is disabled, so every detected file would wait for review and \
                 ingest-server has no review console. Enable auto_ingest, start it with \
                 --no-watcher, or run the watcher from cli-ingest --watch instead"
            );
        }
        Ok(())
    }

    pub fn extension_whitelist(&self) -> ExtensionWhitelist {
        ExtensionWhitelist::new(&self.watcher.allowed_extensions)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            settings: WatcherSettings {
                auto_ingest: self.watcher.auto_ingest,
                confidence_threshold: self.watcher.confidence_threshold,
                stability_seconds: self.watcher.stability_seconds,
            },
            poll_interval: self.watcher.poll_interval,
            max_workers: self.watcher.max_workers,
            recursive: self.watcher.recursive,
        }
    }
}
