use anyhow::{Context, Result};
use clap::Parser;
use media_ingest::config::{AppConfig, CliConfig, FileConfig};
use media_ingest::metadata::DEFAULT_TMDB_BASE_URL;
use media_ingest::build_orchestrator;
use std::path::PathBuf;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Unattended ingest watcher. Files it cannot auto-ingest stay in the ingest
/// directory; review them with cli-ingest. Only one watcher, this daemon or
/// `cli-ingest --watch`, may run per database directory.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory holding the ingest ledger and metadata cache databases.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Root of the organized media library.
    #[clap(long, value_parser = parse_path)]
    pub media_root: Option<PathBuf>,

    /// Directory watched for new files.
    #[clap(long, value_parser = parse_path)]
    pub ingest_dir: Option<PathBuf>,

    /// TMDb API key.
    #[clap(long, env = "TMDB_API_KEY", hide_env_values = true)]
    pub tmdb_api_key: Option<String>,

    /// TMDb API base URL.
    #[clap(long, default_value = DEFAULT_TMDB_BASE_URL)]
    pub tmdb_base_url: String,

    /// Plex server URL. Enables library rescans after each ingest.
    #[clap(long)]
    pub plex_url: Option<String>,

    /// Plex authentication token.
    #[clap(long, env = "PLEX_TOKEN", hide_env_values = true)]
    pub plex_token: Option<String>,

    /// Move confident matches into the library without review.
    #[clap(long)]
    pub auto_ingest: bool,

    /// Minimum confidence for automatic ingestion, in [0, 1].
    #[clap(long, default_value_t = 0.85)]
    pub confidence_threshold: f64,

    /// Seconds a file must stay unchanged before it is processed.
    #[clap(long, default_value_t = 5)]
    pub stability_seconds: u64,

    /// Interval between scans of the ingest directory, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// Maximum number of files processed concurrently.
    #[clap(long, default_value_t = 4)]
    pub max_workers: usize,

    /// Days a cached metadata response stays valid. Negative disables expiry.
    #[clap(long, default_value_t = 30, allow_hyphen_values = true)]
    pub cache_ttl_days: i64,

    /// Timeout in seconds for metadata and media server requests.
    #[clap(long, default_value_t = 30)]
    pub request_timeout_sec: u64,

    /// Do not start the watcher on launch.
    #[clap(long)]
    pub no_watcher: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            media_root: self.media_root.clone(),
            ingest_dir: self.ingest_dir.clone(),
            tmdb_api_key: self.tmdb_api_key.clone(),
            tmdb_base_url: self.tmdb_base_url.clone(),
            plex_url: self.plex_url.clone(),
            plex_token: self.plex_token.clone(),
            auto_ingest: self.auto_ingest,
            confidence_threshold: self.confidence_threshold,
            stability_seconds: self.stability_seconds,
            poll_interval_ms: self.poll_interval_ms,
            max_workers: self.max_workers,
            cache_ttl_days: self.cache_ttl_days,
            request_timeout_sec: self.request_timeout_sec,
            no_watcher: self.no_watcher,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}...", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    config.check_unattended()?;

    let orchestrator = build_orchestrator(&config)?;

    if config.watcher.auto_start {
        orchestrator.start().await?;
    } else {
        info!("Watcher not started (disabled by configuration)");
    }

    let settings = orchestrator.settings();
    info!(
        "Ready: auto_ingest={}, threshold={:.2}, stability={}s",
        settings.auto_ingest, settings.confidence_threshold, settings.stability_seconds
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down...");

    if orchestrator.is_running().await {
        if let Err(err) = orchestrator.stop().await {
            error!("Failed to stop watcher: {}", err);
        }
    }

    for entry in orchestrator.pending() {
        warn!(
            "{:?} left unresolved ({}); it stays in the ingest directory for the next watcher",
            entry.source, entry.reason
        );
    }
    let status = orchestrator.status().await;
    info!(
        "Processed {} file(s): {} auto-ingested, {} queued, {} failed, {} left pending",
        status.processed, status.auto_ingested, status.queued, status.failed, status.pending
    );
    Ok(())
}
