use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_root: Option<String>,
    pub ingest_dir: Option<String>,
    pub request_timeout_sec: Option<u64>,

    // Feature configs
    pub metadata: Option<MetadataConfig>,
    pub plex: Option<PlexConfig>,
    pub watcher: Option<WatcherConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MetadataConfig {
    pub tmdb_api_key: Option<String>,
    pub tmdb_base_url: Option<String>,
    /// Negative disables expiry.
    pub cache_ttl_days: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlexConfig {
    pub url: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WatcherConfig {
    pub auto_start: Option<bool>,
    pub auto_ingest: Option<bool>,
    pub confidence_threshold: Option<f64>,
    pub stability_seconds: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub max_workers: Option<usize>,
    pub recursive: Option<bool>,
    pub allowed_extensions: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
db_dir = "/data/db"
media_root = "/data/media"

[metadata]
tmdb_api_key = "abc"
cache_ttl_days = -1

[plex]
url = "http://plex:32400"

[watcher]
auto_ingest = true
confidence_threshold = 0.9
allowed_extensions = [".mkv"]
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_dir.as_deref(), Some("/data/db"));
        assert!(config.ingest_dir.is_none());
        let metadata = config.metadata.unwrap();
        assert_eq!(metadata.tmdb_api_key.as_deref(), Some("abc"));
        assert_eq!(metadata.cache_ttl_days, Some(-1));
        assert_eq!(config.plex.unwrap().token, None);
        let watcher = config.watcher.unwrap();
        assert_eq!(watcher.auto_ingest, Some(true));
        assert_eq!(watcher.confidence_threshold, Some(0.9));
        assert_eq!(watcher.allowed_extensions, Some(vec![".mkv".to_string()]));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "db_dir = [").unwrap();
        let err = FileConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
