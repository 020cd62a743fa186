//! HTTP client for the Plex media server.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Media server returned status {0}")]
    Status(u16),

    #[error("Media server request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A library section (e.g. "Movies") and the folders it indexes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibrarySection {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryItem {
    pub id: String,
    pub title: String,
    pub kind: String,
    pub year: Option<i32>,
    pub added_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub platform: String,
    pub machine_id: String,
}

#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync {
    async fn list_sections(&self) -> Result<Vec<LibrarySection>, CatalogError>;

    /// Asks the server to rescan a section's folders.
    async fn scan_section(&self, section_id: &str) -> Result<(), CatalogError>;

    async fn search_section(
        &self,
        section_id: &str,
        query: &str,
    ) -> Result<Vec<LibraryItem>, CatalogError>;

    async fn recent_items(
        &self,
        section_id: &str,
        limit: usize,
    ) -> Result<Vec<LibraryItem>, CatalogError>;

    async fn server_info(&self) -> Result<ServerInfo, CatalogError>;
}

// Wire format: every response is wrapped in a MediaContainer.

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<PlexDirectory>,
}

#[derive(Debug, Deserialize)]
struct PlexDirectory {
    key: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "Location", default)]
    locations: Vec<PlexLocation>,
}

#[derive(Debug, Deserialize)]
struct PlexLocation {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ItemsContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexMetadata {
    rating_key: String,
    title: String,
    #[serde(rename = "type")]
    kind: String,
    year: Option<i32>,
    added_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdentityContainer {
    friendly_name: Option<String>,
    version: Option<String>,
    platform: Option<String>,
    machine_identifier: Option<String>,
}

impl From<PlexMetadata> for LibraryItem {
    fn from(item: PlexMetadata) -> Self {
        LibraryItem {
            id: item.rating_key,
            title: item.title,
            kind: item.kind,
            year: item.year,
            added_at: item.added_at,
        }
    }
}

pub struct PlexClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(base_url: String, token: String, timeout_sec: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<reqwest::Response, CatalogError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header("X-Plex-Token", &self.token)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response),
            reqwest::StatusCode::NOT_FOUND => Err(CatalogError::NotFound(path.to_string())),
            status => Err(CatalogError::Status(status.as_u16())),
        }
    }

    async fn get_items(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<LibraryItem>, CatalogError> {
        let body: Envelope<ItemsContainer> = self.get(path, query).await?.json().await?;
        Ok(body
            .container
            .metadata
            .into_iter()
            .map(LibraryItem::from)
            .collect())
    }
}

#[async_trait]
impl CatalogClient for PlexClient {
    async fn list_sections(&self) -> Result<Vec<LibrarySection>, CatalogError> {
        let body: Envelope<SectionsContainer> =
            self.get("/library/sections", &[]).await?.json().await?;
        Ok(body
            .container
            .directories
            .into_iter()
            .map(|dir| LibrarySection {
                id: dir.key,
                title: dir.title,
                kind: dir.kind,
                locations: dir.locations.into_iter().map(|l| l.path).collect(),
            })
            .collect())
    }

    async fn scan_section(&self, section_id: &str) -> Result<(), CatalogError> {
        self.get(&format!("/library/sections/{}/refresh", section_id), &[])
            .await?;
        Ok(())
    }

    async fn search_section(
        &self,
        section_id: &str,
        query: &str,
    ) -> Result<Vec<LibraryItem>, CatalogError> {
        self.get_items(
            &format!("/library/sections/{}/search", section_id),
            &[("query", query.to_string())],
        )
        .await
    }

    async fn recent_items(
        &self,
        section_id: &str,
        limit: usize,
    ) -> Result<Vec<LibraryItem>, CatalogError> {
        let mut items = self
            .get_items(
                &format!("/library/sections/{}/recentlyAdded", section_id),
                &[
                    ("X-Plex-Container-Start", "0".to_string()),
                    ("X-Plex-Container-Size", limit.to_string()),
                ],
            )
            .await?;
        items.truncate(limit);
        Ok(items)
    }

    async fn server_info(&self) -> Result<ServerInfo, CatalogError> {
        let body: Envelope<IdentityContainer> = self.get("/", &[]).await?.json().await?;
        let info = body.container;
        Ok(ServerInfo {
            name: info.friendly_name.unwrap_or_default(),
            version: info.version.unwrap_or_default(),
            platform: info.platform.unwrap_or_default(),
            machine_id: info.machine_identifier.unwrap_or_default(),
        })
    }
}
