//! HTTP client for the external metadata search service.

use super::models::{MediaKind, MetadataCandidate};
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Metadata service returned status {0}")]
    Status(u16),

    #[error("Metadata service is not configured (missing API key)")]
    NotConfigured,
}

/// Title search against the external catalog. Results come back in the
/// service's relevance order.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait MetadataSearch: Send + Sync {
    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        kind: MediaKind,
    ) -> Result<Vec<MetadataCandidate>, MetadataError>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: u64,
    title: String,
    original_title: Option<String>,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbShow {
    id: u64,
    name: String,
    original_name: Option<String>,
    first_air_date: Option<String>,
}

// The service sends "" for unknown dates.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl From<TmdbMovie> for MetadataCandidate {
    fn from(movie: TmdbMovie) -> Self {
        MetadataCandidate {
            id: movie.id,
            title: movie.title,
            original_title: non_empty(movie.original_title),
            release_date: non_empty(movie.release_date),
        }
    }
}

impl From<TmdbShow> for MetadataCandidate {
    fn from(show: TmdbShow) -> Self {
        MetadataCandidate {
            id: show.id,
            title: show.name,
            original_title: non_empty(show.original_name),
            release_date: non_empty(show.first_air_date),
        }
    }
}

/// TMDb v3 search client.
pub struct TmdbClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TmdbClient {
    pub fn new(api_key: String, base_url: String, timeout_sec: u64) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    async fn get_results<T>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, MetadataError>
    where
        T: for<'de> Deserialize<'de>,
    {
        if self.api_key.is_empty() {
            return Err(MetadataError::NotConfigured);
        }
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MetadataError::Status(response.status().as_u16()));
        }

        let body: SearchResponse<T> = response.json().await?;
        Ok(body.results)
    }
}

#[async_trait]
impl MetadataSearch for TmdbClient {
    async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        kind: MediaKind,
    ) -> Result<Vec<MetadataCandidate>, MetadataError> {
        let mut query = vec![("query", title.to_string())];
        match kind {
            MediaKind::Movie => {
                if let Some(year) = year {
                    query.push(("year", year.to_string()));
                }
                let movies: Vec<TmdbMovie> = self.get_results("/search/movie", &query).await?;
                Ok(movies.into_iter().map(MetadataCandidate::from).collect())
            }
            MediaKind::Tv => {
                if let Some(year) = year {
                    query.push(("first_air_date_year", year.to_string()));
                }
                let shows: Vec<TmdbShow> = self.get_results("/search/tv", &query).await?;
                Ok(shows.into_iter().map(MetadataCandidate::from).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_movie_payload_maps_to_candidate() {
        let body = r#"{"page":1,"results":[{"id":27205,"title":"Inception","original_title":"Inception","release_date":"2010-07-15","popularity":83.9}]}"#;
        let parsed: SearchResponse<TmdbMovie> = serde_json::from_str(body).unwrap();
        let candidates: Vec<MetadataCandidate> =
            parsed.results.into_iter().map(Into::into).collect();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, 27205);
        assert_eq!(candidates[0].title, "Inception");
        assert_eq!(candidates[0].year(), Some(2010));
    }

    #[test]
    fn test_show_payload_maps_name_and_air_date() {
        let body = r#"{"results":[{"id":1396,"name":"Breaking Bad","original_name":"Breaking Bad","first_air_date":"2008-01-20"}]}"#;
        let parsed: SearchResponse<TmdbShow> = serde_json::from_str(body).unwrap();
        let candidate: MetadataCandidate = parsed.results.into_iter().next().unwrap().into();

        assert_eq!(candidate.title, "Breaking Bad");
        assert_eq!(candidate.release_date.as_deref(), Some("2008-01-20"));
    }

    #[test]
    fn test_empty_release_date_becomes_none() {
        let body = r#"{"results":[{"id":9,"title":"Untitled","release_date":""}]}"#;
        let parsed: SearchResponse<TmdbMovie> = serde_json::from_str(body).unwrap();
        let candidate: MetadataCandidate = parsed.results.into_iter().next().unwrap().into();
        assert_eq!(candidate.release_date, None);
        assert_eq!(candidate.year(), None);
    }

    #[tokio::test]
    async fn test_missing_api_key_is_reported() {
        let client = TmdbClient::new(String::new(), DEFAULT_TMDB_BASE_URL.to_string(), 5).unwrap();
        let result = client.search("Inception", Some(2010), MediaKind::Movie).await;
        assert!(matches!(result, Err(MetadataError::NotConfigured)));
    }
}
