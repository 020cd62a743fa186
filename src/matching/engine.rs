//! Filename → placement candidate.

use super::scoring::{rank_candidates, CONFIDENCE_FLOOR};
use super::tokens::{ParsedTokens, TokenExtractor};
use crate::metadata::{MediaKind, MetadataCache, MetadataCandidate, MetadataError, MetadataSearch};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A proposed identification of one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub tokens: ParsedTokens,
    pub external_id: u64,
    pub metadata: MetadataCandidate,
    pub confidence: f64,
    pub destination: PathBuf,
}

impl MatchCandidate {
    pub fn kind(&self) -> MediaKind {
        self.tokens.kind
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum UnmatchedReason {
    ExtractionFailed(String),
    NoResults,
    BelowFloor { best_confidence: f64 },
    SearchFailed(String),
}

impl std::fmt::Display for UnmatchedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmatchedReason::ExtractionFailed(err) => write!(f, "could not parse filename: {}", err),
            UnmatchedReason::NoResults => write!(f, "no search results"),
            UnmatchedReason::BelowFloor { best_confidence } => write!(
                f,
                "best candidate too weak ({:.0}% confidence)",
                best_confidence * 100.0
            ),
            UnmatchedReason::SearchFailed(err) => write!(f, "metadata search failed: {}", err),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchCandidate),
    Unmatched(UnmatchedReason),
}

impl MatchOutcome {
    pub fn candidate(&self) -> Option<&MatchCandidate> {
        match self {
            MatchOutcome::Matched(candidate) => Some(candidate),
            MatchOutcome::Unmatched(_) => None,
        }
    }

    pub fn into_candidate(self) -> Option<MatchCandidate> {
        match self {
            MatchOutcome::Matched(candidate) => Some(candidate),
            MatchOutcome::Unmatched(_) => None,
        }
    }
}

pub struct MatchEngine {
    extractor: Arc<dyn TokenExtractor>,
    search: Arc<dyn MetadataSearch>,
    cache: Arc<MetadataCache>,
    media_root: PathBuf,
}

impl MatchEngine {
    pub fn new(
        extractor: Arc<dyn TokenExtractor>,
        search: Arc<dyn MetadataSearch>,
        cache: Arc<MetadataCache>,
        media_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            extractor,
            search,
            cache,
            media_root: media_root.into(),
        }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    pub fn parse(&self, filename: &str) -> Result<ParsedTokens, super::ExtractionError> {
        self.extractor.extract(filename)
    }

    /// Cache-through search. Cache failures are logged and bypassed; a
    /// successful response is cached even when empty.
    pub async fn search(
        &self,
        title: &str,
        year: Option<i32>,
        kind: MediaKind,
    ) -> Result<Vec<MetadataCandidate>, MetadataError> {
        match self.cache.get(title, year, kind) {
            Ok(Some(cached)) => {
                debug!("Cache hit for {:?} ({:?}, {})", title, year, kind);
                return Ok(cached);
            }
            Ok(None) => debug!("Cache miss for {:?} ({:?}, {})", title, year, kind),
            Err(err) => warn!("Metadata cache lookup failed for {:?}: {}", title, err),
        }

        let results = self.search.search(title, year, kind).await?;
        if let Err(err) = self.cache.put(title, year, kind, &results) {
            warn!("Failed to cache metadata for {:?}: {}", title, err);
        }
        Ok(results)
    }

    /// Identifies a file by name. Never fails: every problem becomes an
    /// `Unmatched` reason.
    pub async fn match_file(&self, filename: &str) -> MatchOutcome {
        let tokens = match self.extractor.extract(filename) {
            Ok(tokens) => tokens,
            Err(err) => {
                info!("Could not extract tokens from {:?}: {}", filename, err);
                return MatchOutcome::Unmatched(UnmatchedReason::ExtractionFailed(err.to_string()));
            }
        };

        let results = match self.search(&tokens.title, tokens.year, tokens.kind).await {
            Ok(results) => results,
            Err(err) => {
                warn!("Metadata search failed for {:?}: {}", filename, err);
                return MatchOutcome::Unmatched(UnmatchedReason::SearchFailed(err.to_string()));
            }
        };

        let Some(&(best_index, confidence)) = rank_candidates(&tokens, &results).first() else {
            return MatchOutcome::Unmatched(UnmatchedReason::NoResults);
        };

        if confidence < CONFIDENCE_FLOOR {
            debug!(
                "Best candidate for {:?} below floor ({:.2} < {:.2})",
                filename, confidence, CONFIDENCE_FLOOR
            );
            return MatchOutcome::Unmatched(UnmatchedReason::BelowFloor {
                best_confidence: confidence,
            });
        }

        let metadata = results[best_index].clone();
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e.to_lowercase()))
            .unwrap_or_default();
        let destination = destination_for(&self.media_root, &tokens, &metadata, &extension);

        MatchOutcome::Matched(MatchCandidate {
            external_id: metadata.id,
            tokens,
            metadata,
            confidence,
            destination,
        })
    }

    /// Matches each name independently; results are in input order.
    pub async fn match_batch(&self, filenames: &[String]) -> Vec<MatchOutcome> {
        futures::future::join_all(filenames.iter().map(|name| self.match_file(name))).await
    }
}

/// Removes characters that are unsafe in path components.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Canonical library location. The folder name depends only on the
/// catalog title, release year and external ID; a candidate without a
/// release date gets no year, whatever the filename says.
pub fn destination_for(
    media_root: &Path,
    tokens: &ParsedTokens,
    metadata: &MetadataCandidate,
    extension: &str,
) -> PathBuf {
    let title = sanitize_title(&metadata.title);
    let base = match metadata.year() {
        Some(year) => format!("{} ({})", title, year),
        None => title.clone(),
    };
    let folder = format!("{} {{tmdb-{}}}", base, metadata.id);

    match tokens.kind {
        MediaKind::Movie => media_root
            .join("Movies")
            .join(&folder)
            .join(format!("{}{}", folder, extension)),
        MediaKind::Tv => {
            let season = tokens.season.unwrap_or(1);
            let file_name = match tokens.episode {
                Some(episode) => {
                    format!("{} - s{:02}e{:02}{}", title, season, episode, extension)
                }
                None => format!("{} - s{:02}{}", title, season, extension),
            };
            media_root
                .join("TV Shows")
                .join(&folder)
                .join(format!("Season {:02}", season))
                .join(file_name)
        }
    }
}
