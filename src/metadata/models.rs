use serde::{Deserialize, Serialize};

/// Kind of media a file or catalog entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Tv,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Tv => "tv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "movie" | "movies" => Some(MediaKind::Movie),
            "tv" | "show" | "episode" => Some(MediaKind::Tv),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One search result from the metadata service, normalized at the client
/// boundary so TV and movie results share a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataCandidate {
    pub id: u64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_title: Option<String>,
    /// Release date (movies) or first air date (TV), `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
}

impl MetadataCandidate {
    pub fn year(&self) -> Option<i32> {
        self.release_date
            .as_deref()
            .and_then(|date| date.get(0..4))
            .and_then(|year| year.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_from_release_date() {
        let candidate = MetadataCandidate {
            id: 27205,
            title: "Inception".to_string(),
            original_title: None,
            release_date: Some("2010-07-16".to_string()),
        };
        assert_eq!(candidate.year(), Some(2010));
    }

    #[test]
    fn test_year_missing_or_malformed() {
        let mut candidate = MetadataCandidate {
            id: 1,
            title: "Unknown".to_string(),
            original_title: None,
            release_date: None,
        };
        assert_eq!(candidate.year(), None);
        candidate.release_date = Some("TBA".to_string());
        assert_eq!(candidate.year(), None);
    }

    #[test]
    fn test_media_kind_parse() {
        assert_eq!(MediaKind::parse("Movie"), Some(MediaKind::Movie));
        assert_eq!(MediaKind::parse("tv"), Some(MediaKind::Tv));
        assert_eq!(MediaKind::parse("episode"), Some(MediaKind::Tv));
        assert_eq!(MediaKind::parse("album"), None);
    }
}
