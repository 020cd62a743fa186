//! Filename token extraction.

use crate::metadata::MediaKind;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// What could be guessed about a file from its name alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedTokens {
    pub title: String,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    pub kind: MediaKind,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No title could be extracted from {0:?}")]
    NoTitle(String),
}

#[cfg_attr(feature = "mock", mockall::automock)]
pub trait TokenExtractor: Send + Sync {
    fn extract(&self, filename: &str) -> Result<ParsedTokens, ExtractionError>;
}

lazy_static! {
    static ref EPISODE_RE: Regex = Regex::new(r"(?i)^s(\d{1,2})e(\d{1,3})").unwrap();
    static ref CROSS_EPISODE_RE: Regex = Regex::new(r"(?i)^(\d{1,2})x(\d{2,3})$").unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"^(19\d{2}|20\d{2})$").unwrap();
    static ref RELEASE_TAG_RE: Regex = Regex::new(
        r"(?i)^(2160p|1080p|1080i|720p|576p|480p|4k|uhd|hdr|hdr10|dv|bluray|blu-ray|bdrip|brrip|remux|web|webrip|web-dl|webdl|hdtv|dvdrip|dvd|hdrip|x264|x265|h264|h265|hevc|avc|xvid|divx|aac|ac3|eac3|dts|ddp5|truehd|atmos|proper|repack|extended|unrated|remastered|internal|limited|multi)$"
    )
    .unwrap();
}

/// Scene-style filename parser.
///
/// The title runs up to the last plausible year before the first release tag
/// or episode marker. `S01E02` and `1x02` mark TV episodes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexTokenExtractor;

impl RegexTokenExtractor {
    fn episode_of(token: &str) -> Option<(u32, u32)> {
        let caps = EPISODE_RE
            .captures(token)
            .or_else(|| CROSS_EPISODE_RE.captures(token))?;
        let season = caps.get(1)?.as_str().parse().ok()?;
        let episode = caps.get(2)?.as_str().parse().ok()?;
        Some((season, episode))
    }
}

impl TokenExtractor for RegexTokenExtractor {
    fn extract(&self, filename: &str) -> Result<ParsedTokens, ExtractionError> {
        let name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(filename);
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);

        let tokens: Vec<&str> = stem
            .split(|c: char| matches!(c, '.' | '_' | ' ' | '[' | ']' | '(' | ')'))
            .filter(|t| t.chars().any(|c| c.is_alphanumeric()))
            .collect();

        let episode = tokens.iter().find_map(|t| Self::episode_of(t));

        let marker_idx = tokens
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, t)| Self::episode_of(t).is_some() || RELEASE_TAG_RE.is_match(t))
            .map(|(i, _)| i)
            .unwrap_or(tokens.len());

        let year_idx = (1..marker_idx).rev().find(|&i| YEAR_RE.is_match(tokens[i]));
        let title_end = year_idx.unwrap_or(marker_idx);

        let title = tokens[..title_end].join(" ").trim().to_string();
        if title.is_empty() || Self::episode_of(&title).is_some() {
            return Err(ExtractionError::NoTitle(filename.to_string()));
        }

        Ok(ParsedTokens {
            title,
            year: year_idx.and_then(|i| tokens[i].parse().ok()),
            season: episode.map(|(s, _)| s),
            episode: episode.map(|(_, e)| e),
            kind: if episode.is_some() {
                MediaKind::Tv
            } else {
                MediaKind::Movie
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(name: &str) -> ParsedTokens {
        RegexTokenExtractor.extract(name).unwrap()
    }

    #[test]
    fn test_scene_movie_name() {
        let tokens = extract("Inception.2010.1080p.BluRay.x264.mkv");
        assert_eq!(tokens.title, "Inception");
        assert_eq!(tokens.year, Some(2010));
        assert_eq!(tokens.kind, MediaKind::Movie);
        assert_eq!(tokens.season, None);
    }

    #[test]
    fn test_title_with_spaces_and_parenthesized_year() {
        let tokens = extract("The Dark Knight (2008).mp4");
        assert_eq!(tokens.title, "The Dark Knight");
        assert_eq!(tokens.year, Some(2008));
    }

    #[test]
    fn test_numeric_title_is_not_taken_as_year() {
        let tokens = extract("1917.2019.720p.WEB-DL.mkv");
        assert_eq!(tokens.title, "1917");
        assert_eq!(tokens.year, Some(2019));
    }

    #[test]
    fn test_last_year_before_tags_wins() {
        let tokens = extract("Blade.Runner.2049.2017.2160p.mkv");
        assert_eq!(tokens.title, "Blade Runner 2049");
        assert_eq!(tokens.year, Some(2017));
    }

    #[test]
    fn test_tv_episode() {
        let tokens = extract("Breaking_Bad_S01E02_720p_HDTV.mkv");
        assert_eq!(tokens.title, "Breaking Bad");
        assert_eq!(tokens.kind, MediaKind::Tv);
        assert_eq!(tokens.season, Some(1));
        assert_eq!(tokens.episode, Some(2));
        assert_eq!(tokens.year, None);
    }

    #[test]
    fn test_tv_episode_with_year_and_cross_notation() {
        let tokens = extract("Doctor.Who.2005.3x07.avi");
        assert_eq!(tokens.title, "Doctor Who");
        assert_eq!(tokens.year, Some(2005));
        assert_eq!(tokens.season, Some(3));
        assert_eq!(tokens.episode, Some(7));
    }

    #[test]
    fn test_full_path_uses_file_name() {
        let tokens = extract("/ingest/downloads/Heat.1995.mkv");
        assert_eq!(tokens.title, "Heat");
        assert_eq!(tokens.year, Some(1995));
    }

    #[test]
    fn test_name_without_title_fails() {
        assert!(RegexTokenExtractor.extract("S01E02.mkv").is_err());
        assert!(RegexTokenExtractor.extract("....mkv").is_err());
    }
}
