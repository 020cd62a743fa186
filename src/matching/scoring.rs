//! Confidence scoring of search results against parsed filename tokens.
//!
//! confidence = title similarity × year factor, both in [0, 1].

use super::tokens::ParsedTokens;
use crate::metadata::MetadataCandidate;

/// Best candidates scoring below this are treated as no match at all.
pub const CONFIDENCE_FLOOR: f64 = 0.3;

const YEAR_EXACT: f64 = 1.0;
const YEAR_UNKNOWN_ON_CANDIDATE: f64 = 0.9;
const YEAR_OFF_BY_ONE: f64 = 0.85;
const YEAR_MISMATCH: f64 = 0.6;

/// Lowercases, turns `&` into "and", drops punctuation and collapses
/// whitespace.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase().replace('&', " and ");
    lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1)
                .min(current[j] + 1)
                .min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// 1.0 for identical normalized titles, falling linearly with edit distance.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let distance = levenshtein_distance(&a, &b);
    let max_len = a.chars().count().max(b.chars().count());
    1.0 - distance as f64 / max_len as f64
}

pub fn year_factor(parsed: Option<i32>, candidate: Option<i32>) -> f64 {
    match (parsed, candidate) {
        (None, _) => YEAR_EXACT,
        (Some(_), None) => YEAR_UNKNOWN_ON_CANDIDATE,
        (Some(p), Some(c)) if p == c => YEAR_EXACT,
        (Some(p), Some(c)) if (p - c).abs() == 1 => YEAR_OFF_BY_ONE,
        _ => YEAR_MISMATCH,
    }
}

pub fn score_candidate(tokens: &ParsedTokens, candidate: &MetadataCandidate) -> f64 {
    let title_score = std::iter::once(candidate.title.as_str())
        .chain(candidate.original_title.as_deref())
        .map(|title| title_similarity(&tokens.title, title))
        .fold(0.0_f64, f64::max);

    (title_score * year_factor(tokens.year, candidate.year())).clamp(0.0, 1.0)
}

/// Scores every candidate and returns (index, confidence) sorted by
/// confidence, highest first. The sort is stable, so equal scores keep the
/// service's own relevance order.
pub fn rank_candidates(
    tokens: &ParsedTokens,
    candidates: &[MetadataCandidate],
) -> Vec<(usize, f64)> {
    let mut ranked: Vec<(usize, f64)> = candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, score_candidate(tokens, c)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}
