//! Filename identification: token extraction, candidate scoring and the
//! engine that combines them with the metadata cache.

mod engine;
mod scoring;
mod tokens;

pub use engine::{
    destination_for, sanitize_title, MatchCandidate, MatchEngine, MatchOutcome, UnmatchedReason,
};
pub use scoring::{score_candidate, title_similarity, year_factor, CONFIDENCE_FLOOR};
pub use tokens::{ExtractionError, ParsedTokens, RegexTokenExtractor, TokenExtractor};

#[cfg(feature = "mock")]
pub use tokens::MockTokenExtractor;
