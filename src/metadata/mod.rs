//! External metadata lookup: the typed candidate model, the search service
//! client and the SQLite-backed response cache in front of it.

mod cache;
mod models;
mod schema;
mod search;

pub use cache::{CacheStats, CacheTtl, MetadataCache};
pub use models::{MediaKind, MetadataCandidate};
pub use search::{MetadataError, MetadataSearch, TmdbClient, DEFAULT_TMDB_BASE_URL};

#[cfg(feature = "mock")]
pub use search::MockMetadataSearch;
