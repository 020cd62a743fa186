//! Client for the media server whose libraries receive ingested files.

mod client;

pub use client::{CatalogClient, CatalogError, LibraryItem, LibrarySection, PlexClient, ServerInfo};

#[cfg(feature = "mock")]
pub use client::MockCatalogClient;
