//! Media Ingest Server Library
//!
//! This library exposes the internal modules for testing and reuse by the
//! daemon and the interactive console.

pub mod app;
pub mod cli_style;
pub mod config;
pub mod ingestion;
pub mod matching;
pub mod media_server;
pub mod metadata;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use app::build_orchestrator;
pub use config::{AppConfig, CliConfig, FileConfig};
pub use ingestion::{IngestLedger, IngestOrchestrator, SqliteIngestLedger};
pub use matching::MatchEngine;
pub use metadata::MetadataCache;
