//! Common test infrastructure
//!
//! Builds a complete ingest pipeline on temporary directories with an
//! in-process metadata service. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestPipeline, INCEPTION_FILE};
//!
//! #[tokio::test]
//! async fn test_preview() {
//!     let pipeline = TestPipeline::new();
//!     let preview = pipeline.orchestrator.preview(INCEPTION_FILE).await;
//!     assert!(preview.outcome.candidate().is_some());
//! }
//! ```

mod constants;
mod fixtures;

pub use constants::*;
pub use fixtures::{FakeMetadataService, TestPipeline};
