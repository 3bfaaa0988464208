//! Pipeline orchestration: document ingestion, per-firm extraction runs, and
//! rule export.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub mod extract;
pub mod ingest;

pub const CRATE_NAME: &str = "pfrc-pipeline";

pub use extract::{export_rules_json, ExtractionOptions, ExtractionPipeline, ExtractionSummary};
pub use ingest::{ingest_json_file, ingest_records, IngestOptions, IngestStats};

/// Cooperative cancellation checked between documents: in-flight work
/// completes, committed batches stay.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
