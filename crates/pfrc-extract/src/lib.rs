//! Rule extraction for PFRC: program taxonomy detection, hard pattern
//! extraction, soft/behavioral detection with an optional LLM stage, and the
//! severity classification that finalizes drafts for storage.

use thiserror::Error;

pub mod classifier;
pub mod hard;
pub mod merge;
pub mod soft;
mod span;
pub mod taxonomy;

pub const CRATE_NAME: &str = "pfrc-extract";

pub use classifier::{Classification, NoopClassifier, OllamaClassifier, SoftRuleClassifier};
pub use hard::{classify_permission, deduplicate, HardRuleExtractor};
pub use merge::{assign_program, finalize, severity_of};
pub use soft::{merge_similar, SoftRuleDetector};
pub use taxonomy::ProgramTaxonomy;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("invalid pattern config: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: regex::Error,
    },
    #[error("reading pattern config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("building classifier client: {0}")]
    Http(#[from] reqwest::Error),
}
