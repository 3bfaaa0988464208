//! Core domain model and pure canonicalization utilities for PFRC.

pub mod canon;
pub mod model;

pub const CRATE_NAME: &str = "pfrc-core";

pub use canon::{
    canonicalize_url, classify_doc_type, content_hash, extract_domain, site_root,
    split_paragraphs, validate_page, CanonError, ValidationError, DEFAULT_MIN_PARAGRAPH_LEN,
};
pub use model::{
    DocType, Document, ExtractionMethod, Firm, NewRule, PageRecord, Paragraph, Permission, Rule,
    RuleCategory, RuleDraft, RuleKind, Severity, SoftCategory,
};
