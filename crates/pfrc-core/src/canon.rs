//! URL canonicalization, content hashing, and paragraph segmentation.
//!
//! Everything here is pure: the document store and both extraction stages
//! consume these functions without any shared state.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::model::{DocType, PageRecord};

/// Paragraphs shorter than this are dropped during segmentation.
pub const DEFAULT_MIN_PARAGRAPH_LEN: usize = 50;

#[derive(Debug, Error)]
pub enum CanonError {
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("url has no host")]
    MissingHost,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    Missing(&'static str),
    #[error("empty required field: {0}")]
    Blank(&'static str),
}

/// Strip query string, fragment, and trailing slashes from the path, keeping
/// scheme + host + path as the stable identity key. Idempotent.
pub fn canonicalize_url(raw: &str) -> Result<String, CanonError> {
    let mut url = Url::parse(raw)?;
    url.set_query(None);
    url.set_fragment(None);
    let path = url.path().trim_end_matches('/').to_string();
    url.set_path(&path);
    Ok(url.to_string())
}

/// Host (plus port, when present) of a URL, e.g. `help.fundednext.com`.
pub fn extract_domain(raw: &str) -> Result<String, CanonError> {
    let url = Url::parse(raw)?;
    let host = url.host_str().ok_or(CanonError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Scheme + host root of a URL, e.g. `https://help.fundednext.com`.
pub fn site_root(raw: &str) -> Result<String, CanonError> {
    let url = Url::parse(raw)?;
    let host = url.host_str().ok_or(CanonError::MissingHost)?;
    Ok(match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    })
}

/// SHA-256 over whitespace-normalized text, as lowercase hex.
///
/// Whitespace runs collapse to single spaces before hashing, so reflowed
/// scrapes of unchanged content hash identically. Empty text hashes to the
/// digest of the empty string.
pub fn content_hash(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

fn blank_line_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"\n\s*\n").expect("blank-line splitter is valid"))
}

/// Split text on blank-line boundaries, trimming each piece and dropping
/// pieces shorter than `min_length` characters. Order preserved.
pub fn split_paragraphs(text: &str, min_length: usize) -> Vec<String> {
    blank_line_splitter()
        .split(text)
        .map(str::trim)
        .filter(|para| para.chars().count() >= min_length)
        .map(str::to_string)
        .collect()
}

/// Classify a page as homepage, collection, or article from title/URL/body
/// signals.
pub fn classify_doc_type(title: &str, url: &str, body: &str) -> DocType {
    let title_lower = title.to_lowercase();
    let url_lower = url.to_lowercase();

    let url_trimmed = url_lower.trim_end_matches('/');
    if ["/en", "/help", "/faq"]
        .iter()
        .any(|root| url_trimmed.ends_with(root))
    {
        return DocType::Homepage;
    }

    let body_chars = body.chars().count();
    let collection_signal = (title_lower.contains("articles") && body_chars < 2000)
        || (title_lower.contains("faq") && title_lower.contains("category"))
        || (body.matches('\n').count() > 50 && body_chars < 3000);
    let trimmed_chars = body.trim().chars().count();
    if collection_signal && trimmed_chars < 200 {
        return DocType::Collection;
    }

    if url_lower.contains("/articles/") {
        return DocType::Article;
    }
    if trimmed_chars > 200 {
        return DocType::Article;
    }
    DocType::Collection
}

/// Reject records missing any of the url/title/body fields.
pub fn validate_page(record: &PageRecord) -> Result<(), ValidationError> {
    match &record.url {
        None => return Err(ValidationError::Missing("url")),
        Some(url) if url.trim().is_empty() => return Err(ValidationError::Blank("url")),
        Some(_) => {}
    }
    match &record.title {
        None => return Err(ValidationError::Missing("title")),
        Some(title) if title.trim().is_empty() => return Err(ValidationError::Blank("title")),
        Some(_) => {}
    }
    if record.body.is_none() && record.html.is_none() {
        return Err(ValidationError::Missing("body"));
    }
    if record.body_text().trim().is_empty() {
        return Err(ValidationError::Blank("body"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_query_fragment_and_trailing_slash() {
        let expected = "https://help.example.com/en/articles/123";
        assert_eq!(
            canonicalize_url("https://help.example.com/en/articles/123?ref=twitter#main").unwrap(),
            expected
        );
        assert_eq!(
            canonicalize_url("https://help.example.com/en/articles/123#section").unwrap(),
            expected
        );
        assert_eq!(
            canonicalize_url("https://help.example.com/en/articles/123/").unwrap(),
            expected
        );
        assert_eq!(canonicalize_url(expected).unwrap(), expected);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let urls = [
            "https://h.example.com/en/a/1?x=1#y",
            "https://h.example.com/en/a/1/",
            "https://h.example.com",
        ];
        for url in urls {
            let once = canonicalize_url(url).unwrap();
            assert_eq!(canonicalize_url(&once).unwrap(), once);
        }
    }

    #[test]
    fn canonicalize_rejects_garbage() {
        assert!(canonicalize_url("not a url").is_err());
    }

    #[test]
    fn domain_and_site_root() {
        assert_eq!(
            extract_domain("https://help.fundednext.com/en/articles/9").unwrap(),
            "help.fundednext.com"
        );
        assert_eq!(
            extract_domain("http://localhost:8080/x").unwrap(),
            "localhost:8080"
        );
        assert_eq!(
            site_root("https://help.fundednext.com/en/articles/9").unwrap(),
            "https://help.fundednext.com"
        );
    }

    #[test]
    fn content_hash_is_whitespace_insensitive_but_content_sensitive() {
        assert_eq!(content_hash("a  b"), content_hash("a b"));
        assert_eq!(content_hash("a\n\t b "), content_hash("a b"));
        assert_ne!(content_hash("a b"), content_hash("a c"));
    }

    #[test]
    fn empty_text_hashes_to_empty_digest() {
        // SHA-256 of the empty string.
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(content_hash("   \n  "), content_hash(""));
    }

    #[test]
    fn paragraph_split_drops_short_pieces_and_keeps_order() {
        let text = "First paragraph with enough characters to clear the default minimum easily.\n\nshort\n\n  \n\nSecond paragraph that also has plenty of characters to survive the filter.";
        let paragraphs = split_paragraphs(text, DEFAULT_MIN_PARAGRAPH_LEN);
        assert_eq!(paragraphs.len(), 2);
        assert!(paragraphs[0].starts_with("First paragraph"));
        assert!(paragraphs[1].starts_with("Second paragraph"));
    }

    #[test]
    fn classify_homepage_collection_article() {
        assert_eq!(
            classify_doc_type("Help Center", "https://help.example.com/en", "short"),
            DocType::Homepage
        );
        assert_eq!(
            classify_doc_type("All Articles", "https://help.example.com/en/collections/1", "tiny"),
            DocType::Collection
        );
        assert_eq!(
            classify_doc_type("Rules", "https://help.example.com/en/articles/5", "tiny body"),
            DocType::Article
        );
        let long_body = "x".repeat(300);
        assert_eq!(
            classify_doc_type("Rules", "https://help.example.com/en/page", &long_body),
            DocType::Article
        );
    }

    #[test]
    fn validate_page_flags_missing_and_blank_fields() {
        let mut record = PageRecord {
            url: Some("https://example.com/a".into()),
            title: Some("Title".into()),
            body: Some("Body".into()),
            html: None,
        };
        assert!(validate_page(&record).is_ok());

        record.title = Some("   ".into());
        assert_eq!(validate_page(&record), Err(ValidationError::Blank("title")));

        record.title = None;
        assert_eq!(validate_page(&record), Err(ValidationError::Missing("title")));

        record.title = Some("Title".into());
        record.body = None;
        assert_eq!(validate_page(&record), Err(ValidationError::Missing("body")));

        record.html = Some("".into());
        assert_eq!(validate_page(&record), Err(ValidationError::Blank("body")));
    }
}
