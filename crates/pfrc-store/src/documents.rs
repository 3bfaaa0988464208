//! Firm and document operations: lazy firm creation, hash-gated version
//! bumps, paragraph storage, and the read surface used by the pipeline and
//! the CLI.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};
use tracing::info;

use pfrc_core::{
    canonicalize_url, content_hash, split_paragraphs, DocType, Document, Firm, Paragraph,
    DEFAULT_MIN_PARAGRAPH_LEN,
};

use crate::{Store, StoreError, UpsertOutcome};

/// Bodies at or under this many characters skip paragraph storage.
const MIN_PARAGRAPH_BODY_LEN: usize = 100;

/// One row of a canonical URL's version history.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentVersion {
    pub id: i64,
    pub version: i64,
    pub title: String,
    pub content_hash: String,
    pub is_current: bool,
    pub first_seen_at: DateTime<Utc>,
    pub content_length: i64,
}

/// Search hit over title/body of current documents.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub id: i64,
    pub firm_name: String,
    pub title: String,
    pub canonical_url: String,
    pub doc_type: DocType,
    pub last_updated_at: DateTime<Utc>,
}

/// Aggregate document statistics, optionally scoped to one firm.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DocumentStats {
    pub total_documents: i64,
    pub unique_urls: i64,
    pub current_documents: i64,
    pub articles: i64,
    pub collections: i64,
    pub avg_content_length: f64,
    pub max_version: i64,
}

impl Store {
    /// Look a firm up by domain, creating it on first sight.
    pub async fn get_or_create_firm(
        &mut self,
        name: &str,
        domain: &str,
        website_url: Option<&str>,
        help_center_url: Option<&str>,
    ) -> Result<i64, StoreError> {
        let existing = sqlx::query("SELECT id FROM firm WHERE domain = ?")
            .bind(domain)
            .fetch_optional(&mut self.conn)
            .await?;
        if let Some(row) = existing {
            return Ok(row.try_get("id")?);
        }

        let result = sqlx::query(
            "INSERT INTO firm (name, domain, website_url, help_center_url, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(domain)
        .bind(website_url)
        .bind(help_center_url)
        .bind(Utc::now())
        .execute(&mut self.conn)
        .await?;
        let firm_id = result.last_insert_rowid();
        info!(firm = name, domain, firm_id, "created firm");
        Ok(firm_id)
    }

    pub async fn all_firms(&mut self) -> Result<Vec<Firm>, StoreError> {
        let rows = sqlx::query("SELECT * FROM firm ORDER BY name")
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter().map(firm_from_row).collect()
    }

    pub async fn firm_by_name(&mut self, name: &str) -> Result<Option<Firm>, StoreError> {
        let row = sqlx::query("SELECT * FROM firm WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut self.conn)
            .await?;
        row.as_ref().map(firm_from_row).transpose()
    }

    /// Insert or version a document for its canonical URL.
    ///
    /// The read-decide-write sequence runs in one transaction so the
    /// one-current-row invariant survives a crash mid-upsert. A new canonical
    /// URL inserts version 1; an unchanged content hash reuses the current
    /// row; a changed hash retires the current row and inserts version + 1,
    /// carrying `first_seen_at` forward.
    pub async fn upsert_document(
        &mut self,
        firm_id: i64,
        url: &str,
        title: &str,
        body_text: &str,
        doc_type: DocType,
    ) -> Result<(i64, UpsertOutcome), StoreError> {
        let canonical_url = canonicalize_url(url)?;
        let hash = content_hash(body_text);
        let now = Utc::now();

        let mut tx = self.conn.begin().await?;
        let existing = sqlx::query(
            "SELECT id, content_hash, version, first_seen_at FROM document
             WHERE firm_id = ? AND canonical_url = ? AND is_current = 1",
        )
        .bind(firm_id)
        .bind(&canonical_url)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = existing else {
            let result = sqlx::query(
                "INSERT INTO document
                 (firm_id, url, canonical_url, title, doc_type, body_text, content_hash,
                  version, is_current, first_seen_at, last_updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, 1, 1, ?, ?)",
            )
            .bind(firm_id)
            .bind(url)
            .bind(&canonical_url)
            .bind(title)
            .bind(doc_type.as_str())
            .bind(body_text)
            .bind(&hash)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok((result.last_insert_rowid(), UpsertOutcome::Inserted));
        };

        let current_id: i64 = row.try_get("id")?;
        let current_hash: String = row.try_get("content_hash")?;
        if current_hash == hash {
            tx.commit().await?;
            return Ok((current_id, UpsertOutcome::Duplicate));
        }

        let current_version: i64 = row.try_get("version")?;
        let first_seen_at: DateTime<Utc> = row.try_get("first_seen_at")?;
        sqlx::query("UPDATE document SET is_current = 0 WHERE id = ?")
            .bind(current_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query(
            "INSERT INTO document
             (firm_id, url, canonical_url, title, doc_type, body_text, content_hash,
              version, is_current, first_seen_at, last_updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(firm_id)
        .bind(url)
        .bind(&canonical_url)
        .bind(title)
        .bind(doc_type.as_str())
        .bind(body_text)
        .bind(&hash)
        .bind(current_version + 1)
        .bind(first_seen_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        info!(
            %canonical_url,
            version = current_version + 1,
            "document content changed, new version stored"
        );
        Ok((result.last_insert_rowid(), UpsertOutcome::Updated))
    }

    /// Segment and store paragraphs for a document version. No-op for bodies
    /// at or under the minimum length.
    pub async fn store_paragraphs(
        &mut self,
        document_id: i64,
        body_text: &str,
    ) -> Result<usize, StoreError> {
        if body_text.trim().chars().count() <= MIN_PARAGRAPH_BODY_LEN {
            return Ok(0);
        }
        let paragraphs = split_paragraphs(body_text, DEFAULT_MIN_PARAGRAPH_LEN);
        if paragraphs.is_empty() {
            return Ok(0);
        }

        let mut tx = self.conn.begin().await?;
        for (index, paragraph) in paragraphs.iter().enumerate() {
            sqlx::query(
                "INSERT INTO paragraph (document_id, paragraph_index, paragraph_text, paragraph_hash)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(document_id)
            .bind(index as i64)
            .bind(paragraph)
            .bind(content_hash(paragraph))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(paragraphs.len())
    }

    /// Current document versions, optionally filtered by firm name and type.
    pub async fn current_documents(
        &mut self,
        firm_name: Option<&str>,
        doc_type: Option<DocType>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut sql = String::from(
            "SELECT d.* FROM document d
             JOIN firm f ON d.firm_id = f.id
             WHERE d.is_current = 1",
        );
        if firm_name.is_some() {
            sql.push_str(" AND f.name = ?");
        }
        if doc_type.is_some() {
            sql.push_str(" AND d.doc_type = ?");
        }
        sql.push_str(" ORDER BY d.canonical_url");

        let mut query = sqlx::query(&sql);
        if let Some(name) = firm_name {
            query = query.bind(name);
        }
        if let Some(doc_type) = doc_type {
            query = query.bind(doc_type.as_str());
        }
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter().map(document_from_row).collect()
    }

    /// All stored versions of a canonical URL, newest first.
    pub async fn document_history(
        &mut self,
        canonical_url: &str,
    ) -> Result<Vec<DocumentVersion>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, version, title, content_hash, is_current, first_seen_at,
                    LENGTH(body_text) AS content_length
             FROM document WHERE canonical_url = ? ORDER BY version DESC",
        )
        .bind(canonical_url)
        .fetch_all(&mut self.conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(DocumentVersion {
                    id: row.try_get("id")?,
                    version: row.try_get("version")?,
                    title: row.try_get("title")?,
                    content_hash: row.try_get("content_hash")?,
                    is_current: row.try_get("is_current")?,
                    first_seen_at: row.try_get("first_seen_at")?,
                    content_length: row.try_get("content_length")?,
                })
            })
            .collect()
    }

    /// Case-insensitive substring search over title and body of current
    /// documents.
    pub async fn search_documents(
        &mut self,
        term: &str,
        firm_name: Option<&str>,
    ) -> Result<Vec<DocumentSummary>, StoreError> {
        let mut sql = String::from(
            "SELECT d.id, f.name AS firm_name, d.title, d.canonical_url, d.doc_type,
                    d.last_updated_at
             FROM document d
             JOIN firm f ON d.firm_id = f.id
             WHERE d.is_current = 1 AND (d.title LIKE ? OR d.body_text LIKE ?)",
        );
        if firm_name.is_some() {
            sql.push_str(" AND f.name = ?");
        }
        sql.push_str(" ORDER BY d.title");

        let needle = format!("%{term}%");
        let mut query = sqlx::query(&sql).bind(&needle).bind(&needle);
        if let Some(name) = firm_name {
            query = query.bind(name);
        }
        let rows = query.fetch_all(&mut self.conn).await?;
        rows.iter()
            .map(|row| {
                let doc_type = parse_label(row, "doc_type", DocType::parse)?;
                Ok(DocumentSummary {
                    id: row.try_get("id")?,
                    firm_name: row.try_get("firm_name")?,
                    title: row.try_get("title")?,
                    canonical_url: row.try_get("canonical_url")?,
                    doc_type,
                    last_updated_at: row.try_get("last_updated_at")?,
                })
            })
            .collect()
    }

    pub async fn paragraphs_for(&mut self, document_id: i64) -> Result<Vec<Paragraph>, StoreError> {
        let rows = sqlx::query(
            "SELECT document_id, paragraph_index, paragraph_text, paragraph_hash
             FROM paragraph WHERE document_id = ? ORDER BY paragraph_index",
        )
        .bind(document_id)
        .fetch_all(&mut self.conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(Paragraph {
                    document_id: row.try_get("document_id")?,
                    paragraph_index: row.try_get("paragraph_index")?,
                    paragraph_text: row.try_get("paragraph_text")?,
                    paragraph_hash: row.try_get("paragraph_hash")?,
                })
            })
            .collect()
    }

    pub async fn document_stats(
        &mut self,
        firm_name: Option<&str>,
    ) -> Result<DocumentStats, StoreError> {
        let mut sql = String::from(
            "SELECT COUNT(*) AS total_documents,
                    COUNT(DISTINCT canonical_url) AS unique_urls,
                    SUM(CASE WHEN is_current = 1 THEN 1 ELSE 0 END) AS current_documents,
                    SUM(CASE WHEN doc_type = 'article' THEN 1 ELSE 0 END) AS articles,
                    SUM(CASE WHEN doc_type = 'collection' THEN 1 ELSE 0 END) AS collections,
                    AVG(LENGTH(body_text)) AS avg_content_length,
                    MAX(version) AS max_version
             FROM document d",
        );
        if firm_name.is_some() {
            sql.push_str(" JOIN firm f ON d.firm_id = f.id WHERE f.name = ?");
        }

        let mut query = sqlx::query(&sql);
        if let Some(name) = firm_name {
            query = query.bind(name);
        }
        let row = query.fetch_one(&mut self.conn).await?;
        Ok(DocumentStats {
            total_documents: row.try_get("total_documents")?,
            unique_urls: row.try_get("unique_urls")?,
            current_documents: row.try_get::<Option<i64>, _>("current_documents")?.unwrap_or(0),
            articles: row.try_get::<Option<i64>, _>("articles")?.unwrap_or(0),
            collections: row.try_get::<Option<i64>, _>("collections")?.unwrap_or(0),
            avg_content_length: row
                .try_get::<Option<f64>, _>("avg_content_length")?
                .unwrap_or(0.0),
            max_version: row.try_get::<Option<i64>, _>("max_version")?.unwrap_or(0),
        })
    }
}

pub(crate) fn parse_label<T>(
    row: &SqliteRow,
    column: &'static str,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T, StoreError> {
    let value: String = row.try_get(column)?;
    parse(&value).ok_or(StoreError::UnknownLabel { column, value })
}

fn firm_from_row(row: &SqliteRow) -> Result<Firm, StoreError> {
    Ok(Firm {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        website_url: row.try_get("website_url")?,
        help_center_url: row.try_get("help_center_url")?,
        created_at: row.try_get("created_at")?,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<Document, StoreError> {
    let doc_type = parse_label(row, "doc_type", DocType::parse)?;
    Ok(Document {
        id: row.try_get("id")?,
        firm_id: row.try_get("firm_id")?,
        url: row.try_get("url")?,
        canonical_url: row.try_get("canonical_url")?,
        title: row.try_get("title")?,
        doc_type,
        body_text: row.try_get("body_text")?,
        content_hash: row.try_get("content_hash")?,
        version: row.try_get("version")?,
        is_current: row.try_get("is_current")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_updated_at: row.try_get("last_updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY_V1: &str = "The Stellar challenge requires a 10% profit target.\n\nTraders must respect the daily loss limit at all times while the account is active.";
    const BODY_V2: &str = "The Stellar challenge requires an 8% profit target.\n\nTraders must respect the daily loss limit at all times while the account is active.";

    async fn store_with_firm() -> (Store, i64) {
        let mut store = Store::open_in_memory().await.expect("open store");
        let firm_id = store
            .get_or_create_firm("FundedNext", "help.fundednext.com", None, None)
            .await
            .expect("create firm");
        (store, firm_id)
    }

    #[tokio::test]
    async fn firm_creation_is_lazy_and_keyed_by_domain() {
        let (mut store, firm_id) = store_with_firm().await;
        let again = store
            .get_or_create_firm("FundedNext", "help.fundednext.com", None, None)
            .await
            .unwrap();
        assert_eq!(firm_id, again);

        let other = store
            .get_or_create_firm("Alpine", "help.alpine.example", None, None)
            .await
            .unwrap();
        assert_ne!(firm_id, other);
        assert_eq!(store.all_firms().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn first_ingestion_inserts_version_one() {
        let (mut store, firm_id) = store_with_firm().await;
        let (id, outcome) = store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/1?ref=x",
                "Stellar Rules",
                BODY_V1,
                DocType::Article,
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let docs = store.current_documents(None, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert_eq!(docs[0].version, 1);
        assert_eq!(
            docs[0].canonical_url,
            "https://help.fundednext.com/en/articles/1"
        );
        assert!(docs[0].is_current);
    }

    #[tokio::test]
    async fn unchanged_reingestion_is_a_duplicate() {
        let (mut store, firm_id) = store_with_firm().await;
        let (first_id, _) = store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/1",
                "Stellar Rules",
                BODY_V1,
                DocType::Article,
            )
            .await
            .unwrap();

        // Same content, noisier whitespace and a tracking query parameter.
        let noisy = BODY_V1.replace(' ', "  ");
        let (second_id, outcome) = store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/1?utm=abc",
                "Stellar Rules",
                &noisy,
                DocType::Article,
            )
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Duplicate);
        assert_eq!(first_id, second_id);

        let history = store
            .document_history("https://help.fundednext.com/en/articles/1")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, 1);
    }

    #[tokio::test]
    async fn changed_reingestion_bumps_version_and_flips_current() {
        let (mut store, firm_id) = store_with_firm().await;
        let url = "https://help.fundednext.com/en/articles/1";
        let (first_id, _) = store
            .upsert_document(firm_id, url, "Stellar Rules", BODY_V1, DocType::Article)
            .await
            .unwrap();
        let (second_id, outcome) = store
            .upsert_document(firm_id, url, "Stellar Rules", BODY_V2, DocType::Article)
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_ne!(first_id, second_id);

        let history = store.document_history(url).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].version, 2);
        assert!(history[0].is_current);
        assert_eq!(history[1].version, 1);
        assert!(!history[1].is_current);
        // first_seen_at carries over to the new version.
        assert_eq!(history[0].first_seen_at, history[1].first_seen_at);

        let current = store.current_documents(None, None).await.unwrap();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].id, second_id);
    }

    #[tokio::test]
    async fn at_most_one_current_row_after_many_ingestions() {
        let (mut store, firm_id) = store_with_firm().await;
        let url = "https://help.fundednext.com/en/articles/7";
        for round in 0..5 {
            let body = format!("{BODY_V1}\n\nRevision marker {round} padding the body out.");
            store
                .upsert_document(firm_id, url, "Rules", &body, DocType::Article)
                .await
                .unwrap();
            // Re-ingest the identical body as well.
            store
                .upsert_document(firm_id, url, "Rules", &body, DocType::Article)
                .await
                .unwrap();
        }
        let history = store
            .document_history("https://help.fundednext.com/en/articles/7")
            .await
            .unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history.iter().filter(|v| v.is_current).count(), 1);
        assert_eq!(history[0].version, 5);
    }

    #[tokio::test]
    async fn paragraphs_are_stored_for_long_bodies_only() {
        let (mut store, firm_id) = store_with_firm().await;
        let (doc_id, _) = store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/2",
                "Long",
                BODY_V1,
                DocType::Article,
            )
            .await
            .unwrap();
        let stored = store.store_paragraphs(doc_id, BODY_V1).await.unwrap();
        assert_eq!(stored, 2);

        let paragraphs = store.paragraphs_for(doc_id).await.unwrap();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].paragraph_index, 0);
        assert_eq!(
            paragraphs[0].paragraph_hash,
            pfrc_core::content_hash(&paragraphs[0].paragraph_text)
        );

        let none = store.store_paragraphs(doc_id, "too short").await.unwrap();
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn search_and_stats_cover_current_documents() {
        let (mut store, firm_id) = store_with_firm().await;
        store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/1",
                "Stellar Rules",
                BODY_V1,
                DocType::Article,
            )
            .await
            .unwrap();
        store
            .upsert_document(
                firm_id,
                "https://help.fundednext.com/en/articles/1",
                "Stellar Rules",
                BODY_V2,
                DocType::Article,
            )
            .await
            .unwrap();

        let hits = store
            .search_documents("profit target", Some("FundedNext"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].firm_name, "FundedNext");

        let stats = store.document_stats(Some("FundedNext")).await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.unique_urls, 1);
        assert_eq!(stats.current_documents, 1);
        assert_eq!(stats.max_version, 2);
        assert!(stats.avg_content_length > 0.0);
    }

    #[tokio::test]
    async fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pfrc.db");
        {
            let mut store = Store::open(&path).await.unwrap();
            let firm_id = store
                .get_or_create_firm("FundedNext", "help.fundednext.com", None, None)
                .await
                .unwrap();
            store
                .upsert_document(
                    firm_id,
                    "https://help.fundednext.com/en/articles/1",
                    "Stellar Rules",
                    BODY_V1,
                    DocType::Article,
                )
                .await
                .unwrap();
            store.close().await.unwrap();
        }
        let mut reopened = Store::open(&path).await.unwrap();
        let docs = reopened.current_documents(None, None).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].title, "Stellar Rules");
    }
}
