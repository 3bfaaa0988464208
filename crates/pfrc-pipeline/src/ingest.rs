//! Ingestion of scraped page records into the versioned document store.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use pfrc_core::{
    classify_doc_type, extract_domain, site_root, validate_page, PageRecord,
};
use pfrc_store::{Store, UpsertOutcome};

/// Bodies under this many trimmed characters are treated as empty collection
/// containers and skipped.
const MIN_BODY_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub firm_name: String,
    pub store_paragraphs: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            firm_name: "FundedNext".to_string(),
            store_paragraphs: true,
        }
    }
}

/// Run-scoped ingestion counters, returned at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub duplicates: usize,
    pub skipped_empty: usize,
    pub errors: usize,
}

/// Ingest an ordered sequence of page records for one firm.
///
/// The firm is resolved lazily from the first record's domain. Invalid
/// records and storage failures are counted and skipped; only an empty input
/// or a failure to resolve the firm aborts the run.
pub async fn ingest_records(
    store: &mut Store,
    records: &[PageRecord],
    options: &IngestOptions,
) -> Result<IngestStats> {
    let Some(first_url) = records.iter().find_map(|record| record.url.as_deref()) else {
        bail!("no pages with a url in input");
    };
    let domain = extract_domain(first_url).context("extracting firm domain")?;
    let help_center_url = site_root(first_url).context("deriving help center root")?;
    let firm_id = store
        .get_or_create_firm(&options.firm_name, &domain, None, Some(&help_center_url))
        .await
        .context("resolving firm")?;

    let mut stats = IngestStats::default();
    for record in records {
        stats.processed += 1;

        if let Err(reason) = validate_page(record) {
            warn!(%reason, "skipping invalid page record");
            stats.errors += 1;
            continue;
        }
        let url = record.url.as_deref().unwrap_or_default();
        let title = record.title.as_deref().unwrap_or_default();
        let body = record.body_text();

        if body.trim().chars().count() < MIN_BODY_CHARS {
            stats.skipped_empty += 1;
            continue;
        }

        let doc_type = classify_doc_type(title, url, body);
        let (document_id, outcome) =
            match store.upsert_document(firm_id, url, title, body, doc_type).await {
                Ok(result) => result,
                Err(err) => {
                    warn!(url, %err, "failed to store document");
                    stats.errors += 1;
                    continue;
                }
            };
        match outcome {
            UpsertOutcome::Inserted => stats.inserted += 1,
            UpsertOutcome::Updated => stats.updated += 1,
            UpsertOutcome::Duplicate => {
                stats.duplicates += 1;
                continue;
            }
        }

        if options.store_paragraphs {
            if let Err(err) = store.store_paragraphs(document_id, body).await {
                warn!(document_id, %err, "failed to store paragraphs");
            }
        }
    }

    info!(
        firm = %options.firm_name,
        processed = stats.processed,
        inserted = stats.inserted,
        updated = stats.updated,
        duplicates = stats.duplicates,
        skipped = stats.skipped_empty,
        errors = stats.errors,
        "ingestion finished"
    );
    Ok(stats)
}

/// Ingest a scraped JSON file: a flat array of page records.
pub async fn ingest_json_file(
    store: &mut Store,
    path: impl AsRef<Path>,
    options: &IngestOptions,
) -> Result<IngestStats> {
    let path = path.as_ref();
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<PageRecord> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    info!(pages = records.len(), file = %path.display(), "loaded scraped pages");
    ingest_records(store, &records, options).await
}
