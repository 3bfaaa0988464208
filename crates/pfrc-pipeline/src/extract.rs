//! Per-firm rule extraction runs: taxonomy, hard + soft extraction, program
//! assignment, severity classification, and batched persistence.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use pfrc_core::{DocType, Document, NewRule};
use pfrc_extract::{
    assign_program, deduplicate, finalize, merge_similar, HardRuleExtractor, OllamaClassifier,
    ProgramTaxonomy, SoftRuleClassifier, SoftRuleDetector,
};
use pfrc_store::Store;

use crate::CancelToken;

/// Documents under this many trimmed characters carry no extractable rules.
const MIN_EXTRACTABLE_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct ExtractionOptions {
    pub doc_types: Vec<DocType>,
    pub clear_existing: bool,
    pub max_docs: Option<usize>,
    pub use_llm: bool,
    pub classifier_base_url: String,
    pub classifier_model: String,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            doc_types: vec![DocType::Article],
            clear_existing: false,
            max_docs: None,
            use_llm: true,
            classifier_base_url: pfrc_extract::classifier::DEFAULT_BASE_URL.to_string(),
            classifier_model: pfrc_extract::classifier::DEFAULT_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub run_id: Uuid,
    pub firm: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub llm_enabled: bool,
    pub documents_processed: usize,
    pub hard_rules_extracted: usize,
    pub soft_rules_extracted: usize,
    pub rules_stored: usize,
    pub rules_cleared: u64,
    pub errors: usize,
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct DocumentCounts {
    hard: usize,
    soft: usize,
    stored: usize,
}

pub struct ExtractionPipeline {
    store: Store,
    options: ExtractionOptions,
    taxonomy: ProgramTaxonomy,
    hard: HardRuleExtractor,
    detector: SoftRuleDetector,
    cancel: CancelToken,
}

impl ExtractionPipeline {
    /// Build a pipeline, probing the classification service once. An
    /// unreachable service downgrades the whole run to pattern-only soft
    /// detection; it is never an error.
    pub async fn new(store: Store, options: ExtractionOptions) -> Result<Self> {
        let classifier: Option<Box<dyn SoftRuleClassifier>> = if options.use_llm {
            let classifier = OllamaClassifier::new(
                &options.classifier_base_url,
                &options.classifier_model,
            )
            .context("building classifier client")?;
            if classifier.is_available().await {
                Some(Box::new(classifier))
            } else {
                warn!(
                    model = %options.classifier_model,
                    "classification service unavailable, soft rules fall back to patterns"
                );
                None
            }
        } else {
            None
        };
        Self::with_classifier(store, options, classifier)
    }

    /// Pipeline with an explicit classifier (or none), used by tests and by
    /// `--no-llm` runs.
    pub fn with_classifier(
        store: Store,
        options: ExtractionOptions,
        classifier: Option<Box<dyn SoftRuleClassifier>>,
    ) -> Result<Self> {
        Ok(Self {
            store,
            options,
            taxonomy: ProgramTaxonomy::builtin().context("loading taxonomy config")?,
            hard: HardRuleExtractor::builtin().context("loading hard rule patterns")?,
            detector: SoftRuleDetector::new(classifier).context("loading soft rule patterns")?,
            cancel: CancelToken::new(),
        })
    }

    /// Token checked between documents; cancelling stops new document
    /// processing while leaving committed batches intact.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn into_store(self) -> Store {
        self.store
    }

    /// Extract rules from every current document of one firm.
    pub async fn run(&mut self, firm_name: &str) -> Result<ExtractionSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("extraction_run", %run_id, firm = firm_name);
        let _guard = span.enter();

        let firm = self
            .store
            .firm_by_name(firm_name)
            .await?
            .ok_or_else(|| anyhow!("firm not found: {firm_name}"))?;

        let rules_cleared = if self.options.clear_existing {
            let cleared = self.store.clear_firm_rules(firm.id).await?;
            info!(cleared, "cleared existing rules before re-extraction");
            cleared
        } else {
            0
        };

        let mut documents = Vec::new();
        for doc_type in &self.options.doc_types {
            documents.extend(
                self.store
                    .current_documents(Some(firm_name), Some(*doc_type))
                    .await?,
            );
        }
        if let Some(max_docs) = self.options.max_docs {
            documents.truncate(max_docs);
        }
        info!(documents = documents.len(), "starting extraction");

        let mut summary = ExtractionSummary {
            run_id,
            firm: firm_name.to_string(),
            started_at,
            finished_at: started_at,
            llm_enabled: self.detector.llm_enabled(),
            documents_processed: 0,
            hard_rules_extracted: 0,
            soft_rules_extracted: 0,
            rules_stored: 0,
            rules_cleared,
            errors: 0,
            cancelled: false,
        };

        for document in &documents {
            if self.cancel.is_cancelled() {
                warn!("extraction cancelled, stopping before next document");
                summary.cancelled = true;
                break;
            }
            summary.documents_processed += 1;
            match self.process_document(firm.id, document).await {
                Ok(counts) => {
                    summary.hard_rules_extracted += counts.hard;
                    summary.soft_rules_extracted += counts.soft;
                    summary.rules_stored += counts.stored;
                }
                Err(err) => {
                    warn!(title = %document.title, %err, "document extraction failed");
                    summary.errors += 1;
                }
            }
        }

        summary.finished_at = Utc::now();
        info!(
            documents = summary.documents_processed,
            hard = summary.hard_rules_extracted,
            soft = summary.soft_rules_extracted,
            stored = summary.rules_stored,
            errors = summary.errors,
            "extraction finished"
        );
        Ok(summary)
    }

    async fn process_document(
        &mut self,
        firm_id: i64,
        document: &Document,
    ) -> Result<DocumentCounts> {
        if document.body_text.trim().chars().count() < MIN_EXTRACTABLE_CHARS {
            return Ok(DocumentCounts::default());
        }

        let programs = self.taxonomy.detect_programs(
            &document.body_text,
            &document.title,
            &document.canonical_url,
        );

        let hard_rules = deduplicate(self.hard.extract_all(&document.body_text));
        let soft_rules = merge_similar(self.detector.extract_soft_rules(&document.body_text).await);

        let counts = DocumentCounts {
            hard: hard_rules.len(),
            soft: soft_rules.len(),
            stored: 0,
        };

        let mut drafts = hard_rules;
        drafts.extend(soft_rules);
        if drafts.is_empty() {
            return Ok(counts);
        }
        assign_program(&mut drafts, &programs);
        let rules: Vec<NewRule> = drafts.into_iter().map(finalize).collect();

        let stored = self
            .store
            .insert_rules_batch(firm_id, &rules, Some(document.id))
            .await?;
        Ok(DocumentCounts { stored, ..counts })
    }
}

/// Export a firm's stored rules as a flat JSON array, timestamps as strings.
pub async fn export_rules_json(
    store: &mut Store,
    firm_name: &str,
    path: impl AsRef<Path>,
) -> Result<usize> {
    let path = path.as_ref();
    let firm = store
        .firm_by_name(firm_name)
        .await?
        .ok_or_else(|| anyhow!("firm not found: {firm_name}"))?;
    let rules = store.rules_for_firm(firm.id, None).await?;
    let json = serde_json::to_vec_pretty(&rules).context("serializing rules")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    info!(rules = rules.len(), file = %path.display(), "exported rules");
    Ok(rules.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{ingest_records, IngestOptions};
    use async_trait::async_trait;
    use pfrc_core::{ExtractionMethod, PageRecord, RuleKind, Severity, SoftCategory};
    use pfrc_extract::Classification;

    const RULE_SHEET: &str = "The Stellar 1-Step Challenge has the following rules for every participant, listed in full below.\n\n\
Profit Target: 10%\n\nDaily Loss Limit: 5%\n\nCopy trading is strictly prohibited\n\n\
We recommend maintaining a disciplined approach to trading at all times and avoiding gambling behavior entirely.";

    fn sheet_record() -> PageRecord {
        PageRecord {
            url: Some("https://help.fundednext.com/en/articles/100-stellar-rules".into()),
            title: Some("Stellar 1 Step Challenge Rules".into()),
            body: Some(RULE_SHEET.to_string()),
            html: None,
        }
    }

    async fn seeded_store() -> Store {
        let mut store = Store::open_in_memory().await.unwrap();
        ingest_records(&mut store, &[sheet_record()], &IngestOptions::default())
            .await
            .unwrap();
        store
    }

    struct StubClassifier;

    #[async_trait]
    impl SoftRuleClassifier for StubClassifier {
        async fn classify(&self, _paragraph: &str) -> Option<Classification> {
            Some(Classification {
                category: SoftCategory::TradingStyle,
                description: "Keep a steady trading cadence".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn end_to_end_run_stores_classified_rules() {
        let store = seeded_store().await;
        let options = ExtractionOptions {
            use_llm: false,
            ..Default::default()
        };
        let mut pipeline = ExtractionPipeline::with_classifier(store, options, None).unwrap();
        let summary = pipeline.run("FundedNext").await.unwrap();
        assert_eq!(summary.documents_processed, 1);
        assert!(!summary.llm_enabled);
        assert_eq!(summary.errors, 0);
        assert!(summary.hard_rules_extracted >= 3);
        assert_eq!(
            summary.rules_stored,
            summary.hard_rules_extracted + summary.soft_rules_extracted
        );

        let mut store = pipeline.into_store();
        let firm = store.firm_by_name("FundedNext").await.unwrap().unwrap();
        let rules = store.rules_for_firm(firm.id, None).await.unwrap();

        let profit = rules.iter().find(|r| r.kind == RuleKind::ProfitTarget).unwrap();
        assert_eq!(profit.value, "10%");
        assert_eq!(profit.severity, Severity::Important);
        // Document matched exactly one specific program, so every rule is
        // tagged with it.
        assert!(rules.iter().all(|r| r.program_id == "stellar_1_step"));

        let daily = rules.iter().find(|r| r.kind == RuleKind::DailyLossLimit).unwrap();
        assert_eq!(daily.severity, Severity::Critical);
        let copy = rules.iter().find(|r| r.kind == RuleKind::CopyTrading).unwrap();
        assert_eq!(copy.severity, Severity::Critical);
        assert!(rules.iter().all(|r| !r.raw_context.is_empty()));
        assert!(rules
            .iter()
            .all(|r| r.source_document_id.is_some()));
    }

    #[tokio::test]
    async fn classifier_rules_flow_through_the_run() {
        let store = seeded_store().await;
        let mut pipeline = ExtractionPipeline::with_classifier(
            store,
            ExtractionOptions::default(),
            Some(Box::new(StubClassifier)),
        )
        .unwrap();
        let summary = pipeline.run("FundedNext").await.unwrap();
        assert!(summary.llm_enabled);

        let mut store = pipeline.into_store();
        let firm = store.firm_by_name("FundedNext").await.unwrap().unwrap();
        let rules = store.rules_for_firm(firm.id, None).await.unwrap();
        let llm_rule = rules
            .iter()
            .find(|r| r.method == ExtractionMethod::Llm)
            .expect("classifier verdict stored");
        assert_eq!(llm_rule.kind, RuleKind::SoftTradingStyle);
        assert_eq!(llm_rule.severity, Severity::Optional);
    }

    #[tokio::test]
    async fn clear_existing_wipes_previous_rules_first() {
        let store = seeded_store().await;
        let options = ExtractionOptions {
            use_llm: false,
            ..Default::default()
        };
        let mut pipeline =
            ExtractionPipeline::with_classifier(store, options.clone(), None).unwrap();
        let first = pipeline.run("FundedNext").await.unwrap();
        assert!(first.rules_stored > 0);

        let store = pipeline.into_store();
        let options = ExtractionOptions {
            clear_existing: true,
            ..options
        };
        let mut pipeline = ExtractionPipeline::with_classifier(store, options, None).unwrap();
        let second = pipeline.run("FundedNext").await.unwrap();
        assert_eq!(second.rules_cleared, first.rules_stored as u64);

        let mut store = pipeline.into_store();
        let firm = store.firm_by_name("FundedNext").await.unwrap().unwrap();
        let rules = store.rules_for_firm(firm.id, None).await.unwrap();
        assert_eq!(rules.len(), second.rules_stored);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_document() {
        let mut store = Store::open_in_memory().await.unwrap();
        let records: Vec<PageRecord> = (0..3)
            .map(|i| PageRecord {
                url: Some(format!("https://help.fundednext.com/en/articles/{i}-rules")),
                title: Some(format!("Rules part {i}")),
                body: Some(RULE_SHEET.to_string()),
                html: None,
            })
            .collect();
        ingest_records(&mut store, &records, &IngestOptions::default())
            .await
            .unwrap();

        let options = ExtractionOptions {
            use_llm: false,
            ..Default::default()
        };
        let mut pipeline = ExtractionPipeline::with_classifier(store, options, None).unwrap();
        pipeline.cancel_token().cancel();
        let summary = pipeline.run("FundedNext").await.unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.documents_processed, 0);
    }

    #[tokio::test]
    async fn unknown_firm_is_an_error() {
        let store = Store::open_in_memory().await.unwrap();
        let options = ExtractionOptions {
            use_llm: false,
            ..Default::default()
        };
        let mut pipeline = ExtractionPipeline::with_classifier(store, options, None).unwrap();
        assert!(pipeline.run("NoSuchFirm").await.is_err());
    }

    #[tokio::test]
    async fn export_writes_a_flat_json_array() {
        let store = seeded_store().await;
        let options = ExtractionOptions {
            use_llm: false,
            ..Default::default()
        };
        let mut pipeline = ExtractionPipeline::with_classifier(store, options, None).unwrap();
        pipeline.run("FundedNext").await.unwrap();
        let mut store = pipeline.into_store();

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("rules.json");
        let exported = export_rules_json(&mut store, "FundedNext", &out).await.unwrap();
        assert!(exported > 0);

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        let rules = value.as_array().expect("flat array");
        assert_eq!(rules.len(), exported);
        let first = &rules[0];
        assert!(first.get("rule_type").is_some());
        assert!(first.get("severity").is_some());
        assert!(first["extracted_at"].is_string());
    }
}
