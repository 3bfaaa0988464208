use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use pfrc_pipeline::{
    export_rules_json, ingest_json_file, ExtractionOptions, ExtractionPipeline, IngestOptions,
};
use pfrc_store::Store;

#[derive(Debug, Parser)]
#[command(name = "pfrc")]
#[command(about = "Prop firm rule catalog: document ingestion and rule extraction")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "propfirm_rules.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a scraped JSON file of help-center pages.
    Ingest {
        json_file: PathBuf,
        #[arg(long, default_value = "FundedNext")]
        firm_name: String,
        /// Skip paragraph storage for faster ingestion.
        #[arg(long)]
        no_paragraphs: bool,
    },
    /// Extract rules from a firm's current documents.
    Extract {
        #[arg(long, default_value = "FundedNext")]
        firm: String,
        /// Clear existing rules before extraction.
        #[arg(long)]
        clear: bool,
        /// Disable LLM-based soft rule classification.
        #[arg(long)]
        no_llm: bool,
        #[arg(long)]
        max_docs: Option<usize>,
        /// Classification model served by the local Ollama instance.
        #[arg(long, default_value = pfrc_extract::classifier::DEFAULT_MODEL)]
        model: String,
        /// Export extracted rules to a JSON file after the run.
        #[arg(long)]
        export: Option<PathBuf>,
    },
    /// Show document statistics.
    Stats {
        #[arg(long)]
        firm: Option<String>,
    },
    /// Search current documents by title or body text.
    Search {
        term: String,
        #[arg(long)]
        firm: Option<String>,
    },
    /// List firms in the database.
    Firms,
    /// Export a firm's stored rules to JSON.
    ExportRules {
        #[arg(long, default_value = "FundedNext")]
        firm: String,
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("pfrc v{}", env!("CARGO_PKG_VERSION"));
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            json_file,
            firm_name,
            no_paragraphs,
        } => {
            let mut store = Store::open(&cli.db).await?;
            let options = IngestOptions {
                firm_name,
                store_paragraphs: !no_paragraphs,
            };
            let stats = ingest_json_file(&mut store, &json_file, &options).await?;
            println!(
                "ingest complete: processed={} inserted={} updated={} duplicates={} skipped={} errors={}",
                stats.processed,
                stats.inserted,
                stats.updated,
                stats.duplicates,
                stats.skipped_empty,
                stats.errors
            );
        }
        Commands::Extract {
            firm,
            clear,
            no_llm,
            max_docs,
            model,
            export,
        } => {
            let store = Store::open(&cli.db).await?;
            let options = ExtractionOptions {
                clear_existing: clear,
                max_docs,
                use_llm: !no_llm,
                classifier_model: model,
                ..Default::default()
            };
            let mut pipeline = ExtractionPipeline::new(store, options).await?;

            let cancel = pipeline.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("interrupt received, finishing current document...");
                    cancel.cancel();
                }
            });

            let summary = pipeline.run(&firm).await?;
            println!(
                "extraction complete: run_id={} documents={} hard={} soft={} stored={} errors={}{}",
                summary.run_id,
                summary.documents_processed,
                summary.hard_rules_extracted,
                summary.soft_rules_extracted,
                summary.rules_stored,
                summary.errors,
                if summary.cancelled { " (cancelled)" } else { "" }
            );
            if !summary.llm_enabled {
                println!("note: classification service unavailable, soft rules were pattern-only");
            }

            if let Some(output) = export {
                let mut store = pipeline.into_store();
                let exported = export_rules_json(&mut store, &firm, &output).await?;
                println!("exported {exported} rules to {}", output.display());
            }
        }
        Commands::Stats { firm } => {
            let mut store = Store::open(&cli.db).await?;
            let stats = store.document_stats(firm.as_deref()).await?;
            println!("documents:        {}", stats.total_documents);
            println!("unique urls:      {}", stats.unique_urls);
            println!("current versions: {}", stats.current_documents);
            println!("articles:         {}", stats.articles);
            println!("collections:      {}", stats.collections);
            println!("avg length:       {:.0} chars", stats.avg_content_length);
            println!("max version:      {}", stats.max_version);
            if let Some(firm_name) = firm.as_deref() {
                if let Some(firm_row) = store.firm_by_name(firm_name).await? {
                    let rule_stats = store.rule_statistics(firm_row.id).await?;
                    println!("rules:            {}", rule_stats.total_rules);
                    for (severity, count) in &rule_stats.by_severity {
                        println!("  {severity:<12} {count}");
                    }
                }
            }
        }
        Commands::Search { term, firm } => {
            let mut store = Store::open(&cli.db).await?;
            let hits = store.search_documents(&term, firm.as_deref()).await?;
            println!("{} matching documents", hits.len());
            for hit in hits.iter().take(20) {
                println!(
                    "- {} [{}] {}",
                    hit.title,
                    hit.doc_type.as_str(),
                    hit.canonical_url
                );
            }
        }
        Commands::Firms => {
            let mut store = Store::open(&cli.db).await?;
            for firm in store.all_firms().await? {
                println!(
                    "- {} ({}) since {}",
                    firm.name,
                    firm.domain,
                    firm.created_at.date_naive()
                );
            }
        }
        Commands::ExportRules { firm, output } => {
            let mut store = Store::open(&cli.db).await?;
            let exported = export_rules_json(&mut store, &firm, &output).await?;
            println!("exported {exported} rules to {}", output.display());
        }
    }

    Ok(())
}
