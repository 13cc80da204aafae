//! # Ragline CLI
//!
//! The `ragline` binary drives the ingestion and retrieval library end
//! to end: database initialization, document and FAQ ingestion,
//! retrieval queries, source inspection, and the fallback vector
//! migration.
//!
//! ## Usage
//!
//! ```bash
//! ragline --config ./config/ragline.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragline init` | Create the SQLite database and run schema migrations |
//! | `ragline ingest file <path>` | Ingest a local document |
//! | `ragline ingest url <url>` | Fetch and ingest a URL |
//! | `ragline ingest text <text>` | Ingest inline text |
//! | `ragline faq add <question> <answer>` | Add or update an FAQ |
//! | `ragline faq remove <id>` | Remove an FAQ |
//! | `ragline query "<text>"` | Retrieve context for a query |
//! | `ragline sources` | List sources and their status |
//! | `ragline migrate-vectors` | Move fallback vectors into the store |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ragline::config::{load_config, Config};
use ragline::db;
use ragline::embedding::EmbeddingClient;
use ragline::ingest::{IngestOptions, IngestionPipeline};
use ragline::llm::LlmClient;
use ragline::migrate;
use ragline::progress::ProgressMode;
use ragline::retrieval::{RerankMode, RetrievalService, SearchOptions};
use ragline::sources;
use ragline::store::create_store;

/// Ragline CLI — tenant-scoped document ingestion and retrieval for RAG.
#[derive(Parser)]
#[command(
    name = "ragline",
    about = "Tenant-scoped document ingestion and retrieval pipeline for RAG applications",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragline.toml")]
    config: PathBuf,

    /// Tenant identifier. All data is scoped to a tenant.
    #[arg(short, long, global = true, default_value = "default")]
    tenant: String,

    /// Progress output: auto, off, human, or json (stderr).
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (sources,
    /// faqs, fallback_chunks). Idempotent.
    Init,

    /// Ingest content into the knowledge base.
    Ingest {
        #[command(subcommand)]
        input: IngestInput,
    },

    /// Manage FAQ entries.
    Faq {
        #[command(subcommand)]
        action: FaqAction,
    },

    /// Retrieve context for a query.
    ///
    /// Runs the full retrieval pipeline and prints the ranked chunks,
    /// FAQs, and the assembled context block.
    Query {
        /// The query text.
        query: String,

        /// Maximum number of chunks to return.
        #[arg(long)]
        limit: Option<usize>,

        /// Minimum similarity score.
        #[arg(long)]
        min_score: Option<f32>,

        /// Restrict to specific source ids (repeatable).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Restrict to a category.
        #[arg(long)]
        category: Option<String>,

        /// Skip the FAQ collection.
        #[arg(long)]
        no_faqs: bool,

        /// Expand the query via the configured LLM.
        #[arg(long)]
        expand: bool,

        /// Rerank mode: off, keyword, or llm.
        #[arg(long, default_value = "keyword")]
        rerank: String,

        /// Attach sibling chunk content to topic-chunked results.
        #[arg(long)]
        expand_context: bool,

        /// Blend a keyword scan into the semantic scores.
        #[arg(long)]
        hybrid: bool,
    },

    /// List sources and their status for the tenant.
    Sources,

    /// Move vectors parked in the SQLite fallback table into the
    /// configured vector store. Ids are preserved, nothing is
    /// re-embedded, and sources that failed on an unreachable store
    /// are marked indexed again.
    MigrateVectors,

    /// Soft-delete a source: vectors removed, row kept.
    Delete {
        /// Source id.
        id: String,
    },
}

#[derive(Subcommand)]
enum IngestInput {
    /// Ingest a local file (format detected from extension/content type).
    File {
        path: PathBuf,

        /// Override the detected content type (MIME).
        #[arg(long)]
        content_type: Option<String>,

        #[command(flatten)]
        common: IngestCommon,
    },
    /// Fetch and ingest a URL.
    Url {
        url: String,

        #[command(flatten)]
        common: IngestCommon,
    },
    /// Ingest inline text.
    Text {
        text: String,

        #[command(flatten)]
        common: IngestCommon,
    },
}

#[derive(clap::Args)]
struct IngestCommon {
    /// Title for the source (defaults to the document's own title).
    #[arg(long)]
    title: Option<String>,

    /// Category tag, filterable at query time.
    #[arg(long)]
    category: Option<String>,

    /// Re-ingest an existing source id instead of creating a new one.
    #[arg(long)]
    source_id: Option<String>,

    /// Chunking preset: default, qa, or fine.
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Subcommand)]
enum FaqAction {
    /// Add or update an FAQ entry.
    Add {
        question: String,
        answer: String,

        /// Update an existing FAQ by id instead of creating a new one.
        #[arg(long)]
        id: Option<String>,

        /// Category tag, filterable at query time.
        #[arg(long)]
        category: Option<String>,
    },
    /// Remove an FAQ entry and its vector.
    Remove {
        /// FAQ id.
        id: String,
    },
}

impl IngestCommon {
    fn to_options(&self) -> IngestOptions {
        IngestOptions {
            title: self.title.clone(),
            category: self.category.clone(),
            source_id: self.source_id.clone(),
            preset: self.preset.clone(),
        }
    }
}

fn progress_mode(flag: &str) -> Result<ProgressMode> {
    match flag {
        "auto" => Ok(ProgressMode::default_for_tty()),
        "off" => Ok(ProgressMode::Off),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        other => anyhow::bail!("unknown progress mode: '{}'", other),
    }
}

fn rerank_mode(flag: &str) -> Result<RerankMode> {
    match flag {
        "off" => Ok(RerankMode::Off),
        "keyword" => Ok(RerankMode::Keyword),
        "llm" => Ok(RerankMode::Llm),
        other => anyhow::bail!("unknown rerank mode: '{}'", other),
    }
}

async fn build_pipeline(config: &Config) -> Result<IngestionPipeline> {
    let pool = db::connect(&config.db).await?;
    migrate::run_migrations(&pool).await?;
    let store = Arc::from(create_store(&config.vector_store)?);
    let embedder = EmbeddingClient::new(&config.embedding)?;
    Ok(IngestionPipeline::new(
        pool,
        store,
        embedder,
        config.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let reporter = progress_mode(&cli.progress)?.reporter();

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&config.db).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("initialized {}", config.db.path.display());
        }

        Commands::Ingest { input } => {
            let pipeline = build_pipeline(&config).await?;
            let report = match &input {
                IngestInput::File {
                    path,
                    content_type,
                    common,
                } => {
                    let bytes = std::fs::read(path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let filename = path.file_name().and_then(|n| n.to_str());
                    pipeline
                        .process_file(
                            &cli.tenant,
                            &bytes,
                            content_type.as_deref(),
                            filename,
                            &common.to_options(),
                            reporter.as_ref(),
                        )
                        .await?
                }
                IngestInput::Url { url, common } => {
                    pipeline
                        .process_url(&cli.tenant, url, &common.to_options(), reporter.as_ref())
                        .await?
                }
                IngestInput::Text { text, common } => {
                    pipeline
                        .process_text(&cli.tenant, text, &common.to_options(), reporter.as_ref())
                        .await?
                }
            };
            println!(
                "indexed {}  {} chunks, ~{} tokens, {} ms ({})",
                report.source_id,
                report.chunk_count,
                report.token_count,
                report.elapsed_ms,
                report.backend
            );
        }

        Commands::Faq { action } => {
            let pipeline = build_pipeline(&config).await?;
            match action {
                FaqAction::Add {
                    question,
                    answer,
                    id,
                    category,
                } => {
                    let faq = pipeline
                        .upsert_faq(
                            &cli.tenant,
                            id.as_deref(),
                            &question,
                            &answer,
                            category.as_deref(),
                        )
                        .await?;
                    println!("faq {}", faq.id);
                }
                FaqAction::Remove { id } => {
                    pipeline.delete_faq(&cli.tenant, &id).await?;
                    println!("removed faq {}", id);
                }
            }
        }

        Commands::Query {
            query,
            limit,
            min_score,
            sources,
            category,
            no_faqs,
            expand,
            rerank,
            expand_context,
            hybrid,
        } => {
            let store = Arc::from(create_store(&config.vector_store)?);
            let embedder = EmbeddingClient::new(&config.embedding)?;
            let llm = LlmClient::new(&config.llm);
            let service = RetrievalService::new(store, embedder, llm, config.clone());
            let options = SearchOptions {
                limit,
                min_score,
                source_ids: sources,
                category,
                include_faqs: !no_faqs,
                expand_query: expand,
                rerank: rerank_mode(&rerank)?,
                expand_context,
                hybrid,
            };
            let result = service.search(&query, &cli.tenant, &options).await;
            for faq in &result.faqs {
                println!("faq   {:.3}  {}", faq.score, faq.question);
            }
            for chunk in &result.chunks {
                println!(
                    "chunk {:.3}  {}#{}",
                    chunk.score, chunk.source_id, chunk.chunk_index
                );
            }
            println!("\n{}", result.context);
            eprintln!(
                "{} chunks, {} faqs, {} query variants, {} ms",
                result.chunks.len(),
                result.faqs.len(),
                result.queries.len(),
                result.elapsed_ms
            );
        }

        Commands::Sources => {
            let pool = db::connect(&config.db).await?;
            migrate::run_migrations(&pool).await?;
            let list = sources::list_sources(&pool, &cli.tenant).await?;
            sources::print_sources(&list);
            pool.close().await;
        }

        Commands::MigrateVectors => {
            let pool = db::connect(&config.db).await?;
            migrate::run_migrations(&pool).await?;
            let store = create_store(&config.vector_store)?;
            let moved = migrate::migrate_vectors(&pool, store.as_ref()).await?;
            println!("migrated {} vectors", moved);
            pool.close().await;
        }

        Commands::Delete { id } => {
            let pipeline = build_pipeline(&config).await?;
            pipeline.delete_source(&cli.tenant, &id).await?;
            println!("deleted {}", id);
        }
    }

    Ok(())
}
