//! # Ragline
//!
//! A tenant-scoped document ingestion and retrieval pipeline for
//! retrieval-augmented generation.
//!
//! Ragline turns raw documents (PDF, DOCX, HTML, Markdown, plain text)
//! into searchable knowledge: content is extracted and normalized,
//! split by one of five chunking strategies, embedded in rate-limited
//! batches, and stored in a vector store behind a backend trait. The
//! retrieval side expands queries, searches chunk and FAQ collections
//! concurrently, deduplicates, reranks, and assembles a generation-ready
//! context block.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌───────────┐   ┌─────────────┐
//! │ Extractor │──▶│ Chunking │──▶│ Embedding │──▶│ VectorStore │
//! │ pdf/docx/ │   │ 5 strats │   │  batched  │   │ qdrant/mem  │
//! │ html/md   │   └──────────┘   └───────────┘   └──────┬──────┘
//! └───────────┘        ▲                                │
//!                 ┌────┴─────┐                    ┌─────▼─────┐
//!                 │  SQLite   │◀───────────────── │ Retrieval │
//!                 │ sources   │   status rows     │  service  │
//!                 └──────────┘                    └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragline init                                  # create database
//! ragline ingest file ./handbook.pdf -t acme    # ingest a document
//! ragline faq add -t acme "How long do refunds take?" "About 30 days."
//! ragline query "refund timeline" -t acme       # retrieve context
//! ragline sources -t acme                       # list source status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types and the source status state machine |
//! | [`extract`] | Format detection and text extraction |
//! | [`chunk`] | Chunking strategies (fixed, sentence, paragraph, heading, topic) |
//! | [`embedding`] | Embedding client with batching and rate-limit retry |
//! | [`store`] | Vector store trait and backends |
//! | [`ingest`] | Ingestion pipeline orchestration |
//! | [`retrieval`] | Query expansion, search, rerank, context assembly |
//! | [`llm`] | Best-effort LLM boundary (expansion, cross-encoder) |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations and fallback vector migration |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod retrieval;
pub mod sources;
pub mod store;
