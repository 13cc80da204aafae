//! Typed errors for the ingestion and retrieval pipeline.
//!
//! Extraction and embedding failures carry enough context for the
//! orchestrator to store a useful message on the failed source record.
//! Application-level plumbing (CLI, SQL row handling) stays on
//! `anyhow::Result` and wraps these via `?`.

use thiserror::Error;

/// Extraction failed for a specific document format. Never returned with
/// partial content: the pipeline either gets the full text or this error.
#[derive(Error, Debug)]
#[error("{format} extraction failed: {message}")]
pub struct ExtractionError {
    /// Format name attached to the failure (e.g. `"pdf"`, `"docx"`).
    pub format: &'static str,
    pub message: String,
}

impl ExtractionError {
    pub fn new(format: &'static str, message: impl Into<String>) -> Self {
        Self {
            format,
            message: message.into(),
        }
    }
}

/// Embedding provider failure after any retry was exhausted.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding provider error {status}: {body}")]
    Provider { status: u16, body: String },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Vector store failure. Propagated uncaught during ingestion so the
/// orchestrator can mark the source failed; retrieval maps store
/// unavailability to an empty result set instead.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("vector store request failed: {0}")]
    Request(String),
    #[error("vector store error {status}: {body}")]
    Backend { status: u16, body: String },
    #[error("collection {collection} expects dimension {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },
}

/// Illegal knowledge-source status transition.
#[derive(Error, Debug)]
#[error("illegal status transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}
