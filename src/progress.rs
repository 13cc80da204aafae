//! Ingestion progress reporting.
//!
//! Long ingests (large documents, slow embedding providers) report phase
//! progress so users see what is happening and how much is left. Progress
//! is emitted on **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event from the ingestion pipeline.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Raw bytes are being extracted into normalized text.
    Extracting { source_id: String, format: String },
    /// Text was split; total chunk count is now known.
    Chunked { source_id: String, chunks: u64 },
    /// Embedding batch n of total finished.
    Embedding {
        source_id: String,
        n: u64,
        total: u64,
    },
    /// Vectors are being written to the store backend.
    Storing { source_id: String, vectors: u64 },
}

/// Reports ingestion progress. Implementations write to stderr.
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress: "ingest 4f1c…  embedding  2 / 5 batches".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Extracting { source_id, format } => {
                format!("ingest {}  extracting {}...\n", short(source_id), format)
            }
            IngestProgressEvent::Chunked { source_id, chunks } => {
                format!(
                    "ingest {}  chunked into {} chunks\n",
                    short(source_id),
                    format_number(*chunks)
                )
            }
            IngestProgressEvent::Embedding {
                source_id,
                n,
                total,
            } => {
                format!(
                    "ingest {}  embedding  {} / {} batches\n",
                    short(source_id),
                    format_number(*n),
                    format_number(*total)
                )
            }
            IngestProgressEvent::Storing { source_id, vectors } => {
                format!(
                    "ingest {}  storing {} vectors\n",
                    short(source_id),
                    format_number(*vectors)
                )
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Extracting { source_id, format } => serde_json::json!({
                "event": "progress",
                "source_id": source_id,
                "phase": "extracting",
                "format": format
            }),
            IngestProgressEvent::Chunked { source_id, chunks } => serde_json::json!({
                "event": "progress",
                "source_id": source_id,
                "phase": "chunked",
                "chunks": chunks
            }),
            IngestProgressEvent::Embedding {
                source_id,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "source_id": source_id,
                "phase": "embedding",
                "n": n,
                "total": total
            }),
            IngestProgressEvent::Storing { source_id, vectors } => serde_json::json!({
                "event": "progress",
                "source_id": source_id,
                "phase": "storing",
                "vectors": vectors
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn short(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn short_id_handles_small_ids() {
        assert_eq!(short("abc"), "abc");
        assert_eq!(short("0123456789"), "01234567");
    }
}
