//! Upload ingestion pipeline.
//!
//! Takes a filename plus raw bytes and runs the full pipeline: infer the
//! file type, extract locator-tagged text units, derive overlapping chunks,
//! register the document in the store, and archive the original bytes under
//! the upload directory. Extraction and chunking run synchronously within
//! the request; only the raw-file write is async.
//!
//! The raw file is written after the store insert so the archived name can
//! carry the final document id. A failed write does not roll back the
//! insert: the document is already queryable and the archive is best-effort
//! bookkeeping, so the error is logged and the receipt still returned.

use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::chunk::chunk_units;
use crate::config::Config;
use crate::extract::{extract_units, ExtractError};
use crate::models::{Document, FileType};
use crate::store::DocumentStore;

/// Result of a successful upload, returned as the `POST /api/upload` body.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub doc_id: String,
    pub filename: String,
    pub chunks_count: usize,
}

/// Replaces anything outside `[A-Za-z0-9._-]` so the archived name is safe
/// to join onto the upload directory regardless of what the client sent.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

fn archive_path(config: &Config, doc_id: &str, filename: &str) -> PathBuf {
    config
        .storage
        .upload_dir
        .join(format!("{}_{}", doc_id, sanitize_filename(filename)))
}

/// Ingests one uploaded file end to end.
///
/// Fails with [`ExtractError::UnsupportedFormat`] for unknown extensions and
/// [`ExtractError::Corrupt`] when the bytes cannot be parsed as the claimed
/// format; both are preserved in the error chain for the HTTP layer to
/// classify.
pub async fn ingest_file(
    config: &Config,
    store: &DocumentStore,
    filename: &str,
    bytes: &[u8],
) -> Result<IngestReceipt> {
    let file_type = FileType::from_filename(filename).ok_or_else(|| {
        ExtractError::UnsupportedFormat(format!(
            "unsupported file type: {} (expected .pdf, .docx, or .txt)",
            filename
        ))
    })?;

    let units = extract_units(bytes, file_type)?;
    let chunks = chunk_units(
        &units,
        config.chunking.chunk_size,
        config.chunking.overlap,
    );

    let doc_id = store.put(Document {
        id: String::new(),
        filename: filename.to_string(),
        file_type,
        chunks: chunks.clone(),
        units,
        uploaded_at: Utc::now().timestamp(),
    });

    let path = archive_path(config, &doc_id, filename);
    if let Err(e) = save_raw_file(&path, bytes).await {
        warn!(doc_id = %doc_id, path = %path.display(), error = %e, "failed to archive uploaded file");
    }

    info!(
        doc_id = %doc_id,
        filename = %filename,
        file_type = file_type.as_str(),
        chunks = chunks.len(),
        "document ingested"
    );

    Ok(IngestReceipt {
        doc_id,
        filename: filename.to_string(),
        chunks_count: chunks.len(),
    })
}

async fn save_raw_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
