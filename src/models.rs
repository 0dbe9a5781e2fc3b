//! Core data types shared across the indexing and retrieval pipeline.
//!
//! The data lifecycle is:
//!
//! ```text
//! Scanner → ScannedFile → extract() → chunk() → Chunk
//!                                         ↓
//!                                    embed() → NewChunk → store
//!                                         ↓
//!                                    similar() → SearchHit
//! ```

use serde::{Deserialize, Serialize};

/// Structured metadata persisted with every chunk row.
///
/// Lines are 1-based inclusive and refer to the chunked text of the source
/// file. Skipped marker rows set `skipped` and explain themselves in
/// `reason`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChunkMetadata {
    pub start_line: usize,
    pub end_line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
}

impl ChunkMetadata {
    pub fn is_skipped(&self) -> bool {
        self.skipped.unwrap_or(false)
    }
}

/// A row ready for insertion. Workspace and model scoping is supplied by
/// the store, which owns both identifiers.
#[derive(Debug, Clone)]
pub struct NewChunk {
    /// Workspace-relative path, forward slashes.
    pub path: String,
    /// Source file modification time at embedding time (ms since epoch).
    pub mtime_ms: i64,
    /// The chunk text exactly as embedded.
    pub content: String,
    /// Dense embedding vector; its length is persisted as `dimension`.
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

impl NewChunk {
    /// Marker row for a file with no indexable content: zero vector,
    /// bracketed content, `skipped` metadata. Persisting it prevents the
    /// file from being re-processed on every run.
    pub fn skipped_marker(path: &str, mtime_ms: i64, reason: &str, size: u64, dimension: usize) -> Self {
        NewChunk {
            path: path.to_string(),
            mtime_ms,
            content: format!("[SKIPPED: {reason}]"),
            embedding: vec![0.0; dimension],
            metadata: ChunkMetadata {
                start_line: 1,
                end_line: 1,
                skipped: Some(true),
                reason: Some(reason.to_string()),
                original_size: Some(size),
            },
        }
    }
}

/// A similarity match returned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub content: String,
    pub similarity: f32,
    pub start_line: usize,
    pub end_line: usize,
}

/// Per-model row statistics for the status surface.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub model: String,
    pub row_count: i64,
    pub total_data_bytes: i64,
}

/// Snapshot of what is indexed for one workspace, returned by the status
/// operation.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub initialized: bool,
    pub total_files: usize,
    pub indexed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<i64>,
    pub embedding_model: String,
    pub per_model_stats: Vec<ModelStats>,
}
