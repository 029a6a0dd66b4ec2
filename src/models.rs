//! Core data models used throughout the harness.
//!
//! These types represent the documents, chunks, and query results that flow
//! through the ingestion and retrieval pipeline.

use serde::Serialize;
use std::path::PathBuf;

/// Extracted text of one source PDF.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub content: String,
    pub source: PathBuf,
}

/// A word window of a document's text. Identity is `(source, chunk_index)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub content: String,
    pub source: PathBuf,
    pub chunk_index: i64,
}

/// A chunk as stored in the metadata store.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Insertion order; doubles as the graph node id.
    pub seq: u32,
    /// Opaque record identifier (UUID v4).
    pub id: String,
    pub chunk: Chunk,
    /// SHA-256 of the chunk content.
    pub hash: String,
    /// `None` until `update_embeddings` assigns one.
    pub vector: Option<Vec<f32>>,
}

/// One ranked result returned by the retrieval pipeline.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueryHit {
    pub text: String,
    pub source: String,
    pub score: f32,
}
