//! Vector store contract shared by the ingestion worker and the query service.
//!
//! Records are keyed by a deterministic id, so upserting the same id twice leaves a single
//! record. Each backend fixes its distance function when a collection is created and never
//! switches it afterwards.

mod memory;

pub use memory::InMemoryVectorStore;

use crate::config::{Config, Distance, VectorStoreProvider};
use crate::processing::DocumentChunk;
use crate::qdrant::{QdrantError, QdrantStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors returned by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// The named collection does not exist.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// A vector's length differs from the collection's dimensionality.
    #[error("Dimension mismatch in collection '{collection}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Collection being written or queried.
        collection: String,
        /// Dimensionality the collection was created with.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },
    /// The collection exists with a different distance function.
    #[error("Collection '{collection}' uses distance {actual}, configured {expected:?}")]
    DistanceMismatch {
        /// Collection being ensured.
        collection: String,
        /// Distance from configuration.
        expected: Distance,
        /// Distance reported by the store.
        actual: String,
    },
    /// Transport or protocol failure talking to Qdrant.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
}

impl VectorStoreError {
    /// Whether the same operation might succeed later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Qdrant(error) => error.is_retryable(),
            _ => false,
        }
    }
}

/// Payload stored alongside every vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    /// Chunk text.
    pub text: String,
    /// Original filename of the document.
    pub source_filename: String,
    /// Position of the chunk within its document.
    pub sequence_index: usize,
    /// Page the chunk came from, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// SHA-256 of the document text, used for duplicate detection.
    #[serde(default)]
    pub document_hash: String,
}

impl ChunkPayload {
    /// Convert back into the chunk the record was built from.
    pub fn into_chunk(self) -> DocumentChunk {
        DocumentChunk {
            text: self.text,
            sequence_index: self.sequence_index,
            source_filename: self.source_filename,
            page_number: self.page_number,
        }
    }
}

/// Record written to a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Deterministic UUID string; re-upserting the same id overwrites.
    pub id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Stored payload.
    pub payload: ChunkPayload,
}

/// Query hit. Hits are returned best first; vectors are not returned.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    /// Record identifier.
    pub id: String,
    /// Raw score of the collection's distance function, as Qdrant reports it. Cosine and Dot
    /// are similarities (higher is closer); Euclid is a distance (lower is closer).
    pub score: f32,
    /// Stored payload.
    pub payload: ChunkPayload,
}

/// Upsert and k-nearest-neighbour search over named collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create `collection` when missing; fail if it exists with another shape.
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), VectorStoreError>;

    /// Write records, overwriting any with the same id. Returns the count written.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError>;

    /// Return at most `k` records most similar to `vector`, best first.
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError>;

    /// Number of records stored for one source file.
    async fn count_for_source(&self, collection: &str, source_filename: &str) -> Result<usize, VectorStoreError>;

    /// Record counts grouped by source file.
    async fn source_counts(&self, collection: &str) -> Result<BTreeMap<String, usize>, VectorStoreError>;
}

/// Build the vector store selected by configuration.
pub fn build_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    let store: Arc<dyn VectorStore> = match config.vector_store_provider {
        VectorStoreProvider::Qdrant => Arc::new(QdrantStore::new(
            &config.qdrant_url,
            config.qdrant_api_key.clone(),
            config.qdrant_distance,
        )?),
        VectorStoreProvider::Memory => {
            tracing::warn!("Using in-memory vector store; records are lost on shutdown");
            Arc::new(InMemoryVectorStore::new(config.qdrant_distance))
        }
    };
    Ok(store)
}
