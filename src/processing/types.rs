//! Core data types and error definitions for the ingestion pipeline.

use crate::{
    embedding::EmbeddingClientError, queue::IngestionJob, vector_store::VectorStoreError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while configuring the text splitter.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Chunk size is zero or the overlap would stop the window from advancing.
    #[error("invalid splitter configuration: chunk_size={chunk_size}, chunk_overlap={chunk_overlap} (overlap must be smaller than a non-zero chunk size)")]
    InvalidConfiguration {
        /// Requested maximum characters per chunk.
        chunk_size: usize,
        /// Requested overlap between consecutive chunks.
        chunk_overlap: usize,
    },
}

/// Failures raised while reading a referenced document from disk.
///
/// All variants are permanent for the job that triggered them.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Path does not exist.
    #[error("document not found: {}", .0.display())]
    NotFound(PathBuf),
    /// File extension is not one the loader can parse.
    #[error("unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),
    /// File exists but could not be parsed.
    #[error("corrupt document {}: {reason}", path.display())]
    Corrupt {
        /// File that failed to parse.
        path: PathBuf,
        /// Parser diagnostic.
        reason: String,
    },
    /// Any other I/O failure.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Text of one page (or section) of a loaded document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// One-based page number.
    pub page_number: u32,
    /// Extracted text.
    pub text: String,
}

/// Bounded segment of document text sized for embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Chunk contents, including any overlap carried from the previous chunk.
    pub text: String,
    /// Position of the chunk within its document, starting at zero.
    pub sequence_index: usize,
    /// Original filename of the uploaded document.
    pub source_filename: String,
    /// Page the chunk was cut from, when the document has pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

/// Stages a job passes through inside the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    /// Delivered by the queue, nothing done yet.
    Received,
    /// Reading and parsing the source file.
    Loading,
    /// Splitting page text into chunks.
    Chunking,
    /// Requesting vectors from the embedding provider.
    Embedding,
    /// Writing records to the vector store.
    Upserting,
    /// All records written.
    Completed,
    /// Terminal failure; see the accompanying error.
    Failed,
}

/// What the queue should do with a job whose processing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Transient failure; hand back to the queue for redelivery.
    Retry,
    /// Permanent failure; remove from the retry cycle.
    DeadLetter,
}

/// Errors emitted by the ingestion pipeline for a single job.
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Source document could not be read.
    #[error("Failed to load document: {0}")]
    Load(#[from] LoadError),
    /// Embedding provider failed to produce vectors for the chunks.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Provider returned a different number of vectors than texts sent.
    #[error("Embedding provider returned {actual} vectors for {expected} chunks")]
    EmbeddingCountMismatch {
        /// Texts sent.
        expected: usize,
        /// Vectors returned.
        actual: usize,
    },
    /// Provider vectors do not match the collection dimensionality.
    #[error("Embedding dimension mismatch: collection expects {expected}, provider produced {actual}")]
    DimensionMismatch {
        /// Configured collection dimensionality.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },
    /// Vector store rejected the upsert.
    #[error("Failed to upsert records: {0}")]
    VectorStore(#[from] VectorStoreError),
}

impl IngestionError {
    /// Stage the job was in when this error surfaced.
    pub fn stage(&self) -> JobStage {
        match self {
            Self::Load(_) => JobStage::Loading,
            Self::Embedding(_) | Self::EmbeddingCountMismatch { .. } | Self::DimensionMismatch { .. } => {
                JobStage::Embedding
            }
            Self::VectorStore(_) => JobStage::Upserting,
        }
    }

    /// Whether redelivering the job could plausibly succeed.
    pub fn disposition(&self) -> FailureDisposition {
        let retryable = match self {
            Self::Load(_) => false,
            Self::Embedding(error) => error.is_retryable(),
            Self::EmbeddingCountMismatch { .. } | Self::DimensionMismatch { .. } => false,
            Self::VectorStore(error) => error.is_retryable(),
        };
        if retryable {
            FailureDisposition::Retry
        } else {
            FailureDisposition::DeadLetter
        }
    }
}

/// Summary of a job that reached [`JobStage::Completed`].
#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    /// Original filename from the job.
    pub filename: String,
    /// SHA-256 of the extracted document text.
    pub document_hash: String,
    /// Number of pages the loader produced.
    pub pages: usize,
    /// Chunks produced by the splitter before the per-job cap.
    pub chunks_total: usize,
    /// Chunks dropped by the per-job cap.
    pub chunks_dropped: usize,
    /// Records written to the vector store.
    pub records_written: usize,
    /// Final stage; always [`JobStage::Completed`] for a report.
    pub stage: JobStage,
}

impl IngestionReport {
    pub(crate) fn empty(job: &IngestionJob, document_hash: String, pages: usize) -> Self {
        Self {
            filename: job.filename.clone(),
            document_hash,
            pages,
            chunks_total: 0,
            chunks_dropped: 0,
            records_written: 0,
            stage: JobStage::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_errors_are_dead_lettered_at_loading_stage() {
        let error = IngestionError::from(LoadError::NotFound(PathBuf::from("/missing.pdf")));
        assert_eq!(error.stage(), JobStage::Loading);
        assert_eq!(error.disposition(), FailureDisposition::DeadLetter);
    }

    #[test]
    fn transient_embedding_errors_are_retried() {
        let error = IngestionError::from(EmbeddingClientError::Provider("429".into()));
        assert_eq!(error.stage(), JobStage::Embedding);
        assert_eq!(error.disposition(), FailureDisposition::Retry);

        let fatal = IngestionError::from(EmbeddingClientError::Configuration("401".into()));
        assert_eq!(fatal.disposition(), FailureDisposition::DeadLetter);
    }

    #[test]
    fn dimension_mismatch_is_fatal() {
        let error = IngestionError::DimensionMismatch {
            expected: 1536,
            actual: 768,
        };
        assert_eq!(error.disposition(), FailureDisposition::DeadLetter);
    }

    #[test]
    fn missing_collection_is_fatal_for_the_job() {
        let error = IngestionError::from(VectorStoreError::CollectionNotFound("docs".into()));
        assert_eq!(error.stage(), JobStage::Upserting);
        assert_eq!(error.disposition(), FailureDisposition::DeadLetter);
    }
}
