//! Document ingestion pipeline: loading, chunking, embedding and upserting.

pub mod chunking;
pub mod loader;
pub mod mappers;
pub mod sanitize;
pub mod types;
pub mod worker;

pub use chunking::TextSplitter;
pub use loader::{DocumentFormat, DocumentLoader, FsDocumentLoader};
pub use mappers::record_id;
pub use types::{
    ChunkingError, DocumentChunk, FailureDisposition, IngestionError, IngestionReport, JobStage,
    LoadError, PageText,
};
pub use worker::{IngestionWorker, JobOutcome, WorkerSettings};
