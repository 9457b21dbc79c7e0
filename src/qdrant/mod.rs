//! Qdrant vector store integration.

pub mod client;
pub mod filters;
pub mod payload;
/// Streaming helpers for Qdrant scroll pagination.
pub mod scroller;
pub mod types;

pub use client::QdrantStore;
pub use filters::{accumulate_source, source_filter};
pub use payload::compute_content_hash;
pub use types::QdrantError;
