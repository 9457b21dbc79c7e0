#![deny(missing_docs)]

//! Queue-backed document ingestion and retrieval-augmented question answering.

/// HTTP routing and REST handlers.
pub mod api;
/// Startup wiring of clients and services.
pub mod components;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Language-model abstraction and adapters.
pub mod generation;
/// Upload persistence and job submission.
pub mod intake;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Document loading, chunking and the ingestion worker.
pub mod processing;
/// Qdrant REST integration.
pub mod qdrant;
/// Durable ingestion job queue.
pub mod queue;
/// Retrieval-augmented query path.
pub mod retrieval;
/// Facade consumed by the HTTP layer.
pub mod service;
/// Vector store contract and in-memory backend.
pub mod vector_store;
