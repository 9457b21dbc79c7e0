//! Startup wiring: every client handle is built once from [`Config`] and passed down.

use crate::{
    config::{Config, ConfigError},
    embedding::{EmbeddingClient, EmbeddingClientError, build_embedding_client},
    generation::{GenerationError, build_chat_model},
    intake::{IntakeError, UploadIntake},
    metrics::PipelineMetrics,
    processing::{
        ChunkingError, FsDocumentLoader, IngestionWorker, TextSplitter, WorkerSettings,
    },
    queue::{FileJobQueue, QueueError, QueueOptions},
    retrieval::{QueryService, QuerySettings},
    service::RagService,
    vector_store::{VectorStore, VectorStoreError, build_vector_store},
};
use std::sync::Arc;
use thiserror::Error;

/// Failures that abort process startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Chunker settings were rejected.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Chat model could not be built.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Vector store unreachable or collection incompatible.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// Queue directories could not be prepared.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// Upload directory could not be prepared.
    #[error(transparent)]
    Intake(#[from] IntakeError),
}

/// Shared handles used by both the HTTP service and the worker.
pub struct Pipeline {
    config: Config,
    metrics: Arc<PipelineMetrics>,
    queue: Arc<FileJobQueue>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingClient>,
}

impl Pipeline {
    /// Build the clients, ensure the collection exists, and open the queue.
    pub async fn connect(config: Config) -> Result<Self, StartupError> {
        config.validate()?;
        let embedder = build_embedding_client(&config)?;
        let store = build_vector_store(&config)?;
        store
            .ensure_collection(&config.qdrant_collection_name, config.embedding_dimension)
            .await?;
        let queue = Arc::new(
            FileJobQueue::open(&config.queue_dir, QueueOptions::from_config(&config)).await?,
        );
        tracing::info!(
            collection = %config.qdrant_collection_name,
            dimension = config.embedding_dimension,
            queue_dir = %config.queue_dir.display(),
            "Pipeline components ready"
        );
        Ok(Self {
            config,
            metrics: Arc::new(PipelineMetrics::new()),
            queue,
            store,
            embedder,
        })
    }

    /// Configuration the pipeline was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared job queue.
    pub fn queue(&self) -> Arc<FileJobQueue> {
        Arc::clone(&self.queue)
    }

    /// Shared metrics accumulator.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Ingestion worker over the shared handles.
    pub fn worker(&self) -> Result<IngestionWorker, StartupError> {
        let splitter = TextSplitter::new(
            self.config.text_splitter_chunk_size,
            self.config.text_splitter_chunk_overlap,
        )?;
        Ok(IngestionWorker::new(
            Arc::new(FsDocumentLoader::new()),
            splitter,
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            WorkerSettings::from_config(&self.config),
        ))
    }

    /// Upload and query facade over the shared handles.
    pub async fn rag_service(&self) -> Result<RagService, StartupError> {
        let model = build_chat_model(&self.config)?;
        let query = QueryService::new(
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
            model,
            Arc::clone(&self.metrics),
            QuerySettings::from_config(&self.config),
        );
        let intake = UploadIntake::new(
            self.config.upload_dir.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.metrics),
        )
        .await?;
        Ok(RagService::new(
            intake,
            query,
            Arc::clone(&self.queue),
            Arc::clone(&self.store),
            self.config.qdrant_collection_name.clone(),
            Arc::clone(&self.metrics),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;
    use crate::service::RagApi;
    use tempfile::TempDir;

    #[tokio::test]
    async fn connect_builds_working_components() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config();
        config.queue_dir = dir.path().join("queue");
        config.upload_dir = dir.path().join("uploads");

        let pipeline = Pipeline::connect(config).await.expect("pipeline");
        let service = pipeline.rag_service().await.expect("service");
        let worker = pipeline.worker().expect("worker");

        let accepted = service
            .upload("faq.txt", b"Refunds are issued within 30 days.".to_vec())
            .await
            .expect("upload");
        let lease = pipeline.queue().try_dequeue().await.expect("dequeue").expect("job");
        assert_eq!(lease.id(), accepted.job_id);
        let report = worker.process(lease.job()).await.expect("processed");
        assert_eq!(report.records_written, 1);

        let documents = service.documents().await.expect("documents");
        assert_eq!(documents.get("faq.txt"), Some(&1));
    }

    #[tokio::test]
    async fn invalid_chunking_is_rejected_before_io() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = test_config();
        config.queue_dir = dir.path().join("queue");
        config.text_splitter_chunk_overlap = config.text_splitter_chunk_size;
        assert!(matches!(
            Pipeline::connect(config).await,
            Err(StartupError::Config(ConfigError::InvalidConfiguration(_)))
        ));
        assert!(!dir.path().join("queue").exists());
    }
}
