//! Facade the HTTP layer talks to.

use crate::{
    intake::{AcceptedUpload, IntakeError, UploadIntake},
    metrics::{MetricsSnapshot, PipelineMetrics},
    queue::{FileJobQueue, JobId, JobStatus, QueueError},
    retrieval::{QueryError, QueryResult, QueryService},
    vector_store::{VectorStore, VectorStoreError},
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Operations exposed by external surfaces (HTTP).
#[async_trait]
pub trait RagApi: Send + Sync {
    /// Persist an uploaded document and enqueue it for ingestion.
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<AcceptedUpload, IntakeError>;

    /// Answer a question; `k` overrides the configured retrieval breadth.
    async fn ask(&self, query: &str, k: Option<usize>) -> Result<QueryResult, QueryError>;

    /// Queue status of one ingestion job, `None` when the id is unknown.
    async fn job_status(&self, id: JobId) -> Result<Option<JobStatus>, QueueError>;

    /// Indexed source files with their record counts.
    async fn documents(&self) -> Result<BTreeMap<String, usize>, VectorStoreError>;

    /// Current process-local counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Production implementation wiring intake, queue, store and query path together.
pub struct RagService {
    intake: UploadIntake,
    query: QueryService,
    queue: Arc<FileJobQueue>,
    store: Arc<dyn VectorStore>,
    collection: String,
    metrics: Arc<PipelineMetrics>,
}

impl RagService {
    /// Assemble the facade from already-constructed components.
    pub fn new(
        intake: UploadIntake,
        query: QueryService,
        queue: Arc<FileJobQueue>,
        store: Arc<dyn VectorStore>,
        collection: String,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            intake,
            query,
            queue,
            store,
            collection,
            metrics,
        }
    }
}

#[async_trait]
impl RagApi for RagService {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<AcceptedUpload, IntakeError> {
        self.intake.accept(filename, &bytes).await
    }

    async fn ask(&self, query: &str, k: Option<usize>) -> Result<QueryResult, QueryError> {
        match k {
            Some(k) => self.query.answer_with_k(query, k).await,
            None => self.query.answer(query).await,
        }
    }

    async fn job_status(&self, id: JobId) -> Result<Option<JobStatus>, QueueError> {
        self.queue.status(id).await
    }

    async fn documents(&self) -> Result<BTreeMap<String, usize>, VectorStoreError> {
        self.store.source_counts(&self.collection).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}
