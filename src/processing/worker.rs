//! Ingestion worker: drives Loading, Chunking, Embedding and Upserting for each leased job.

use crate::{
    config::Config,
    embedding::EmbeddingClient,
    metrics::PipelineMetrics,
    processing::{
        chunking::TextSplitter,
        loader::DocumentLoader,
        mappers::{build_records, document_hash},
        types::{DocumentChunk, FailureDisposition, IngestionError, IngestionReport, JobStage},
    },
    queue::{FileJobQueue, IngestionJob, JobLease, JobStatus, QueueError},
    vector_store::VectorStore,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::Instrument;

/// Per-deployment knobs the worker needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Collection every job writes into.
    pub collection: String,
    /// Dimensionality every embedding must have.
    pub dimension: usize,
    /// Texts per embedding request.
    pub batch_size: usize,
    /// Chunks beyond this count are dropped with a warning.
    pub max_chunks_per_job: usize,
}

impl WorkerSettings {
    /// Settings derived from [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.qdrant_collection_name.clone(),
            dimension: config.embedding_dimension,
            batch_size: config.embedding_batch_size,
            max_chunks_per_job: config.ingest_max_chunks_per_job,
        }
    }
}

/// How the queue settled a job after one delivery.
#[derive(Debug)]
pub enum JobOutcome {
    /// Records written and the job acknowledged.
    Completed(IngestionReport),
    /// Transient failure; the job is pending redelivery.
    Retrying {
        /// Deliveries so far.
        attempts: u32,
        /// Failure that triggered the retry.
        error: String,
    },
    /// Permanent failure or exhausted retry budget.
    DeadLettered {
        /// Stage in which the job failed.
        stage: JobStage,
        /// Deliveries made.
        attempts: u32,
        /// Failure recorded with the job.
        error: String,
    },
}

impl JobOutcome {
    /// Terminal stage the job reached, or `None` while it awaits redelivery.
    pub fn final_stage(&self) -> Option<JobStage> {
        match self {
            JobOutcome::Completed(report) => Some(report.stage),
            JobOutcome::Retrying { .. } => None,
            JobOutcome::DeadLettered { .. } => Some(JobStage::Failed),
        }
    }
}

/// Pulls jobs from the queue and turns documents into vector records.
///
/// Processing is idempotent: record ids are derived from the filename, document hash and
/// chunk position, so a redelivered job overwrites what an earlier attempt wrote.
pub struct IngestionWorker {
    loader: Arc<dyn DocumentLoader>,
    splitter: TextSplitter,
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    metrics: Arc<PipelineMetrics>,
    settings: WorkerSettings,
}

impl IngestionWorker {
    /// Assemble a worker from its collaborators.
    pub fn new(
        loader: Arc<dyn DocumentLoader>,
        splitter: TextSplitter,
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        metrics: Arc<PipelineMetrics>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            loader,
            splitter,
            embedder,
            store,
            metrics,
            settings,
        }
    }

    /// Run one job through every stage. Performs no retries of its own.
    pub async fn process(&self, job: &IngestionJob) -> Result<IngestionReport, IngestionError> {
        log_stage(JobStage::Received);

        log_stage(JobStage::Loading);
        let pages = self.loader.load(&job.source_path).await?;
        let hash = document_hash(&pages);
        tracing::debug!(pages = pages.len(), document_hash = %hash, "Document loaded");

        log_stage(JobStage::Chunking);
        let mut chunks = self.splitter.split_document(&job.filename, &pages);
        let chunks_total = chunks.len();
        if chunks.is_empty() {
            tracing::warn!("Document produced no text; nothing to index");
            log_stage(JobStage::Completed);
            return Ok(IngestionReport::empty(job, hash, pages.len()));
        }

        let cap = self.settings.max_chunks_per_job;
        let chunks_dropped = chunks_total.saturating_sub(cap);
        if chunks_dropped > 0 {
            tracing::warn!(
                chunks_total,
                cap,
                chunks_dropped,
                "Chunk cap reached; trailing chunks dropped"
            );
            chunks.truncate(cap);
        }

        log_stage(JobStage::Embedding);
        let vectors = self.embed(&chunks).await?;

        log_stage(JobStage::Upserting);
        let records = build_records(chunks, vectors, &hash);
        let mut records_written = 0;
        let mut batch = Vec::with_capacity(self.settings.batch_size.max(1));
        for record in records {
            batch.push(record);
            if batch.len() == self.settings.batch_size.max(1) {
                records_written += self
                    .store
                    .upsert(&self.settings.collection, std::mem::take(&mut batch))
                    .await?;
            }
        }
        if !batch.is_empty() {
            records_written += self.store.upsert(&self.settings.collection, batch).await?;
        }

        log_stage(JobStage::Completed);
        Ok(IngestionReport {
            filename: job.filename.clone(),
            document_hash: hash,
            pages: pages.len(),
            chunks_total,
            chunks_dropped,
            records_written,
            stage: JobStage::Completed,
        })
    }

    async fn embed(&self, chunks: &[DocumentChunk]) -> Result<Vec<Vec<f32>>, IngestionError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for (batch_index, batch) in chunks.chunks(self.settings.batch_size.max(1)).enumerate() {
            let texts: Vec<String> = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = self.embedder.generate_embeddings(texts).await?;
            if embedded.len() != batch.len() {
                return Err(IngestionError::EmbeddingCountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            if let Some(vector) = embedded
                .iter()
                .find(|vector| vector.len() != self.settings.dimension)
            {
                return Err(IngestionError::DimensionMismatch {
                    expected: self.settings.dimension,
                    actual: vector.len(),
                });
            }
            tracing::trace!(batch = batch_index, size = batch.len(), "Embedding batch complete");
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Process a leased job and settle the lease according to the outcome.
    pub async fn handle(&self, queue: &FileJobQueue, lease: JobLease) -> Result<JobOutcome, QueueError> {
        let job = lease.job().clone();
        let span = tracing::info_span!(
            "job",
            job_id = %lease.id(),
            filename = %job.filename,
            attempt = lease.attempts()
        );

        async move {
            match self.process(&job).await {
                Ok(report) => {
                    match queue.ack(lease).await {
                        Ok(()) => {}
                        Err(QueueError::LeaseLost(id)) => {
                            tracing::warn!(job_id = %id, "Lease expired before acknowledgement; job will be reprocessed");
                        }
                        Err(error) => return Err(error),
                    }
                    self.metrics.record_job_completed(
                        report.records_written as u64,
                        report.chunks_dropped as u64,
                    );
                    tracing::info!(
                        records = report.records_written,
                        chunks_total = report.chunks_total,
                        chunks_dropped = report.chunks_dropped,
                        "Job completed"
                    );
                    Ok(JobOutcome::Completed(report))
                }
                Err(error) => {
                    let stage = error.stage();
                    let message = error.to_string();
                    tracing::error!(stage = ?stage, error = %message, "Job failed");
                    let status = match error.disposition() {
                        FailureDisposition::Retry => queue.retry(lease, &message).await?,
                        FailureDisposition::DeadLetter => queue.dead_letter(lease, &message).await?,
                    };
                    Ok(self.settle_failure(stage, status, message))
                }
            }
        }
        .instrument(span)
        .await
    }

    fn settle_failure(&self, stage: JobStage, status: JobStatus, error: String) -> JobOutcome {
        match status {
            JobStatus::Pending { attempts } => {
                self.metrics.record_job_retried();
                tracing::warn!(attempts, "Job returned to the queue for redelivery");
                JobOutcome::Retrying { attempts, error }
            }
            JobStatus::DeadLettered { attempts, .. } => {
                self.metrics.record_job_dead_lettered();
                tracing::debug!(stage = ?JobStage::Failed, failed_in = ?stage, "Stage entered");
                tracing::warn!(attempts, stage = ?stage, "Job dead-lettered");
                JobOutcome::DeadLettered {
                    stage,
                    attempts,
                    error,
                }
            }
            other => {
                tracing::warn!(status = ?other, "Unexpected queue status after failure");
                JobOutcome::Retrying { attempts: 0, error }
            }
        }
    }

    /// Consume the queue until it is closed, then wait for in-flight jobs to settle.
    pub async fn run(self: Arc<Self>, queue: Arc<FileJobQueue>) {
        let mut tasks = JoinSet::new();
        tracing::info!(
            collection = %self.settings.collection,
            max_in_flight = queue.options().max_in_flight,
            "Ingestion worker started"
        );

        loop {
            match queue.dequeue().await {
                Ok(lease) => {
                    let worker = Arc::clone(&self);
                    let queue = Arc::clone(&queue);
                    tasks.spawn(async move {
                        if let Err(error) = worker.handle(&queue, lease).await {
                            tracing::error!(error = %error, "Failed to settle job with the queue");
                        }
                    });
                }
                Err(QueueError::Closed) => break,
                Err(error) => {
                    tracing::error!(error = %error, "Dequeue failed; backing off");
                    tokio::time::sleep(queue.options().poll_interval.max(Duration::from_millis(100))).await;
                }
            }
            while let Some(joined) = tasks.try_join_next() {
                log_join(joined);
            }
        }

        if !tasks.is_empty() {
            tracing::info!(in_flight = tasks.len(), "Waiting for in-flight jobs to finish");
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            jobs_completed = snapshot.jobs_completed,
            jobs_retried = snapshot.jobs_retried,
            jobs_dead_lettered = snapshot.jobs_dead_lettered,
            chunks_indexed = snapshot.chunks_indexed,
            "Ingestion worker stopped"
        );
    }

    /// Run until `shutdown` resolves; the queue is then closed and in-flight jobs finish.
    pub async fn run_until<F>(self: Arc<Self>, queue: Arc<FileJobQueue>, shutdown: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let closer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                shutdown.await;
                tracing::info!("Shutdown requested; no further jobs will be dequeued");
                queue.close();
            })
        };
        self.run(queue).await;
        closer.abort();
    }
}

fn log_stage(stage: JobStage) {
    tracing::debug!(stage = ?stage, "Stage entered");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(error) = joined {
        tracing::error!(error = %error, "Job task panicked or was cancelled");
    }
}
