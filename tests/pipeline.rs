//! End-to-end ingestion and query scenarios using the offline providers.

use pdf_rag::{
    embedding::FakeEmbeddingClient,
    generation::{ExtractiveChatModel, NO_CONTEXT_ANSWER},
    metrics::PipelineMetrics,
    processing::{FsDocumentLoader, IngestionWorker, JobOutcome, JobStage, TextSplitter, WorkerSettings},
    queue::{FileJobQueue, IngestionJob, JobStatus, QueueOptions},
    retrieval::{QueryService, QuerySettings},
    vector_store::{InMemoryVectorStore, VectorStore},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DIM: usize = 256;
const COLLECTION: &str = "pipeline-docs";

struct Harness {
    dir: TempDir,
    store: Arc<InMemoryVectorStore>,
    queue: Arc<FileJobQueue>,
    worker: Arc<IngestionWorker>,
    query: QueryService,
    metrics: Arc<PipelineMetrics>,
}

impl Harness {
    async fn new(options: QueueOptions) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let store = Arc::new(InMemoryVectorStore::default());
        store
            .ensure_collection(COLLECTION, DIM)
            .await
            .expect("collection");
        let queue = Arc::new(
            FileJobQueue::open(dir.path().join("queue"), options)
                .await
                .expect("queue"),
        );
        let metrics = Arc::new(PipelineMetrics::new());
        let embedder = Arc::new(FakeEmbeddingClient::new(DIM));

        let worker = Arc::new(IngestionWorker::new(
            Arc::new(FsDocumentLoader::new()),
            TextSplitter::new(1000, 200).expect("splitter"),
            embedder.clone(),
            store.clone(),
            metrics.clone(),
            WorkerSettings {
                collection: COLLECTION.into(),
                dimension: DIM,
                batch_size: 2,
                max_chunks_per_job: 50,
            },
        ));
        let query = QueryService::new(
            embedder,
            store.clone(),
            Arc::new(ExtractiveChatModel::new()),
            metrics.clone(),
            QuerySettings {
                collection: COLLECTION.into(),
                dimension: DIM,
                top_k: 2,
                max_context_tokens: None,
            },
        );

        Self {
            dir,
            store,
            queue,
            worker,
            query,
            metrics,
        }
    }

    fn write_document(&self, name: &str, pages: &[String]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, pages.join("\u{c}")).expect("write document");
        path
    }
}

fn quick_options() -> QueueOptions {
    QueueOptions {
        poll_interval: Duration::from_millis(20),
        ..QueueOptions::default()
    }
}

/// Text of exactly `len` characters made of short words.
fn page_of(len: usize, word: &str) -> String {
    format!("{word} ").repeat(len / (word.len() + 1) + 1).chars().take(len).collect()
}

fn three_page_document() -> Vec<String> {
    vec![
        page_of(1500, "alpha"),
        page_of(900, "bravo"),
        page_of(1700, "charlie"),
    ]
}

#[tokio::test]
async fn three_page_document_yields_five_records() {
    let harness = Harness::new(quick_options()).await;
    let path = harness.write_document("handbook.txt", &three_page_document());
    let job_id = harness
        .queue
        .enqueue(IngestionJob::new("handbook.txt", path))
        .await
        .expect("enqueue");

    let lease = harness.queue.dequeue().await.expect("lease");
    let outcome = harness
        .worker
        .handle(&harness.queue, lease)
        .await
        .expect("settled");

    let JobOutcome::Completed(report) = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert_eq!(report.stage, JobStage::Completed);
    assert_eq!(report.pages, 3);
    assert_eq!(report.chunks_total, 5);
    assert_eq!(report.records_written, 5);
    assert_eq!(
        harness
            .store
            .count_for_source(COLLECTION, "handbook.txt")
            .await
            .expect("count"),
        5
    );
    assert_eq!(
        harness.queue.status(job_id).await.expect("status"),
        Some(JobStatus::Completed)
    );
    assert_eq!(harness.metrics.snapshot().chunks_indexed, 5);
}

#[tokio::test]
async fn refund_question_is_answered_from_ingested_document() {
    let harness = Harness::new(quick_options()).await;
    let path = harness.write_document(
        "policies.txt",
        &[
            "Shipping is free for orders above fifty dollars.".to_string(),
            "Refunds are issued within 30 days of purchase.".to_string(),
            "Support answers tickets during business hours.".to_string(),
        ],
    );
    harness
        .queue
        .enqueue(IngestionJob::new("policies.txt", path))
        .await
        .expect("enqueue");
    let lease = harness.queue.dequeue().await.expect("lease");
    harness
        .worker
        .handle(&harness.queue, lease)
        .await
        .expect("settled");

    let result = harness
        .query
        .answer("What is the refund policy?")
        .await
        .expect("answer");

    assert!(result.supporting_chunks.len() <= 2);
    let refund = result
        .supporting_chunks
        .iter()
        .find(|supporting| supporting.chunk.text.contains("Refunds are issued within 30 days"))
        .expect("refund chunk retrieved");
    assert_eq!(refund.chunk.source_filename, "policies.txt");
    assert_eq!(refund.chunk.page_number, Some(2));
    assert!(result.answer.contains("30 days"));
}

#[tokio::test]
async fn empty_collection_answers_with_empty_context() {
    let harness = Harness::new(quick_options()).await;
    let result = harness
        .query
        .answer("What is the refund policy?")
        .await
        .expect("answer");
    assert!(result.supporting_chunks.is_empty());
    assert_eq!(result.answer, NO_CONTEXT_ANSWER);
    assert_eq!(harness.metrics.snapshot().empty_retrievals, 1);
}

#[tokio::test]
async fn missing_file_is_dead_lettered_after_one_attempt() {
    let harness = Harness::new(quick_options()).await;
    let missing = harness.dir.path().join("vanished.pdf");
    let job_id = harness
        .queue
        .enqueue(IngestionJob::new("vanished.pdf", missing))
        .await
        .expect("enqueue");

    let lease = harness.queue.dequeue().await.expect("lease");
    let outcome = harness
        .worker
        .handle(&harness.queue, lease)
        .await
        .expect("settled");

    assert_eq!(outcome.final_stage(), Some(JobStage::Failed));
    match outcome {
        JobOutcome::DeadLettered {
            stage, attempts, ..
        } => {
            assert_eq!(stage, JobStage::Loading);
            assert_eq!(attempts, 1);
        }
        other => panic!("expected dead letter, got {other:?}"),
    }
    assert!(matches!(
        harness.queue.status(job_id).await.expect("status"),
        Some(JobStatus::DeadLettered { attempts: 1, .. })
    ));
    assert!(harness.queue.try_dequeue().await.expect("dequeue").is_none());
    assert_eq!(harness.metrics.snapshot().jobs_dead_lettered, 1);
}

#[tokio::test]
async fn redelivered_job_does_not_duplicate_records() {
    let harness = Harness::new(QueueOptions {
        visibility_timeout: Duration::ZERO,
        ..quick_options()
    })
    .await;
    let path = harness.write_document("handbook.txt", &three_page_document());
    harness
        .queue
        .enqueue(IngestionJob::new("handbook.txt", path))
        .await
        .expect("enqueue");

    // First delivery writes every record, then the consumer dies before acknowledging.
    let first = harness.queue.dequeue().await.expect("first lease");
    let job = first.job().clone();
    harness.worker.process(&job).await.expect("first pass");
    drop(first);

    let second = harness.queue.dequeue().await.expect("redelivery");
    assert_eq!(second.attempts(), 2);
    let outcome = harness
        .worker
        .handle(&harness.queue, second)
        .await
        .expect("settled");
    assert!(matches!(outcome, JobOutcome::Completed(_)));

    assert_eq!(
        harness
            .store
            .count_for_source(COLLECTION, "handbook.txt")
            .await
            .expect("count"),
        5
    );
}

#[tokio::test]
async fn worker_loop_drains_queue_and_stops_on_shutdown() {
    let harness = Harness::new(quick_options()).await;
    for name in ["one.txt", "two.txt"] {
        let path = harness.write_document(name, &[format!("Contents of {name}.")]);
        harness
            .queue
            .enqueue(IngestionJob::new(name, path))
            .await
            .expect("enqueue");
    }

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let runner = tokio::spawn(Arc::clone(&harness.worker).run_until(
        Arc::clone(&harness.queue),
        async move {
            let _ = stop_rx.await;
        },
    ));

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let depths = harness.queue.depths().await.expect("depths");
            if depths.completed == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("jobs completed");

    stop_tx.send(()).expect("signal shutdown");
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("worker stopped")
        .expect("worker task");

    assert!(harness.queue.is_closed());
    let sources = harness.store.source_counts(COLLECTION).await.expect("sources");
    assert_eq!(sources.get("one.txt"), Some(&1));
    assert_eq!(sources.get("two.txt"), Some(&1));
}
