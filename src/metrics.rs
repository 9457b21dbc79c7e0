use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion and query activity in this process.
#[derive(Default)]
pub struct PipelineMetrics {
    uploads_accepted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dead_lettered: AtomicU64,
    chunks_indexed: AtomicU64,
    chunks_dropped: AtomicU64,
    queries_answered: AtomicU64,
    queries_failed: AtomicU64,
    empty_retrievals: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an upload that was persisted and enqueued.
    pub fn record_upload(&self) {
        self.uploads_accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed job and the chunks it indexed or dropped.
    pub fn record_job_completed(&self, chunks_indexed: u64, chunks_dropped: u64) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.chunks_indexed.fetch_add(chunks_indexed, Ordering::Relaxed);
        self.chunks_dropped.fetch_add(chunks_dropped, Ordering::Relaxed);
    }

    /// Record a job handed back to the queue for redelivery.
    pub fn record_job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job removed from the retry cycle.
    pub fn record_job_dead_lettered(&self) {
        self.jobs_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query outcome; `hits` is the number of passages retrieved.
    pub fn record_query(&self, succeeded: bool, hits: usize) {
        if succeeded {
            self.queries_answered.fetch_add(1, Ordering::Relaxed);
            if hits == 0 {
                self.empty_retrievals.fetch_add(1, Ordering::Relaxed);
            }
        } else {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads_accepted: self.uploads_accepted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dead_lettered: self.jobs_dead_lettered.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            queries_answered: self.queries_answered.load(Ordering::Relaxed),
            queries_failed: self.queries_failed.load(Ordering::Relaxed),
            empty_retrievals: self.empty_retrievals.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Uploads persisted and enqueued since startup.
    pub uploads_accepted: u64,
    /// Jobs that reached the completed stage.
    pub jobs_completed: u64,
    /// Jobs returned to the queue after a transient failure.
    pub jobs_retried: u64,
    /// Jobs removed from the retry cycle.
    pub jobs_dead_lettered: u64,
    /// Chunks written to the vector store.
    pub chunks_indexed: u64,
    /// Chunks discarded by the per-job cap.
    pub chunks_dropped: u64,
    /// Queries that produced an answer.
    pub queries_answered: u64,
    /// Queries that surfaced an error.
    pub queries_failed: u64,
    /// Answered queries whose retrieval came back empty.
    pub empty_retrievals: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_jobs_and_chunks() {
        let metrics = PipelineMetrics::new();
        metrics.record_job_completed(5, 0);
        metrics.record_job_completed(50, 12);
        metrics.record_job_retried();
        metrics.record_job_dead_lettered();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_completed, 2);
        assert_eq!(snapshot.chunks_indexed, 55);
        assert_eq!(snapshot.chunks_dropped, 12);
        assert_eq!(snapshot.jobs_retried, 1);
        assert_eq!(snapshot.jobs_dead_lettered, 1);
    }

    #[test]
    fn empty_retrievals_count_only_answered_queries() {
        let metrics = PipelineMetrics::new();
        metrics.record_query(true, 0);
        metrics.record_query(true, 2);
        metrics.record_query(false, 0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.queries_answered, 2);
        assert_eq!(snapshot.queries_failed, 1);
        assert_eq!(snapshot.empty_retrievals, 1);
    }

    #[test]
    fn snapshot_starts_at_zero() {
        assert_eq!(PipelineMetrics::new().snapshot(), MetricsSnapshot::default());
    }
}
