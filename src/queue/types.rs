//! Job records, statuses and errors for the ingestion queue.

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Identifier assigned to a job when it is enqueued.
pub type JobId = Uuid;

/// Reference to an uploaded document awaiting ingestion. Immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// Original filename as uploaded; becomes the `source_filename` of every chunk.
    pub filename: String,
    /// Where the upload was persisted.
    pub source_path: PathBuf,
    /// When the job was created.
    #[serde(with = "time::serde::rfc3339")]
    pub enqueued_at: OffsetDateTime,
}

impl IngestionJob {
    /// Create a job stamped with the current time.
    pub fn new(filename: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            source_path: source_path.into(),
            enqueued_at: OffsetDateTime::now_utc(),
        }
    }
}

/// On-disk record wrapping a job with its delivery bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QueuedJob {
    pub(crate) id: JobId,
    pub(crate) attempts: u32,
    pub(crate) job: IngestionJob,
    #[serde(default)]
    pub(crate) last_error: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub(crate) leased_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub(crate) lease_token: Option<Uuid>,
}

/// Where a job currently sits in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a consumer.
    Pending {
        /// Deliveries made so far.
        attempts: u32,
    },
    /// Leased by a consumer.
    InFlight {
        /// Deliveries made so far, including the current one.
        attempts: u32,
    },
    /// Processed and acknowledged.
    Completed,
    /// Removed from the retry cycle.
    DeadLettered {
        /// Deliveries made before giving up.
        attempts: u32,
        /// Last failure recorded for the job.
        error: Option<String>,
    },
}

/// Number of jobs in each queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepths {
    /// Waiting for a consumer.
    pub pending: usize,
    /// Currently leased.
    pub in_flight: usize,
    /// Acknowledged.
    pub completed: usize,
    /// Dead-lettered.
    pub dead: usize,
}

/// Errors raised by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Filesystem operation on the queue directory failed.
    #[error("queue I/O failed at {}: {source}", path.display())]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A job record could not be encoded or decoded.
    #[error("invalid job record: {0}")]
    Serialization(#[from] serde_json::Error),
    /// The lease expired and the job was redelivered or moved elsewhere.
    #[error("lease for job {0} is no longer held")]
    LeaseLost(JobId),
    /// The queue was closed; no further deliveries will be made.
    #[error("queue is closed")]
    Closed,
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Delivery policy of a queue consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Jobs this consumer may hold at once.
    pub max_in_flight: usize,
    /// How long a lease lasts before the job is redelivered.
    pub visibility_timeout: Duration,
    /// Deliveries after which a retried job is dead-lettered.
    pub max_attempts: u32,
    /// Idle polling interval; picks up jobs enqueued by other processes.
    pub poll_interval: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            visibility_timeout: Duration::from_secs(300),
            max_attempts: 3,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl QueueOptions {
    /// Options derived from the queue section of [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.queue_max_in_flight,
            visibility_timeout: Duration::from_secs(config.queue_visibility_timeout_secs),
            max_attempts: config.queue_max_attempts,
            poll_interval: Duration::from_millis(config.queue_poll_interval_ms.max(1)),
        }
    }
}
