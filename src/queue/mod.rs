//! Durable point-to-point hand-off between upload intake and the ingestion worker.
//!
//! Delivery is at-least-once: a job whose lease is not settled within the visibility timeout
//! is delivered again, so consumers must process idempotently.

mod file_queue;
mod types;

pub use file_queue::{FileJobQueue, JobLease};
pub use types::{IngestionJob, JobId, JobStatus, QueueDepths, QueueError, QueueOptions};
