//! Upload intake: persist an uploaded document and hand it to the ingestion queue.
//!
//! Intake never waits for processing. Once the file is on disk and the job record is durable
//! the caller gets the job id back; the worker picks the job up on its own schedule.

use crate::{
    metrics::PipelineMetrics,
    processing::{DocumentFormat, sanitize::sanitize_filename},
    queue::{FileJobQueue, IngestionJob, JobId, QueueError},
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Reasons an upload is refused.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The upload carried no bytes.
    #[error("Uploaded file is empty")]
    EmptyUpload,
    /// The file name has no supported document extension.
    #[error("Unsupported document type: {0}")]
    UnsupportedFormat(String),
    /// Persisting the upload failed.
    #[error("Failed to store upload at {path}: {source}")]
    Io {
        /// Target path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The job could not be enqueued.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedUpload {
    /// Queue id of the ingestion job.
    pub job_id: JobId,
    /// Sanitized original file name recorded with every chunk.
    pub filename: String,
    /// Where the upload was persisted.
    pub stored_path: PathBuf,
}

/// Persists uploads under one directory and enqueues ingestion jobs for them.
pub struct UploadIntake {
    upload_dir: PathBuf,
    queue: Arc<FileJobQueue>,
    metrics: Arc<PipelineMetrics>,
}

impl UploadIntake {
    /// Create the upload directory if needed.
    pub async fn new(
        upload_dir: impl Into<PathBuf>,
        queue: Arc<FileJobQueue>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, IntakeError> {
        let upload_dir = upload_dir.into();
        tokio::fs::create_dir_all(&upload_dir)
            .await
            .map_err(|source| IntakeError::Io {
                path: upload_dir.clone(),
                source,
            })?;
        Ok(Self {
            upload_dir,
            queue,
            metrics,
        })
    }

    /// Directory uploads are written to.
    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Store `bytes` under a unique name and enqueue an ingestion job for it.
    pub async fn accept(&self, original_name: &str, bytes: &[u8]) -> Result<AcceptedUpload, IntakeError> {
        if bytes.is_empty() {
            return Err(IntakeError::EmptyUpload);
        }
        let filename = sanitize_filename(original_name)
            .ok_or_else(|| IntakeError::UnsupportedFormat(original_name.to_string()))?;
        if DocumentFormat::from_path(Path::new(&filename)).is_none() {
            return Err(IntakeError::UnsupportedFormat(filename));
        }

        let stored_path = self.upload_dir.join(stored_name(&filename));
        tokio::fs::write(&stored_path, bytes)
            .await
            .map_err(|source| IntakeError::Io {
                path: stored_path.clone(),
                source,
            })?;

        let job = IngestionJob::new(filename.clone(), stored_path.clone());
        let job_id = match self.queue.enqueue(job).await {
            Ok(id) => id,
            Err(error) => {
                if let Err(cleanup) = tokio::fs::remove_file(&stored_path).await {
                    tracing::warn!(path = %stored_path.display(), error = %cleanup, "Failed to remove orphaned upload");
                }
                return Err(error.into());
            }
        };
        self.metrics.record_upload();
        tracing::info!(
            job_id = %job_id,
            filename = %filename,
            bytes = bytes.len(),
            path = %stored_path.display(),
            "Upload accepted"
        );

        Ok(AcceptedUpload {
            job_id,
            filename,
            stored_path,
        })
    }
}

fn stored_name(filename: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let token = Uuid::new_v4().simple().to_string();
    format!("{millis}-{}-{filename}", &token[..8])
}
