//! HTTP surface for document upload and retrieval-augmented chat.
//!
//! - `GET /` – Liveness probe.
//! - `POST /upload/pdf` – Multipart upload (field `pdf` or `file`). The document is stored and
//!   enqueued; the response carries the ingestion job id and does not wait for processing.
//! - `GET /chat?message=..&k=..` – Answer a question from the indexed documents. Returns the
//!   answer and the supporting chunks it was grounded in.
//! - `GET /jobs/:id` – Queue status of an ingestion job.
//! - `GET /documents` – Indexed source files with their record counts.
//! - `GET /metrics` – Process-local pipeline counters.
//!
//! Errors are returned as `{ "error": <message>, "kind": <kind> }`.

use crate::{
    intake::IntakeError,
    metrics::MetricsSnapshot,
    queue::{JobId, JobStatus, QueueError},
    retrieval::{QueryError, SupportingChunk},
    service::RagApi,
    vector_store::VectorStoreError,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, Query, State, multipart::MultipartError},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

const UPLOAD_FIELDS: [&str; 2] = ["pdf", "file"];

/// Build the router. `upload_max_bytes` bounds request bodies.
pub fn create_router<S>(service: Arc<S>, upload_max_bytes: usize) -> Router
where
    S: RagApi + 'static,
{
    Router::new()
        .route("/", get(health))
        .route("/upload/pdf", post(upload_document::<S>))
        .route("/chat", get(chat::<S>))
        .route("/jobs/:id", get(job_status::<S>))
        .route("/documents", get(list_documents::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .layer(DefaultBodyLimit::max(upload_max_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ALL GOOD!" }))
}

/// Response body for `POST /upload/pdf`.
#[derive(Serialize)]
struct UploadResponse {
    message: &'static str,
    job_id: JobId,
    filename: String,
}

async fn upload_document<S>(
    State(service): State<Arc<S>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError>
where
    S: RagApi,
{
    while let Some(field) = multipart.next_field().await? {
        let is_upload = field
            .name()
            .is_some_and(|name| UPLOAD_FIELDS.contains(&name));
        if !is_upload {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await?;
        let accepted = service.upload(&filename, bytes.to_vec()).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(UploadResponse {
                message: "uploaded",
                job_id: accepted.job_id,
                filename: accepted.filename,
            }),
        ));
    }
    Err(ApiError::bad_request(
        "missing_file",
        "multipart field `pdf` or `file` is required",
    ))
}

/// Query string for `GET /chat`.
#[derive(Deserialize)]
struct ChatParams {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    k: Option<usize>,
}

/// Response body for `GET /chat`.
#[derive(Serialize)]
struct ChatResponse {
    message: String,
    docs: Vec<SupportingChunk>,
}

async fn chat<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<ChatParams>,
) -> Result<Json<ChatResponse>, ApiError>
where
    S: RagApi,
{
    if params.k == Some(0) {
        return Err(ApiError::bad_request("invalid_k", "k must be greater than zero"));
    }
    let message = params.message.unwrap_or_default();
    let result = service.ask(&message, params.k).await?;
    Ok(Json(ChatResponse {
        message: result.answer,
        docs: result.supporting_chunks,
    }))
}

/// Response body for `GET /jobs/:id`.
#[derive(Serialize)]
struct JobStatusResponse {
    job_id: JobId,
    #[serde(flatten)]
    status: JobStatus,
}

async fn job_status<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError>
where
    S: RagApi,
{
    let job_id: JobId = id
        .parse()
        .map_err(|_| ApiError::bad_request("invalid_job_id", "job id must be a UUID"))?;
    let status = service
        .job_status(job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "job_not_found", format!("unknown job {job_id}")))?;
    Ok(Json(JobStatusResponse { job_id, status }))
}

#[derive(Serialize)]
struct DocumentEntry {
    source_filename: String,
    records: usize,
}

/// Response body for `GET /documents`.
#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentEntry>,
}

async fn list_documents<S>(State(service): State<Arc<S>>) -> Result<Json<DocumentsResponse>, ApiError>
where
    S: RagApi,
{
    let documents = service
        .documents()
        .await?
        .into_iter()
        .map(|(source_filename, records)| DocumentEntry {
            source_filename,
            records,
        })
        .collect();
    Ok(Json(DocumentsResponse { documents }))
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: RagApi,
{
    Json(service.metrics_snapshot())
}

/// Error rendered as a JSON body with a machine-readable kind.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
        }
    }

    fn bad_request(kind: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, kind, message)
    }

    fn provider(kind: &'static str, retryable: bool, message: String) -> Self {
        let status = if retryable {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::BAD_GATEWAY
        };
        Self::new(status, kind, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(kind = self.kind, error = %self.message, "Request failed");
        }
        (
            self.status,
            Json(json!({ "error": self.message, "kind": self.kind })),
        )
            .into_response()
    }
}

impl From<MultipartError> for ApiError {
    fn from(error: MultipartError) -> Self {
        Self::new(error.status(), "invalid_upload", error.body_text())
    }
}

impl From<IntakeError> for ApiError {
    fn from(error: IntakeError) -> Self {
        let message = error.to_string();
        match error {
            IntakeError::EmptyUpload => Self::bad_request("empty_upload", message),
            IntakeError::UnsupportedFormat(_) => Self::bad_request("unsupported_format", message),
            IntakeError::Io { .. } => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "storage", message),
            IntakeError::Queue(inner) => inner.into(),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "queue", error.to_string())
    }
}

impl From<VectorStoreError> for ApiError {
    fn from(error: VectorStoreError) -> Self {
        let message = error.to_string();
        match &error {
            VectorStoreError::CollectionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "collection_not_found", message)
            }
            VectorStoreError::Qdrant(_) => Self::provider("vector_store", error.is_retryable(), message),
            VectorStoreError::DimensionMismatch { .. } | VectorStoreError::DistanceMismatch { .. } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "vector_store_config", message)
            }
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(error: QueryError) -> Self {
        let message = error.to_string();
        match error {
            QueryError::EmptyQuery => Self::bad_request("empty_query", message),
            QueryError::Embedding(inner) => Self::provider("embedding", inner.is_retryable(), message),
            QueryError::DimensionMismatch { .. } | QueryError::EmptyEmbedding => {
                Self::provider("embedding", false, message)
            }
            QueryError::VectorStore(inner) => inner.into(),
            QueryError::Generation(inner) => Self::provider("generation", inner.is_retryable(), message),
        }
    }
}
