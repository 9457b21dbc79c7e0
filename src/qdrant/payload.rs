//! Helpers for constructing, parsing and hashing Qdrant payloads.

use crate::qdrant::types::QdrantError;
use crate::vector_store::ChunkPayload;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Build the payload object stored alongside each indexed chunk.
pub(crate) fn build_payload(payload: &ChunkPayload, ingested_at_rfc3339: &str) -> Value {
    let mut map = Map::new();
    map.insert("text".into(), Value::String(payload.text.clone()));
    map.insert(
        "source_filename".into(),
        Value::String(payload.source_filename.clone()),
    );
    map.insert("sequence_index".into(), Value::from(payload.sequence_index));
    if let Some(page) = payload.page_number {
        map.insert("page_number".into(), Value::from(page));
    }
    if !payload.document_hash.is_empty() {
        map.insert(
            "document_hash".into(),
            Value::String(payload.document_hash.clone()),
        );
    }
    map.insert(
        "chunk_hash".into(),
        Value::String(compute_content_hash(&payload.text)),
    );
    map.insert(
        "ingested_at".into(),
        Value::String(ingested_at_rfc3339.to_string()),
    );
    Value::Object(map)
}

/// Recover a [`ChunkPayload`] from a stored payload, ignoring bookkeeping fields.
pub(crate) fn parse_payload(payload: Map<String, Value>) -> Result<ChunkPayload, QdrantError> {
    serde_json::from_value(Value::Object(payload))
        .map_err(|error| QdrantError::InvalidPayload(error.to_string()))
}

/// Compute a deterministic SHA-256 hex digest of `text`.
pub fn compute_content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
