//! HTTP client wrapper implementing [`VectorStore`] on top of Qdrant.

use crate::config::Distance;
use crate::qdrant::{
    filters::{accumulate_source, source_filter},
    payload::{build_payload, current_timestamp_rfc3339, parse_payload},
    scroller::stream_payloads,
    types::{
        CollectionInfoResponse, CountResponse, QdrantError, QueryResponse, QueryResponseResult,
        VectorsConfig,
    },
};
use crate::vector_store::{ScoredRecord, VectorRecord, VectorStore, VectorStoreError};
use async_trait::async_trait;
use futures_util::{pin_mut, stream::StreamExt};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::collections::BTreeMap;

const PAYLOAD_INDEXES: [(&str, &str); 2] = [
    ("source_filename", "keyword"),
    ("document_hash", "keyword"),
];

/// Lightweight HTTP client for Qdrant operations.
pub struct QdrantStore {
    pub(crate) client: Client,
    pub(crate) base_url: String,
    pub(crate) api_key: Option<String>,
    pub(crate) distance: Distance,
}

impl QdrantStore {
    /// Construct a client for the instance at `url`.
    pub fn new(url: &str, api_key: Option<String>, distance: Distance) -> Result<Self, QdrantError> {
        let client = Client::builder().user_agent("pdf-rag/0.1").build()?;
        let base_url = normalize_base_url(url).map_err(QdrantError::InvalidUrl)?;
        tracing::debug!(
            url = %base_url,
            has_api_key = %api_key.as_deref().map(|value| !value.is_empty()).unwrap_or(false),
            distance = distance.as_qdrant(),
            "Initialized Qdrant HTTP client"
        );

        Ok(Self {
            client,
            base_url,
            api_key,
            distance,
        })
    }

    /// Fetch `(size, distance)` of an existing collection, or `None` when it is missing.
    async fn collection_params(
        &self,
        collection: &str,
    ) -> Result<Option<(usize, String)>, VectorStoreError> {
        let response = self
            .request(Method::GET, &format!("collections/{collection}"))
            .send()
            .await
            .map_err(QdrantError::from)?;

        match response.status() {
            StatusCode::OK => {
                let info: CollectionInfoResponse = response.json().await.map_err(QdrantError::from)?;
                match info.result.config.params.vectors {
                    VectorsConfig::Single { size, distance } => Ok(Some((size, distance))),
                    VectorsConfig::Named(_) => Err(QdrantError::InvalidPayload(format!(
                        "collection '{collection}' uses named vectors"
                    ))
                    .into()),
                }
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::error!(collection, error = %error, "Collection existence check failed");
                Err(error.into())
            }
        }
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<(), QdrantError> {
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": self.distance.as_qdrant()
            }
        });

        let response = self
            .request(Method::PUT, &format!("collections/{collection}"))
            .json(&body)
            .send()
            .await?;

        self.ensure_success(response, || {
            tracing::info!(collection, dimension, distance = self.distance.as_qdrant(), "Collection created");
        })
        .await
    }

    async fn ensure_payload_indexes(&self, collection: &str) -> Result<(), QdrantError> {
        for (field, schema) in PAYLOAD_INDEXES {
            let response = self
                .request(Method::PUT, &format!("collections/{collection}/index"))
                .query(&[("wait", true)])
                .json(&json!({ "field_name": field, "field_schema": schema }))
                .send()
                .await?;

            let status = response.status();
            if status.is_success() || status == StatusCode::CONFLICT {
                tracing::debug!(collection, field, schema, "Payload index ensured");
            } else {
                let body = response.text().await.unwrap_or_default();
                let error = QdrantError::UnexpectedStatus { status, body };
                tracing::warn!(collection, field, schema, error = %error, "Failed to ensure payload index");
            }
        }
        Ok(())
    }

    pub(crate) fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format_endpoint(&self.base_url, path);
        let mut req = self.client.request(method, url);
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            req = req.header("api-key", api_key);
        }
        req
    }

    async fn ensure_success<F>(&self, response: reqwest::Response, on_success: F) -> Result<(), QdrantError>
    where
        F: FnOnce(),
    {
        if response.status().is_success() {
            on_success();
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = QdrantError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Qdrant request failed");
            Err(error)
        }
    }

    /// Read a response for `collection`, turning 404 into [`VectorStoreError::CollectionNotFound`].
    async fn checked(
        &self,
        collection: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, VectorStoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(collection, status, body))
    }
}

fn classify_status(collection: &str, status: StatusCode, body: String) -> VectorStoreError {
    if status == StatusCode::NOT_FOUND {
        VectorStoreError::CollectionNotFound(collection.to_string())
    } else {
        let error = QdrantError::UnexpectedStatus { status, body };
        tracing::error!(collection, error = %error, "Qdrant request failed");
        error.into()
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn ensure_collection(&self, collection: &str, dimension: usize) -> Result<(), VectorStoreError> {
        match self.collection_params(collection).await? {
            Some((size, _)) if size != dimension => Err(VectorStoreError::DimensionMismatch {
                collection: collection.to_string(),
                expected: size,
                actual: dimension,
            }),
            Some((_, distance)) if !distance.eq_ignore_ascii_case(self.distance.as_qdrant()) => {
                Err(VectorStoreError::DistanceMismatch {
                    collection: collection.to_string(),
                    expected: self.distance,
                    actual: distance,
                })
            }
            Some(_) => {
                tracing::debug!(collection, dimension, "Collection already present");
                Ok(())
            }
            None => {
                self.create_collection(collection, dimension).await?;
                self.ensure_payload_indexes(collection).await?;
                Ok(())
            }
        }
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> Result<usize, VectorStoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let now = current_timestamp_rfc3339();
        let points: Vec<Value> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.id,
                    "vector": record.vector,
                    "payload": build_payload(&record.payload, &now),
                })
            })
            .collect();
        let count = points.len();

        let response = self
            .request(Method::PUT, &format!("collections/{collection}/points"))
            .query(&[("wait", true)])
            .json(&json!({ "points": points }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        self.checked(collection, response).await?;

        tracing::debug!(collection, points = count, "Points upserted");
        Ok(count)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredRecord>, VectorStoreError> {
        let body = json!({
            "query": vector,
            "limit": k,
            "with_payload": true,
            "with_vector": false,
        });

        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/query"))
            .json(&body)
            .send()
            .await
            .map_err(QdrantError::from)?;
        let response = self.checked(collection, response).await?;

        let payload: QueryResponse = response.json().await.map_err(QdrantError::from)?;
        let points = match payload.result {
            QueryResponseResult::Points(points) => points,
            QueryResponseResult::Object { points } => points,
        };

        let mut hits = Vec::with_capacity(points.len());
        for point in points {
            let payload = point
                .payload
                .ok_or_else(|| QdrantError::InvalidPayload("point returned without payload".into()))?;
            hits.push(ScoredRecord {
                id: stringify_point_id(point.id),
                score: point.score,
                payload: parse_payload(payload)?,
            });
        }
        hits.truncate(k);
        Ok(hits)
    }

    async fn count_for_source(&self, collection: &str, source_filename: &str) -> Result<usize, VectorStoreError> {
        let response = self
            .request(Method::POST, &format!("collections/{collection}/points/count"))
            .json(&json!({ "filter": source_filter(source_filename), "exact": true }))
            .send()
            .await
            .map_err(QdrantError::from)?;
        let response = self.checked(collection, response).await?;
        let CountResponse { result } = response.json().await.map_err(QdrantError::from)?;
        Ok(result.count)
    }

    async fn source_counts(&self, collection: &str) -> Result<BTreeMap<String, usize>, VectorStoreError> {
        let stream = stream_payloads(self, collection, json!(["source_filename"]), None);
        pin_mut!(stream);

        let mut counts = BTreeMap::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(payload) => accumulate_source(&payload, &mut counts),
                Err(QdrantError::UnexpectedStatus { status, body }) => {
                    return Err(classify_status(collection, status, body));
                }
                Err(error) => return Err(error.into()),
            }
        }
        Ok(counts)
    }
}

fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = reqwest::Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

pub(crate) fn stringify_point_id(id: Value) -> String {
    match id {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Object(map) => map
            .get("uuid")
            .map(|value| match value {
                Value::String(uuid) => uuid.clone(),
                other => other.to_string(),
            })
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
