//! OpenAI-compatible `/embeddings` client.

use super::{EmbeddingClient, EmbeddingClientError};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Embeddings client for OpenAI and API-compatible hosts.
pub struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbeddingClient {
    /// Build a client; `dimensions` is only forwarded to models that accept it.
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingClientError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingClientError::Configuration(
                "missing OpenAI API key".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
            EmbeddingClientError::Configuration("invalid OpenAI API key".to_string())
        })?;
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder()
            .user_agent("pdf-rag/embeddings")
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                EmbeddingClientError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;
        let dimensions = dimensions.filter(|_| model.starts_with("text-embedding-3"));

        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimensions,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: &texts,
            dimensions: self.dimensions,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|error| EmbeddingClientError::from_transport("OpenAI", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::from_status("OpenAI", status, &body));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingClientError::from_transport("OpenAI", error))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "OpenAI returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);
        tracing::debug!(model = %self.model, count = texts.len(), "OpenAI embeddings generated");
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}
