//! Embedding client abstraction and adapters.
//!
//! The provider is picked from configuration at startup; the pipeline only ever sees
//! `Arc<dyn EmbeddingClient>`.

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Transient provider failure (timeout, rate limit, server error).
    #[error("Embedding provider unavailable: {0}")]
    Provider(String),
    /// Permanent failure caused by credentials, model name, or request shape.
    #[error("Embedding provider rejected the request: {0}")]
    Configuration(String),
    /// Provider answered with something that cannot be used.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    /// Whether the same request might succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider(_))
    }

    pub(crate) fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{provider} returned {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::Provider(message)
        } else {
            Self::Configuration(message)
        }
    }

    pub(crate) fn from_transport(provider: &str, error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(format!("failed to decode {provider} response: {error}"))
        } else {
            Self::Provider(format!("failed to reach {provider}: {error}"))
        }
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding vector per input text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "do", "does", "for", "from", "how", "in",
    "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what", "when", "where",
    "which", "who", "why", "with",
];

/// Deterministic offline embedding client.
///
/// Text is lowercased, split into alphanumeric words, stripped of stopwords and simple plural
/// suffixes, and each word is hashed into a slot of a fixed-size vector. The result is L2
/// normalised, so texts sharing words land close together under cosine similarity without any
/// network dependency.
#[derive(Debug, Clone)]
pub struct FakeEmbeddingClient {
    dimension: usize,
}

impl FakeEmbeddingClient {
    /// Construct a deterministic client producing vectors of `dimension` length.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        let mut features = 0usize;

        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let word = normalize_word(word);
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }
            embedding[self.slot(word.as_bytes())] += 1.0;
            features += 1;
        }

        if features == 0 && !text.is_empty() {
            embedding[self.slot(text.as_bytes())] = 1.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }

    fn slot(&self, bytes: &[u8]) -> usize {
        let digest = Sha256::digest(bytes);
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        (u64::from_le_bytes(prefix) % self.dimension as u64) as usize
    }
}

fn normalize_word(word: &str) -> String {
    let lower = word.to_lowercase();
    if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
        lower[..lower.len() - 1].to_string()
    } else {
        lower
    }
}

#[async_trait]
impl EmbeddingClient for FakeEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::Configuration(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        tracing::trace!(count = texts.len(), dimension = self.dimension, "Generating fake embeddings");
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.openai_api_key.clone().unwrap_or_default(),
            &config.openai_base_url,
            config.embedding_model.clone(),
            Some(config.embedding_dimension),
            config.provider_timeout(),
        )?),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            &config.ollama_url,
            config.embedding_model.clone(),
            config.provider_timeout(),
        )?),
        EmbeddingProvider::Fake => {
            tracing::warn!(
                dimension = config.embedding_dimension,
                "Using deterministic fake embeddings; retrieval quality is lexical only"
            );
            Arc::new(FakeEmbeddingClient::new(config.embedding_dimension))
        }
    };
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Embedding client initialized"
    );
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn fake_embeddings_are_deterministic_and_sized() {
        let client = FakeEmbeddingClient::new(32);
        let first = client
            .generate_embeddings(vec!["hello world".into(), "other".into()])
            .await
            .unwrap();
        let second = client
            .generate_embeddings(vec!["hello world".into()])
            .await
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].len(), 32);
        assert_eq!(first[0], second[0]);
    }

    #[tokio::test]
    async fn fake_embeddings_are_normalized() {
        let client = FakeEmbeddingClient::new(16);
        let vectors = client
            .generate_embeddings(vec!["the".into(), "refund policy".into()])
            .await
            .unwrap();
        for vector in vectors {
            let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn shared_words_score_higher_than_unrelated_text() {
        let client = FakeEmbeddingClient::new(1024);
        let vectors = client
            .generate_embeddings(vec![
                "What is the refund policy?".into(),
                "Refunds are issued within 30 days".into(),
                "Shipping takes five business days".into(),
            ])
            .await
            .unwrap();
        assert!(cosine(&vectors[0], &vectors[1]) > cosine(&vectors[0], &vectors[2]));
    }

    #[tokio::test]
    async fn empty_input_yields_no_vectors() {
        let client = FakeEmbeddingClient::new(8);
        assert!(client.generate_embeddings(Vec::new()).await.unwrap().is_empty());
    }

    #[test]
    fn status_classification_separates_transient_failures() {
        let limited = EmbeddingClientError::from_status("OpenAI", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(limited.is_retryable());
        let unavailable = EmbeddingClientError::from_status("OpenAI", StatusCode::BAD_GATEWAY, "");
        assert!(unavailable.is_retryable());
        let unauthorized = EmbeddingClientError::from_status("OpenAI", StatusCode::UNAUTHORIZED, "bad key");
        assert!(!unauthorized.is_retryable());
    }
}
