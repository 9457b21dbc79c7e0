//! Question answering over the indexed collection: embed, retrieve, budget the context, generate.

use super::prompt::{ContextBudget, assemble_context, system_prompt};
use crate::{
    config::Config,
    embedding::{EmbeddingClient, EmbeddingClientError},
    generation::{ChatModel, GenerationError, GenerationRequest},
    metrics::PipelineMetrics,
    processing::DocumentChunk,
    vector_store::{VectorStore, VectorStoreError},
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Failures surfaced by the query path. None of them is retried here.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query was blank.
    #[error("Query must not be empty")]
    EmptyQuery,
    /// Embedding the query failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// The query embedding does not fit the collection.
    #[error("Query embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        /// Collection dimensionality.
        expected: usize,
        /// Dimensionality returned by the provider.
        actual: usize,
    },
    /// The provider returned no embedding for the query.
    #[error("Embedding provider returned no vector for the query")]
    EmptyEmbedding,
    /// Similarity search failed.
    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),
    /// The language model call failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

/// Retrieved chunk with the score the vector store ranked it by.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupportingChunk {
    /// Chunk text and provenance.
    #[serde(flatten)]
    pub chunk: DocumentChunk,
    /// Similarity under the collection's distance function.
    pub score: f32,
}

/// Grounded answer plus the chunks it was grounded in, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Generated answer.
    pub answer: String,
    /// Chunks included in the grounding context.
    pub supporting_chunks: Vec<SupportingChunk>,
}

/// Knobs for the query path.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Collection searched by every query.
    pub collection: String,
    /// Dimensionality the query embedding must have.
    pub dimension: usize,
    /// Default retrieval breadth.
    pub top_k: usize,
    /// Optional limit on grounding-context tokens.
    pub max_context_tokens: Option<usize>,
}

impl QuerySettings {
    /// Settings derived from [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self {
            collection: config.qdrant_collection_name.clone(),
            dimension: config.embedding_dimension,
            top_k: config.retrieval_top_k,
            max_context_tokens: config.retrieval_max_context_tokens,
        }
    }
}

/// Embeds a question, retrieves similar chunks and asks the language model for an answer.
pub struct QueryService {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ChatModel>,
    metrics: Arc<PipelineMetrics>,
    budget: ContextBudget,
    settings: QuerySettings,
}

impl QueryService {
    /// Assemble the service from its collaborators.
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        model: Arc<dyn ChatModel>,
        metrics: Arc<PipelineMetrics>,
        settings: QuerySettings,
    ) -> Self {
        Self {
            embedder,
            store,
            model,
            metrics,
            budget: ContextBudget::new(settings.max_context_tokens),
            settings,
        }
    }

    /// Answer `query` with the configured breadth.
    pub async fn answer(&self, query: &str) -> Result<QueryResult, QueryError> {
        self.answer_with_k(query, self.settings.top_k).await
    }

    /// Answer `query` retrieving at most `k` chunks. A `k` of zero uses the configured breadth.
    pub async fn answer_with_k(&self, query: &str, k: usize) -> Result<QueryResult, QueryError> {
        match self.run(query, k).await {
            Ok((answer, hits)) => {
                self.metrics.record_query(true, hits);
                Ok(answer)
            }
            Err(error) => {
                tracing::warn!(%error, "Query failed");
                self.metrics.record_query(false, 0);
                Err(error)
            }
        }
    }

    /// Returns the answer with the number of hits retrieved before budgeting.
    async fn run(&self, query: &str, k: usize) -> Result<(QueryResult, usize), QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        let k = if k == 0 { self.settings.top_k } else { k };

        let vector = self
            .embedder
            .generate_embeddings(vec![query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(QueryError::EmptyEmbedding)?;
        if vector.len() != self.settings.dimension {
            return Err(QueryError::DimensionMismatch {
                expected: self.settings.dimension,
                actual: vector.len(),
            });
        }

        let hits = self
            .store
            .query(&self.settings.collection, &vector, k)
            .await?;
        if hits.is_empty() {
            tracing::info!(k, "No passages retrieved; answering without context");
        }

        let mut supporting: Vec<SupportingChunk> = hits
            .into_iter()
            .map(|hit| SupportingChunk {
                score: hit.score,
                chunk: hit.payload.into_chunk(),
            })
            .collect();
        let chunks: Vec<DocumentChunk> = supporting.iter().map(|s| s.chunk.clone()).collect();
        let context = assemble_context(&chunks, &self.budget);
        supporting.truncate(context.included);

        let prompt = system_prompt(&context.text);
        let prompt_tokens = self.budget.count(&prompt) + self.budget.count(query);
        tracing::info!(
            k,
            hits = chunks.len(),
            included = context.included,
            context_tokens = context.tokens,
            prompt_tokens,
            "Context assembled"
        );

        let request = GenerationRequest {
            system_prompt: prompt,
            user_message: query.to_string(),
            passages: supporting.iter().map(|s| s.chunk.text.clone()).collect(),
        };
        let answer = self.model.generate(request).await?;

        Ok((
            QueryResult {
                answer,
                supporting_chunks: supporting,
            },
            chunks.len(),
        ))
    }
}
