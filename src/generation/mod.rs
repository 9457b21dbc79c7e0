//! Language-model abstraction used to turn retrieved passages into an answer.
//!
//! Like the embedding side, the backend is chosen from configuration at startup. The
//! extractive model needs no network and answers by quoting the passages most related to the
//! question, which keeps the query path testable offline.

mod ollama;
mod openai;

pub use ollama::OllamaChatModel;
pub use openai::OpenAiChatModel;

use crate::config::{Config, GenerationProvider};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by language-model providers.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Timeout, rate limit, or server-side failure.
    #[error("Language model unavailable: {0}")]
    Unavailable(String),
    /// Provider refused the request (credentials, model name, request shape).
    #[error("Language model rejected the request: {0}")]
    Rejected(String),
    /// Provider answered with something that cannot be used.
    #[error("Malformed language model response: {0}")]
    InvalidResponse(String),
    /// Client could not be constructed from configuration.
    #[error("Language model misconfigured: {0}")]
    Configuration(String),
}

impl GenerationError {
    /// Whether the caller may reasonably retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn from_status(provider: &str, status: StatusCode, body: &str) -> Self {
        let message = format!("{provider} returned {status}: {body}");
        if status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
            || status.is_server_error()
        {
            Self::Unavailable(message)
        } else {
            Self::Rejected(message)
        }
    }

    pub(crate) fn from_transport(provider: &str, error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(format!("failed to decode {provider} response: {error}"))
        } else {
            Self::Unavailable(format!("failed to reach {provider}: {error}"))
        }
    }
}

/// One grounded generation call: system instruction plus the user's turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// System instruction, already carrying the grounding context.
    pub system_prompt: String,
    /// The user's question.
    pub user_message: String,
    /// Passages embedded in the system prompt, in retrieval order.
    pub passages: Vec<String>,
}

/// Interface implemented by language-model backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce an answer for `request`.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;
}

/// Offline stand-in that answers by quoting the best-matching sentences of the passages.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtractiveChatModel;

/// Reply when retrieval found nothing to ground the answer in.
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find anything in the uploaded documents that answers this question.";

const MAX_SENTENCES: usize = 2;

const QUESTION_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "in", "is", "it", "me", "my", "of", "on", "or", "our", "tell", "that", "the", "this",
    "to", "was", "we", "what", "when", "where", "which", "who", "why", "with", "you", "your",
];

impl ExtractiveChatModel {
    /// Construct the extractive model.
    pub const fn new() -> Self {
        Self
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            if lower.len() > 3 && lower.ends_with('s') && !lower.ends_with("ss") {
                lower[..lower.len() - 1].to_string()
            } else {
                lower
            }
        })
        .filter(|word| !QUESTION_STOPWORDS.contains(&word.as_str()))
        .collect()
}

fn sentences(passage: &str) -> impl Iterator<Item = &str> {
    passage
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|sentence| !sentence.is_empty())
}

#[async_trait]
impl ChatModel for ExtractiveChatModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let question = terms(&request.user_message);
        let mut candidates: Vec<(usize, usize, &str)> = request
            .passages
            .iter()
            .flat_map(|passage| sentences(passage))
            .enumerate()
            .map(|(position, sentence)| {
                let overlap = terms(sentence).intersection(&question).count();
                (overlap, position, sentence)
            })
            .collect();

        let Some(&(_, _, first)) = candidates.first() else {
            return Ok(NO_CONTEXT_ANSWER.to_string());
        };

        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        let mut chosen: Vec<(usize, &str)> = candidates
            .iter()
            .filter(|(overlap, _, _)| *overlap > 0)
            .take(MAX_SENTENCES)
            .map(|(_, position, sentence)| (*position, *sentence))
            .collect();
        if chosen.is_empty() {
            chosen.push((0, first));
        }
        chosen.sort_by_key(|(position, _)| *position);

        let quoted: Vec<&str> = chosen.into_iter().map(|(_, sentence)| sentence).collect();
        Ok(format!("According to the documents: {}.", quoted.join(". ")))
    }
}

/// Build the language model selected by configuration.
pub fn build_chat_model(config: &Config) -> Result<Arc<dyn ChatModel>, GenerationError> {
    let model: Arc<dyn ChatModel> = match config.generation_provider {
        GenerationProvider::OpenAI => Arc::new(OpenAiChatModel::new(
            config.openai_api_key.clone().unwrap_or_default(),
            &config.openai_base_url,
            config.chat_model.clone(),
            config.generation_temperature,
            config.provider_timeout(),
        )?),
        GenerationProvider::Ollama => Arc::new(OllamaChatModel::new(
            &config.ollama_url,
            config.chat_model.clone(),
            config.generation_temperature,
            config.provider_timeout(),
        )?),
        GenerationProvider::Extractive => {
            tracing::warn!("Using extractive answers; no language model will be called");
            Arc::new(ExtractiveChatModel::new())
        }
    };
    tracing::info!(
        provider = ?config.generation_provider,
        model = %config.chat_model,
        "Chat model initialized"
    );
    Ok(model)
}
