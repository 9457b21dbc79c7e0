use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Values parsed individually but contradict each other.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Runtime configuration shared by the HTTP service and the ingestion worker.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the collection associated with this deployment.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Distance function the collection is created with.
    pub qdrant_distance: Distance,
    /// Vector store backend.
    pub vector_store_provider: VectorStoreProvider,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Number of texts sent per embedding request.
    pub embedding_batch_size: usize,
    /// Language model backend used for answer generation.
    pub generation_provider: GenerationProvider,
    /// Chat model identifier passed to the generation provider.
    pub chat_model: String,
    /// Optional sampling temperature for generation.
    pub generation_temperature: Option<f32>,
    /// Credential for OpenAI-compatible endpoints.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime.
    pub ollama_url: String,
    /// Timeout applied to embedding and generation HTTP calls, in seconds.
    pub provider_timeout_secs: u64,
    /// Maximum characters per chunk.
    pub text_splitter_chunk_size: usize,
    /// Characters repeated between consecutive chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Chunks beyond this count are dropped from a single job.
    pub ingest_max_chunks_per_job: usize,
    /// Number of chunks retrieved per query.
    pub retrieval_top_k: usize,
    /// Optional token budget for the grounding context.
    pub retrieval_max_context_tokens: Option<usize>,
    /// Root directory of the durable job queue.
    pub queue_dir: PathBuf,
    /// Concurrently in-flight jobs per consumer.
    pub queue_max_in_flight: usize,
    /// Seconds a delivered job may stay unacknowledged before redelivery.
    pub queue_visibility_timeout_secs: u64,
    /// Deliveries before a retryable job is dead-lettered.
    pub queue_max_attempts: u32,
    /// Idle poll interval of the consumer, in milliseconds.
    pub queue_poll_interval_ms: u64,
    /// Directory receiving accepted uploads.
    pub upload_dir: PathBuf,
    /// Request body limit for uploads.
    pub upload_max_bytes: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Run the ingestion worker inside the HTTP process.
    pub worker_embedded: bool,
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Hosted OpenAI (or compatible) embeddings API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
    /// Deterministic offline vectors derived from text hashes.
    Fake,
}

/// Supported language model backends for answer generation.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationProvider {
    /// Hosted OpenAI (or compatible) chat completions API.
    OpenAI,
    /// Local Ollama runtime.
    Ollama,
    /// Offline stand-in that answers from the retrieved passages verbatim.
    Extractive,
}

/// Supported vector store backends.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreProvider {
    /// Qdrant over its HTTP API.
    Qdrant,
    /// Process-local store; only valid with the embedded worker.
    Memory,
}

/// Similarity metric a collection is created with.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    /// Cosine similarity.
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean distance.
    Euclid,
}

impl Distance {
    /// Name used by Qdrant's collection API.
    pub fn as_qdrant(&self) -> &'static str {
        match self {
            Self::Cosine => "Cosine",
            Self::Dot => "Dot",
            Self::Euclid => "Euclid",
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            qdrant_url: load_env_or("QDRANT_URL", "http://localhost:6333"),
            qdrant_collection_name: load_env_or("QDRANT_COLLECTION_NAME", "pdf-rag"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            qdrant_distance: parse_env_or("QDRANT_DISTANCE", Distance::Cosine)?,
            vector_store_provider: parse_env_or(
                "VECTOR_STORE_PROVIDER",
                VectorStoreProvider::Qdrant,
            )?,
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env_or("EMBEDDING_MODEL", "text-embedding-3-small"),
            embedding_dimension: parse_env_or("EMBEDDING_DIMENSION", 1536)?,
            embedding_batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", 64)?,
            generation_provider: load_env("GENERATION_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("GENERATION_PROVIDER".to_string()))?,
            chat_model: load_env_or("CHAT_MODEL", "gpt-4o-mini"),
            generation_temperature: parse_env_optional("GENERATION_TEMPERATURE")?,
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            ollama_url: load_env_or("OLLAMA_URL", "http://127.0.0.1:11434"),
            provider_timeout_secs: parse_env_or("PROVIDER_TIMEOUT_SECS", 60)?,
            text_splitter_chunk_size: parse_env_or("TEXT_SPLITTER_CHUNK_SIZE", 1000)?,
            text_splitter_chunk_overlap: parse_env_or("TEXT_SPLITTER_CHUNK_OVERLAP", 200)?,
            ingest_max_chunks_per_job: parse_env_or("INGEST_MAX_CHUNKS_PER_JOB", 50)?,
            retrieval_top_k: parse_env_or("RETRIEVAL_TOP_K", 2)?,
            retrieval_max_context_tokens: parse_env_optional("RETRIEVAL_MAX_CONTEXT_TOKENS")?,
            queue_dir: PathBuf::from(load_env_or("QUEUE_DIR", "queue")),
            queue_max_in_flight: parse_env_or("QUEUE_MAX_IN_FLIGHT", 1)?,
            queue_visibility_timeout_secs: parse_env_or("QUEUE_VISIBILITY_TIMEOUT_SECS", 300)?,
            queue_max_attempts: parse_env_or("QUEUE_MAX_ATTEMPTS", 3)?,
            queue_poll_interval_ms: parse_env_or("QUEUE_POLL_INTERVAL_MS", 500)?,
            upload_dir: PathBuf::from(load_env_or("UPLOAD_DIR", "uploads")),
            upload_max_bytes: parse_env_or("UPLOAD_MAX_BYTES", 50 * 1024 * 1024)?,
            server_port: parse_env_optional("SERVER_PORT")?,
            worker_embedded: load_env_optional("WORKER_EMBEDDED")
                .map(|value| parse_flag(&value))
                .transpose()?
                .unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would only fail later, mid-job or mid-request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.text_splitter_chunk_size == 0 {
            return Err(invalid("TEXT_SPLITTER_CHUNK_SIZE must be greater than zero"));
        }
        if self.text_splitter_chunk_overlap >= self.text_splitter_chunk_size {
            return Err(ConfigError::InvalidConfiguration(format!(
                "TEXT_SPLITTER_CHUNK_OVERLAP ({}) must be smaller than TEXT_SPLITTER_CHUNK_SIZE ({})",
                self.text_splitter_chunk_overlap, self.text_splitter_chunk_size
            )));
        }
        let positive = [
            ("EMBEDDING_DIMENSION", self.embedding_dimension),
            ("EMBEDDING_BATCH_SIZE", self.embedding_batch_size),
            ("INGEST_MAX_CHUNKS_PER_JOB", self.ingest_max_chunks_per_job),
            ("RETRIEVAL_TOP_K", self.retrieval_top_k),
            ("QUEUE_MAX_IN_FLIGHT", self.queue_max_in_flight),
            ("QUEUE_MAX_ATTEMPTS", self.queue_max_attempts as usize),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::InvalidConfiguration(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.vector_store_provider == VectorStoreProvider::Memory && !self.worker_embedded {
            return Err(invalid(
                "VECTOR_STORE_PROVIDER=memory is only valid with WORKER_EMBEDDED=true",
            ));
        }
        let needs_openai = self.embedding_provider == EmbeddingProvider::OpenAI
            || self.generation_provider == GenerationProvider::OpenAI;
        if needs_openai && self.openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".to_string()));
        }
        Ok(())
    }

    /// Provider HTTP timeout as a [`Duration`].
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs.max(1))
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfiguration(message.to_string())
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_env_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    Ok(parse_env_optional(key)?.unwrap_or(default))
}

fn parse_flag(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue("WORKER_EMBEDDED".to_string())),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "fake" => Ok(Self::Fake),
            _ => Err(()),
        }
    }
}

impl FromStr for GenerationProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            "extractive" => Ok(Self::Extractive),
            _ => Err(()),
        }
    }
}

impl FromStr for VectorStoreProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

impl FromStr for Distance {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "dot" => Ok(Self::Dot),
            "euclid" | "euclidean" => Ok(Self::Euclid),
            _ => Err(()),
        }
    }
}

/// Load `.env` (when present) and then the process environment.
pub fn load() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        vector_store = ?config.vector_store_provider,
        embedding_provider = ?config.embedding_provider,
        generation_provider = ?config.generation_provider,
        chunk_size = config.text_splitter_chunk_size,
        chunk_overlap = config.text_splitter_chunk_overlap,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        qdrant_url: "http://127.0.0.1:6333".into(),
        qdrant_collection_name: "test-docs".into(),
        qdrant_api_key: None,
        qdrant_distance: Distance::Cosine,
        vector_store_provider: VectorStoreProvider::Memory,
        embedding_provider: EmbeddingProvider::Fake,
        embedding_model: "fake".into(),
        embedding_dimension: 64,
        embedding_batch_size: 8,
        generation_provider: GenerationProvider::Extractive,
        chat_model: "extractive".into(),
        generation_temperature: None,
        openai_api_key: None,
        openai_base_url: "https://api.openai.com/v1".into(),
        ollama_url: "http://127.0.0.1:11434".into(),
        provider_timeout_secs: 5,
        text_splitter_chunk_size: 1000,
        text_splitter_chunk_overlap: 200,
        ingest_max_chunks_per_job: 50,
        retrieval_top_k: 2,
        retrieval_max_context_tokens: None,
        queue_dir: PathBuf::from("queue"),
        queue_max_in_flight: 1,
        queue_visibility_timeout_secs: 300,
        queue_max_attempts: 3,
        queue_poll_interval_ms: 50,
        upload_dir: PathBuf::from("uploads"),
        upload_max_bytes: 1024 * 1024,
        server_port: None,
        worker_embedded: true,
    }
}
