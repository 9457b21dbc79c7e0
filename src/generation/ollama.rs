//! Ollama `/api/chat` client.

use super::{ChatModel, GenerationError, GenerationRequest};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat model served by a local Ollama runtime.
#[derive(Clone)]
pub struct OllamaChatModel {
    http: Client,
    base_url: String,
    model: String,
    temperature: Option<f32>,
}

impl OllamaChatModel {
    /// Build a client for the runtime at `base_url`.
    pub fn new(
        base_url: &str,
        model: String,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .user_agent("pdf-rag/chat")
            .timeout(timeout)
            .build()
            .map_err(|error| {
                GenerationError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ChatOptions>,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_message,
                },
            ],
            stream: false,
            options: self
                .temperature
                .map(|temperature| ChatOptions { temperature }),
        };

        let response = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|error| GenerationError::from_transport("Ollama", error))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected(format!(
                "Ollama model '{}' not found: {body}",
                self.model
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::from_status("Ollama", status, &body));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::from_transport("Ollama", error))?;
        if !parsed.done {
            return Err(GenerationError::InvalidResponse(
                "Ollama returned an incomplete response".to_string(),
            ));
        }
        let answer = parsed
            .message
            .map(|message| message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidResponse("Ollama returned an empty message".to_string())
            })?;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "Context:\nThe warranty lasts two years.".into(),
            user_message: "How long is the warranty?".into(),
            passages: vec!["The warranty lasts two years.".into()],
        }
    }

    fn model(server: &MockServer) -> OllamaChatModel {
        OllamaChatModel::new(
            &server.base_url(),
            "llama3.1".into(),
            Some(0.1),
            Duration::from_secs(5),
        )
        .expect("model")
    }

    #[tokio::test]
    async fn returns_message_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/chat")
                    .json_body_partial(r#"{"model":"llama3.1","stream":false}"#);
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "Two years." },
                    "done": true
                }));
            })
            .await;

        let answer = model(&server).generate(request()).await.expect("answer");
        mock.assert_async().await;
        assert_eq!(answer, "Two years.");
    }

    #[tokio::test]
    async fn missing_model_is_rejected() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(404).body("model not found");
            })
            .await;

        let error = model(&server).generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::Rejected(_)));
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn incomplete_response_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).json_body(json!({
                    "message": { "role": "assistant", "content": "Two" },
                    "done": false
                }));
            })
            .await;

        let error = model(&server).generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn unreachable_runtime_is_retryable() {
        let model = OllamaChatModel::new(
            "http://127.0.0.1:9",
            "llama3.1".into(),
            None,
            Duration::from_millis(500),
        )
        .expect("model");
        let error = model.generate(request()).await.unwrap_err();
        assert!(error.is_retryable());
    }
}
