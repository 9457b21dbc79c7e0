//! OpenAI-compatible `/chat/completions` client.

use super::{ChatModel, GenerationError, GenerationRequest};
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat completions against OpenAI or an API-compatible host.
pub struct OpenAiChatModel {
    http: Client,
    endpoint: String,
    model: String,
    temperature: Option<f32>,
}

impl OpenAiChatModel {
    /// Build a client. An empty API key is a configuration error.
    pub fn new(
        api_key: String,
        base_url: &str,
        model: String,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        if api_key.trim().is_empty() {
            return Err(GenerationError::Configuration(
                "missing OpenAI API key".to_string(),
            ));
        }
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| GenerationError::Configuration("invalid OpenAI API key".to_string()))?;
        headers.insert(AUTHORIZATION, auth);
        let http = Client::builder()
            .user_agent("pdf-rag/chat")
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|error| {
                GenerationError::Configuration(format!("failed to build HTTP client: {error}"))
            })?;

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            temperature,
        })
    }
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: [
                Message {
                    role: "system",
                    content: &request.system_prompt,
                },
                Message {
                    role: "user",
                    content: &request.user_message,
                },
            ],
            temperature: self.temperature,
        };
        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|error| GenerationError::from_transport("OpenAI", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::from_status("OpenAI", status, &body));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|error| GenerationError::from_transport("OpenAI", error))?;
        let answer = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| {
                GenerationError::InvalidResponse("OpenAI returned no message content".to_string())
            })?;
        tracing::debug!(model = %self.model, chars = answer.len(), "OpenAI completion received");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn model(server: &MockServer) -> OpenAiChatModel {
        OpenAiChatModel::new(
            "sk-test".into(),
            &server.base_url(),
            "gpt-4o-mini".into(),
            Some(0.2),
            Duration::from_secs(5),
        )
        .expect("model")
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system_prompt: "Context:\nRefunds take 30 days.".into(),
            user_message: "How long do refunds take?".into(),
            passages: vec!["Refunds take 30 days.".into()],
        }
    }

    #[tokio::test]
    async fn sends_system_and_user_messages() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .json_body_partial(
                        r#"{
                            "model": "gpt-4o-mini",
                            "messages": [
                                {"role": "system", "content": "Context:\nRefunds take 30 days."},
                                {"role": "user", "content": "How long do refunds take?"}
                            ]
                        }"#,
                    );
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "role": "assistant", "content": " 30 days. " } }]
                }));
            })
            .await;

        let answer = model(&server).generate(request()).await.expect("answer");
        mock.assert_async().await;
        assert_eq!(answer, "30 days.");
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(502).body("bad gateway");
            })
            .await;

        let error = model(&server).generate(request()).await.unwrap_err();
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn empty_choices_are_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [] }));
            })
            .await;

        let error = model(&server).generate(request()).await.unwrap_err();
        assert!(matches!(error, GenerationError::InvalidResponse(_)));
    }

    #[test]
    fn missing_key_is_rejected_up_front() {
        let result = OpenAiChatModel::new(
            String::new(),
            "https://api.openai.com/v1",
            "gpt-4o-mini".into(),
            None,
            Duration::from_secs(1),
        );
        assert!(matches!(result, Err(GenerationError::Configuration(_))));
    }
}
