use super::{ChatModel, Completion, CompletionRequest, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

pub struct OpenAiChatClient {
    base_url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiChatClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        info!("Chat model client initialized for {}", base_url);
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http_client,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatModel for OpenAiChatClient {
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
        debug!("Requesting completion from {} with {} turns", request.model, request.turns.len());
        let body = ChatCompletionRequest {
            model: &request.model,
            messages: &request.turns,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Model request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Model API returned {}: {}", status, body));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to parse model response: {}", e))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("Model response contained no message content"))?;
        let total_tokens = completion.usage.map(|u| u.total_tokens).unwrap_or(0);

        Ok(Completion {
            text: text.trim().to_string(),
            total_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;
    use mockito::Matcher;

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-3.5-turbo".into(),
            turns: vec![
                Turn::new(Role::System, "be brief"),
                Turn::new(Role::User, "hi"),
            ],
            max_tokens: 500,
            temperature: 0.7,
        }
    }

    fn client(url: &str) -> OpenAiChatClient {
        OpenAiChatClient::new(url, "sk-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn parses_successful_completion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "gpt-3.5-turbo",
                "max_tokens": 500,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"  Hello there!\n"}}],"usage":{"total_tokens":37}}"#)
            .create_async()
            .await;

        let completion = client(&server.url()).complete(request()).await.unwrap();
        assert_eq!(completion.text, "Hello there!");
        assert_eq!(completion.total_tokens, 37);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn http_error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"quota exceeded"}}"#)
            .create_async()
            .await;

        let err = client(&server.url()).complete(request()).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn malformed_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;
        assert!(client(&server.url()).complete(request()).await.is_err());

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;
        assert!(client(&server.url()).complete(request()).await.is_err());
    }
}
