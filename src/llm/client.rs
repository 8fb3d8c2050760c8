//! OpenRouter HTTP client.
//!
//! Plain reqwest with an explicit 60-second timeout. No retry middleware:
//! a 429 must fail upward so the pool can apply its cooldown instead of the
//! transport hammering the provider.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::LlmError;

const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatEnvelope {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pricing: Option<ModelPricing>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPricing {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub completion: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsEnvelope {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[derive(Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    base_url: String,
}

impl OpenRouterClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CHAT_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    fn map_status(status: reqwest::StatusCode, body: String) -> LlmError {
        match status.as_u16() {
            401 => LlmError::InvalidKey,
            429 => LlmError::RateLimited,
            code => LlmError::Provider {
                status: code,
                message: truncate(&body, 300),
            },
        }
    }

    fn map_transport(e: reqwest::Error) -> LlmError {
        LlmError::Network(e.to_string())
    }

    /// Chat completion. The only contract on the response is that the top
    /// choice's message content is the text we want.
    pub async fn chat(
        &self,
        api_key: &str,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f64>,
        max_tokens: Option<u32>,
    ) -> Result<String, LlmError> {
        let mut body = json!({
            "model": model,
            "messages": messages,
        });
        if let Some(t) = temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = max_tokens {
            body["max_tokens"] = json!(m);
        }

        let value = self.chat_raw(api_key, &body).await?;
        let envelope: ChatEnvelope =
            serde_json::from_value(value).map_err(|e| LlmError::Parse(e.to_string()))?;
        envelope
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LlmError::Parse("response carried no message content".into()))
    }

    /// Pass a caller-assembled body through untouched and return the
    /// provider's JSON as-is. Backs the proxy endpoint.
    pub async fn chat_raw(
        &self,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value, LlmError> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, text));
        }

        resp.json().await.map_err(|e| LlmError::Parse(e.to_string()))
    }

    /// Minimal "list models" call; also serves as the key-validation probe.
    pub async fn list_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, LlmError> {
        let resp = self
            .http
            .get(format!("{}/models", self.base_url))
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(Self::map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(Self::map_status(status, text));
        }

        let envelope: ModelsEnvelope = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(envelope.data)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_returns_top_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(bearer_token("sk-or-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [
                    {"message": {"role": "assistant", "content": "SCRIPT TEXT"}},
                    {"message": {"role": "assistant", "content": "ignored"}}
                ]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri());
        let text = client
            .chat("sk-or-test", "x/y", &[ChatMessage::user("hi")], None, None)
            .await
            .unwrap();
        assert_eq!(text, "SCRIPT TEXT");
    }

    #[tokio::test]
    async fn status_codes_map_to_typed_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri());
        let err = client
            .chat("sk-or-test", "x/y", &[ChatMessage::user("hi")], None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[tokio::test]
    async fn list_models_parses_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [
                    {"id": "a/b", "name": "AB", "pricing": {"prompt": "0", "completion": "0"}},
                    {"id": "c/d"}
                ]
            })))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri());
        let models = client.list_models("sk-or-test").await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "a/b");
        assert!(models[1].pricing.is_none());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_invalid_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = OpenRouterClient::new(server.uri());
        let err = client.list_models("sk-or-bad").await.unwrap_err();
        assert!(matches!(err, LlmError::InvalidKey));
    }
}
