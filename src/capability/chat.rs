//! Remote chat primitive.
//!
//! Unlike the scoped capabilities, `chat` is gated on configuration alone:
//! it exists iff the broker was started with a complete chat endpoint
//! (base URL, credential, model). Requests use the OpenAI-compatible
//! `chat/completions` shape with a single user message.
//!
//! The classified overload unwraps a [`Classified`] payload, submits it,
//! and rewraps the reply, so a secret can transit the model without ever
//! being renderable inside the sandbox.

use std::time::Duration;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::classified::Classified;
use crate::config::ChatConfig;
use crate::error::{Result, SandboxError};

const CHAT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatCompletionMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// Client for the configured chat endpoint.
///
/// Constructed per broker from the frozen configuration; `None` endpoint
/// means every call fails with "not configured".
#[derive(Debug, Clone)]
pub struct ChatClient {
    config: Option<ChatConfig>,
}

impl ChatClient {
    pub fn new(config: Option<ChatConfig>) -> Self {
        Self { config }
    }

    /// Whether a complete endpoint is configured.
    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Submits `text` as a single user message and returns the assistant
    /// reply text.
    ///
    /// # Errors
    ///
    /// [`SandboxError::ChatNotConfigured`] when no endpoint is configured;
    /// [`SandboxError::Chat`] on transport or shape failures.
    pub fn chat(&self, text: &str) -> Result<String> {
        let config = self.config.as_ref().ok_or(SandboxError::ChatNotConfigured)?;

        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let request = ChatCompletionRequest {
            model: &config.model,
            messages: vec![ChatCompletionMessage {
                role: "user",
                content: text,
            }],
        };

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CHAT_TIMEOUT)
            .timeout(CHAT_TIMEOUT)
            .build()
            .map_err(|e| SandboxError::Chat(e.to_string()))?;

        let response = client
            .post(&url)
            .bearer_auth(config.api_key.expose_secret())
            .json(&request)
            .send()
            .map_err(|e| SandboxError::Chat(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SandboxError::Chat(format!(
                "endpoint returned {status}: {body}"
            )));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .map_err(|e| SandboxError::Chat(format!("malformed response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| SandboxError::Chat("response carried no message".to_string()))
    }

    /// Classified overload: unwrap, submit, rewrap.
    pub fn chat_classified(&self, text: Classified<String>) -> Result<Classified<String>> {
        let reply = self.chat(text.inner())?;
        // Consume the input so the secret does not linger in the caller.
        drop(text);
        Ok(Classified::new(reply))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured_chat_fails() {
        let client = ChatClient::new(None);
        let err = client.chat("hello").unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_unconfigured_classified_chat_fails() {
        let client = ChatClient::new(None);
        let err = client
            .chat_classified(Classified::new("secret".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }

    #[test]
    fn test_is_configured() {
        use secrecy::SecretString;
        assert!(!ChatClient::new(None).is_configured());
        let config = ChatConfig {
            base_url: "https://api.example.com/v1".to_string(),
            api_key: SecretString::new("sk-test".to_string()),
            model: "test-model".to_string(),
        };
        assert!(ChatClient::new(Some(config)).is_configured());
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = ChatCompletionRequest {
            model: "test-model",
            messages: vec![ChatCompletionMessage {
                role: "user",
                content: "hi",
            }],
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_response_parsing() {
        let json = r#"{"choices":[{"message":{"role":"assistant","content":"hello there"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("hello there")
        );
    }
}
