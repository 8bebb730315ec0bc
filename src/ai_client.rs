//! LLM completion client
//!
//! The clustering pipeline only needs `complete(prompt) -> text`. The HTTP
//! implementation talks to any OpenAI-compatible chat completions endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{ClusterError, Result};
use crate::prompt::SYSTEM_PROMPT;
use crate::settings;

/// Text completion capability used by the batch scheduler
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send one prompt and return the model's reply text
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Fail early when the client cannot possibly succeed (e.g. no API key)
    fn check_ready(&self) -> Result<()> {
        Ok(())
    }
}

/// Parameters for the chat completions request
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub api_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: settings::DEFAULT_API_URL.to_string(),
            model: settings::DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 4000,
            request_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// OpenAI chat completions client
pub struct OpenAiClient {
    client: Client,
    api_key: Option<String>,
    config: LlmConfig,
    /// Tokens reported by the API since this client was created
    tokens_used: AtomicU64,
}

impl OpenAiClient {
    /// Create a client using the key from settings (env var first)
    pub fn from_settings(config: LlmConfig) -> Result<Self> {
        Self::new(settings::get_openai_api_key(), config)
    }

    pub fn new(api_key: Option<String>, config: LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ClusterError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            config,
            tokens_used: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Total tokens used by this client; callers persist it once per run
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }

    fn record_usage(&self, usage: Option<&Usage>) {
        if let Some(usage) = usage {
            self.tokens_used.fetch_add(usage.total_tokens, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn check_ready(&self) -> Result<()> {
        if self.api_key.is_some() {
            Ok(())
        } else {
            Err(ClusterError::MissingCredential)
        }
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let api_key = self.api_key.as_deref().ok_or(ClusterError::MissingCredential)?;

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        tracing::debug!("[LLM] POST {} ({} prompt chars)", self.config.api_url, prompt.len());

        let response = self
            .client
            .post(&self.config.api_url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ClusterError::Transport(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Transport(format!("API error {}: {}", status, body)));
        }

        let api_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClusterError::Transport(format!("Failed to parse response: {}", e)))?;

        self.record_usage(api_response.usage.as_ref());

        api_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClusterError::Format("No response from OpenAI".to_string()))
    }
}

/// Scripted client for pipeline tests
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct MockLlmClient {
        replies: Mutex<VecDeque<Result<String>>>,
        prompts: Mutex<Vec<String>>,
        ready: bool,
    }

    impl MockLlmClient {
        pub fn new(replies: Vec<Result<String>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                ready: true,
            }
        }

        /// Client whose credential check fails
        pub fn without_credential() -> Self {
            Self {
                ready: false,
                ..Self::new(Vec::new())
            }
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }

        pub fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        fn check_ready(&self) -> Result<()> {
            if self.ready {
                Ok(())
            } else {
                Err(ClusterError::MissingCredential)
            }
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(r#"{"clusters": []}"#.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_without_key_is_not_ready() {
        let client = OpenAiClient::new(None, LlmConfig::default()).unwrap();
        assert!(matches!(client.check_ready(), Err(ClusterError::MissingCredential)));

        let empty = OpenAiClient::new(Some(String::new()), LlmConfig::default()).unwrap();
        assert!(empty.check_ready().is_err());
    }

    #[test]
    fn test_client_with_key_is_ready() {
        let client = OpenAiClient::new(Some("sk-test".into()), LlmConfig::default()).unwrap();
        assert!(client.check_ready().is_ok());
        assert_eq!(client.config().model, "gpt-4");
    }

    #[tokio::test]
    async fn test_complete_without_key_fails_before_network() {
        let client = OpenAiClient::new(None, LlmConfig::default()).unwrap();
        let err = client.complete("hello").await.unwrap_err();
        assert!(matches!(err, ClusterError::MissingCredential));
    }

    #[test]
    fn test_token_usage_accumulates_per_client() {
        let client = OpenAiClient::new(Some("sk-test".into()), LlmConfig::default()).unwrap();
        assert_eq!(client.tokens_used(), 0);

        client.record_usage(Some(&Usage { total_tokens: 120 }));
        client.record_usage(None);
        client.record_usage(Some(&Usage { total_tokens: 30 }));
        assert_eq!(client.tokens_used(), 150);
    }

    #[test]
    fn test_chat_response_shape() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"clusters\":[]}"}}],"usage":{"total_tokens":42}}"#;
        let parsed: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.usage.unwrap().total_tokens, 42);
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some(r#"{"clusters":[]}"#));
    }
}
