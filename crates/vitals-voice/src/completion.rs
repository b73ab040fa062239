//! Reply generation through an OpenAI-compatible chat completion service.
//!
//! `respond` never fails: a timeout or any other failure becomes a fixed apology.

use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const TIMEOUT_REPLY: &str = "The request timed out. Please try again.";

pub const ERROR_REPLY: &str = "AI error: Please try again later.";

pub const DEFAULT_COMPLETION_URL: &str = "https://api.deepinfra.com/v1/openai/chat/completions";

pub const DEFAULT_COMPLETION_MODEL: &str = "meta-llama/Meta-Llama-3-8B-Instruct";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a medical assistant.";

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request timed out")]
    Timeout,

    #[error("completion transport error: {0}")]
    Transport(String),

    #[error("completion service answered {0}")]
    Status(u16),

    #[error("completion response had no message content")]
    Malformed,
}

impl From<reqwest::Error> for CompletionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CompletionError::Timeout
        } else {
            CompletionError::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    pub completion_url: String,
    pub completion_model: String,
    pub completion_timeout_secs: u64,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            completion_url: DEFAULT_COMPLETION_URL.to_string(),
            completion_model: DEFAULT_COMPLETION_MODEL.to_string(),
            completion_timeout_secs: 15,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletionClient {
    settings: CompletionSettings,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl CompletionClient {
    pub fn new(settings: CompletionSettings, api_key: Option<String>) -> Result<Self, CompletionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.completion_timeout_secs))
            .build()?;
        Ok(Self {
            settings,
            api_key,
            client,
        })
    }

    /// Key from `COMPLETION_API_KEY`, falling back to `OPENROUTER_API_KEY`.
    pub fn from_env(settings: CompletionSettings) -> Result<Self, CompletionError> {
        let api_key = std::env::var("COMPLETION_API_KEY")
            .or_else(|_| std::env::var("OPENROUTER_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!(target: "vitals::voice", "no completion API key set; requests go out unauthenticated");
        }
        Self::new(settings, api_key)
    }

    /// Ask the service for a reply to `user_text`.
    pub async fn complete(&self, user_text: &str) -> Result<String, CompletionError> {
        let body = json!({
            "model": self.settings.completion_model,
            "messages": [
                { "role": "system", "content": self.settings.system_prompt },
                { "role": "user", "content": user_text },
            ],
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
        });
        let mut req = self.client.post(&self.settings.completion_url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req.send().await?;
        if !res.status().is_success() {
            return Err(CompletionError::Status(res.status().as_u16()));
        }
        let json: serde_json::Value = res.json().await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or(CompletionError::Malformed)
    }

    /// Reply text, or the fixed apology when the service cannot answer.
    pub async fn respond(&self, user_text: &str) -> String {
        match self.complete(user_text).await {
            Ok(reply) => {
                debug!(target: "vitals::voice", chars = reply.len(), "reply generated");
                reply
            }
            Err(CompletionError::Timeout) => {
                warn!(target: "vitals::voice", "completion timed out");
                TIMEOUT_REPLY.to_string()
            }
            Err(e) => {
                warn!(target: "vitals::voice", error = %e, "completion failed");
                ERROR_REPLY.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one connection: reads the request head, then replies after `delay`.
    async fn serve_once(status: &'static str, body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let _ = sock.read(&mut buf).await;
            tokio::time::sleep(delay).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = sock.write_all(response.as_bytes()).await;
        });
        url
    }

    fn client(url: String, timeout_secs: u64) -> CompletionClient {
        let settings = CompletionSettings {
            completion_url: url,
            completion_timeout_secs: timeout_secs,
            ..Default::default()
        };
        CompletionClient::new(settings, Some("test-key".into())).unwrap()
    }

    #[tokio::test]
    async fn returns_message_content() {
        let url = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"Stay hydrated."}}]}"#,
            Duration::ZERO,
        )
        .await;
        assert_eq!(client(url, 5).respond("I feel dizzy").await, "Stay hydrated.");
    }

    #[tokio::test]
    async fn timeout_yields_timeout_reply() {
        let url = serve_once("200 OK", "{}", Duration::from_secs(3)).await;
        assert_eq!(client(url, 1).respond("hello").await, TIMEOUT_REPLY);
    }

    #[tokio::test]
    async fn error_status_yields_error_reply() {
        let url = serve_once("503 Service Unavailable", "{}", Duration::ZERO).await;
        assert_eq!(client(url, 5).respond("hello").await, ERROR_REPLY);
    }

    #[tokio::test]
    async fn malformed_body_yields_error_reply() {
        let url = serve_once("200 OK", r#"{"choices":[]}"#, Duration::ZERO).await;
        assert_eq!(client(url, 5).respond("hello").await, ERROR_REPLY);
    }
}
