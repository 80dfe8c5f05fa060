//! OpenAI-compatible chat/completions backend.
//! Connection pooling via reqwest, simple min-interval rate limiting,
//! bounded retry on 429 / 5xx. One instance per model.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Backend, BackendError};
use crate::config::{BackendSection, ConfigError};

const MAX_429_RETRIES: u32 = 2;
const MAX_5XX_RETRIES: u32 = 1;

/// Race candidates plus the designated fallback backend.
pub struct BackendSet {
    pub candidates: Vec<Arc<dyn Backend>>,
    pub fallback: Arc<dyn Backend>,
}

/// A single model behind a chat/completions endpoint.
pub struct ChatBackend {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    /// Next instant a request may be sent.
    next_allowed: tokio::sync::Mutex<Instant>,
    min_interval: Duration,
}

impl ChatBackend {
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        api_key: &str,
        model: &str,
        min_interval: Duration,
    ) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            next_allowed: tokio::sync::Mutex::new(Instant::now()),
            min_interval,
        }
    }

    /// Shared pooled client for every model.
    pub fn build_client() -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))
    }

    /// Build one backend per configured model. The API key comes from the
    /// environment variable named in the config.
    pub fn from_config(section: &BackendSection) -> Result<BackendSet, ConfigError> {
        let api_key = std::env::var(&section.api_key_env)
            .map_err(|_| ConfigError::MissingApiKey(section.api_key_env.clone()))?;
        Self::with_api_key(section, &api_key)
    }

    /// Same as [`ChatBackend::from_config`] with an explicit key.
    pub fn with_api_key(section: &BackendSection, api_key: &str) -> Result<BackendSet, ConfigError> {
        let http = Self::build_client()?;
        let min_interval = Duration::from_millis(section.min_interval_ms);
        let make = |model: &str| -> Arc<dyn Backend> {
            Arc::new(Self::new(http.clone(), &section.base_url, api_key, model, min_interval))
        };

        let candidates: Vec<Arc<dyn Backend>> = section.models.iter().map(|m| make(m.as_str())).collect();
        let fallback = candidates
            .iter()
            .find(|b| b.name() == section.fallback_model)
            .cloned()
            .unwrap_or_else(|| make(section.fallback_model.as_str()));
        Ok(BackendSet {
            candidates,
            fallback,
        })
    }

    /// Wait until the rate limiter allows a request.
    async fn rate_limit_wait(&self) {
        let mut next = self.next_allowed.lock().await;
        let now = Instant::now();
        if *next > now {
            tokio::time::sleep(*next - now).await;
        }
        *next = Instant::now() + self.min_interval;
    }

    /// 429: Retry-After or 1s/2s. 5xx: one retry after 500ms. Other statuses fail.
    async fn send_with_retry(
        &self,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<reqwest::Response, BackendError> {
        let mut attempt: u32 = 0;
        loop {
            let result = self
                .http
                .post(format!("{}/v1/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .timeout(timeout)
                .json(body)
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if resp.status().as_u16() == 429 => {
                    let wait = resp
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| Duration::from_secs(1 << attempt));
                    if attempt >= MAX_429_RETRIES {
                        return Err(BackendError::RateLimited {
                            retry_after_ms: wait.as_millis() as u64,
                        });
                    }
                    warn!(model = %self.model, attempt, wait_ms = wait.as_millis() as u64, "429 rate limited, retrying");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Ok(resp) if resp.status().is_server_error() && attempt < MAX_5XX_RETRIES => {
                    warn!(model = %self.model, attempt, status = resp.status().as_u16(), "5xx error, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * (1 << attempt))).await;
                    attempt += 1;
                }
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    let body_text = resp.text().await.unwrap_or_default();
                    return Err(BackendError::Status {
                        status,
                        body: body_text.chars().take(200).collect(),
                    });
                }
                Err(e) if e.is_timeout() => return Err(BackendError::Timeout(timeout)),
                Err(e) => return Err(BackendError::Transport(e.to_string())),
            }
        }
    }
}

#[async_trait]
impl Backend for ChatBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, BackendError> {
        self.rate_limit_wait().await;
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.1,
            "stream": false
        });
        let start = Instant::now();
        let response = self.send_with_retry(&body, timeout).await?;
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let content = extract_content(&text)?;
        debug!(
            model = %self.model,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = content.chars().count(),
            "completion received"
        );
        Ok(content)
    }
}

/// Pull `choices[0].message.content` out of a completion body.
fn extract_content(body: &str) -> Result<String, BackendError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default();
    if content.trim().is_empty() {
        return Err(BackendError::EmptyResponse);
    }
    Ok(content.trim().to_string())
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
