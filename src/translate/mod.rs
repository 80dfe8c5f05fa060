//! Translation pipeline: request/response types, the backend capability,
//! and the building blocks the service composes (cache, normalize, race).

pub mod cache;
pub mod http;
pub mod languages;
pub mod mock;
pub mod normalize;
pub mod prompt;
pub mod race;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sentinel source language resolved by the detector.
pub const AUTO_LANG: &str = "auto";

/// Inbound translation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    /// Caller tag echoed in the response; replies may arrive out of order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub text: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
    pub target_lang: String,
}

fn default_source_lang() -> String {
    AUTO_LANG.to_string()
}

impl TranslationRequest {
    pub fn new(text: impl Into<String>, source_lang: &str, target_lang: &str) -> Self {
        Self {
            id: None,
            text: text.into(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
        }
    }
}

/// Where a served translation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServedVia {
    FullCache,
    Reconstructed,
    Backend,
}

/// Outbound response. Failures are values, never panics or transport errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslationResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_language_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_language_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_from: Option<ServedVia>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranslationResponse {
    pub fn failure(error: &TranslateError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// Request-boundary failures with stable user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranslateError {
    #[error("empty text")]
    EmptyText,
    #[error("text too long ({len} characters, maximum {max})")]
    TooLong { len: usize, max: usize },
    #[error("translation unavailable")]
    Unavailable,
}

/// Faults of a single backend call. Always absorbed by the coordinator.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend timeout after {0:?}")]
    Timeout(Duration),
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty response")]
    EmptyResponse,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Text-generation capability. Implementations may be slow, fail, or return junk.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Identifier used in logs (model or provider name).
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String, BackendError>;
}
