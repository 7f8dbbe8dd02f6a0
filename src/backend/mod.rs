//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over the generative service, translating
//! between normalized [`LlmRequest`]/[`LlmResponse`] (text) and
//! [`ImageRequest`]/[`ImageData`] (thumbnails) and a provider's HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! outline / unit ──► LlmRequest ───► Backend::complete() ──────► LlmResponse
//! thumbnail ───────► ImageRequest ─► Backend::generate_image() ─► Option<ImageData>
//!                                          │
//!                               ┌──────────┴──────────┐
//!                         GeminiBackend           MockBackend
//!                   models/{m}:generateContent   scripted replies
//! ```
//!
//! Backends do no retrying of their own. Retry, deadlines, and cancellation
//! are applied by the caller through [`ExecCtx`](crate::exec_ctx::ExecCtx).

pub mod gemini;
pub mod mock;

pub use gemini::GeminiBackend;
pub use mock::{MockBackend, MockReply};

use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

/// Generation parameters for text calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Ask the provider for a JSON response body.
    pub json_mode: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 8192,
            json_mode: true,
        }
    }
}

impl LlmConfig {
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    pub fn with_json_mode(mut self, enabled: bool) -> Self {
        self.json_mode = enabled;
        self
    }
}

/// A normalized text-generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"gemini-3-flash-preview"`).
    pub model: String,

    /// Optional system instruction.
    pub system_prompt: Option<String>,

    /// The user prompt text.
    pub prompt: String,

    /// Generation parameters.
    pub config: LlmConfig,
}

/// A normalized text-generation response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text, untrusted and possibly truncated.
    pub text: String,

    /// HTTP status code (for diagnostics/logging).
    pub status: u16,

    /// Provider-specific metadata (token counts, finish reason).
    pub metadata: Option<serde_json::Value>,
}

/// A normalized image-generation request.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub model: String,
    pub prompt: String,
}

/// Inline image returned by the image model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// MIME type, e.g. `image/png`.
    pub mime_type: String,
    /// Base64-encoded bytes, as delivered by the provider.
    pub data_base64: String,
}

/// Abstraction over generative-service providers.
///
/// Built-in implementations: [`GeminiBackend`], [`MockBackend`].
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one text-generation call.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Execute one image-generation call.
    ///
    /// `Ok(None)` means the provider answered successfully but without any
    /// image part.
    async fn generate_image(
        &self,
        client: &Client,
        base_url: &str,
        request: &ImageRequest,
    ) -> Result<Option<ImageData>>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_config_builders() {
        let config = LlmConfig::default()
            .with_temperature(0.2)
            .with_max_tokens(1024)
            .with_json_mode(false);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.max_tokens, 1024);
        assert!(!config.json_mode);
    }
}
