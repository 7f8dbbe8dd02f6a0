//! Backend for the Gemini `generateContent` API.
//!
//! [`GeminiBackend`] translates normalized [`LlmRequest`]s and
//! [`ImageRequest`]s into `POST {base}/v1beta/models/{model}:generateContent`
//! calls, authenticated with the `x-goog-api-key` header.

use super::{Backend, ImageData, ImageRequest, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// Default service root for [`GeminiBackend`].
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Backend for the Gemini API.
///
/// Text calls read the concatenated `text` parts of the first candidate.
/// Image calls read the first `inlineData` part.
#[derive(Clone)]
pub struct GeminiBackend {
    api_key: String,
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl GeminiBackend {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }

    /// Read the key from `GEMINI_API_KEY`, falling back to `API_KEY`.
    pub fn from_env() -> Result<Self> {
        std::env::var("GEMINI_API_KEY")
            .or_else(|_| std::env::var("API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(Self::new)
            .ok_or_else(|| {
                PipelineError::InvalidConfig(
                    "no API key: set GEMINI_API_KEY or API_KEY".to_string(),
                )
            })
    }

    fn endpoint(base_url: &str, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            base_url.trim_end_matches('/'),
            model
        )
    }

    /// Build the JSON body for a text call.
    fn build_text_body(request: &LlmRequest) -> Value {
        let mut generation = json!({
            "temperature": request.config.temperature,
            "maxOutputTokens": request.config.max_tokens,
        });
        if request.config.json_mode {
            generation["responseMimeType"] = json!("application/json");
        }

        let mut body = json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": generation,
        });
        if let Some(ref sys) = request.system_prompt {
            if !sys.is_empty() {
                body["systemInstruction"] = json!({"parts": [{"text": sys}]});
            }
        }
        body
    }

    /// Build the JSON body for an image call.
    fn build_image_body(request: &ImageRequest) -> Value {
        json!({
            "contents": [{"role": "user", "parts": [{"text": request.prompt}]}],
            "generationConfig": {"responseModalities": ["TEXT", "IMAGE"]},
        })
    }

    /// Parse a Retry-After header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    async fn send_request(&self, client: &Client, url: &str, body: &Value) -> Result<(Value, u16)> {
        let resp = client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = resp.status().as_u16();

        if !resp.status().is_success() {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status,
                body: text,
                retry_after,
            });
        }

        let json_resp: Value = resp.json().await?;
        Ok((json_resp, status))
    }

    fn candidate_parts(json_resp: &Value) -> &[Value] {
        json_resp
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .map(|p| p.as_slice())
            .unwrap_or(&[])
    }

    fn extract_text(json_resp: &Value) -> String {
        Self::candidate_parts(json_resp)
            .iter()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect()
    }

    fn extract_image(json_resp: &Value) -> Option<ImageData> {
        Self::candidate_parts(json_resp).iter().find_map(|part| {
            let inline = part.get("inlineData")?;
            let data = inline.get("data")?.as_str()?;
            if data.is_empty() {
                return None;
            }
            let mime_type = inline
                .get("mimeType")
                .and_then(|m| m.as_str())
                .unwrap_or("image/png");
            Some(ImageData {
                mime_type: mime_type.to_string(),
                data_base64: data.to_string(),
            })
        })
    }

    fn extract_metadata(json_resp: &Value) -> Option<Value> {
        let mut meta = serde_json::Map::new();
        if let Some(v) = json_resp.get("usageMetadata") {
            meta.insert("usage".into(), v.clone());
        }
        if let Some(v) = json_resp.pointer("/candidates/0/finishReason") {
            meta.insert("finish_reason".into(), v.clone());
        }
        if let Some(v) = json_resp.get("modelVersion") {
            meta.insert("model".into(), v.clone());
        }
        if meta.is_empty() {
            None
        } else {
            Some(Value::Object(meta))
        }
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = Self::endpoint(base_url, &request.model);
        let body = Self::build_text_body(request);
        let (json_resp, status) = self.send_request(client, &url, &body).await?;

        let metadata = Self::extract_metadata(&json_resp);
        if metadata
            .as_ref()
            .and_then(|m| m.get("finish_reason"))
            .and_then(|r| r.as_str())
            == Some("MAX_TOKENS")
        {
            tracing::debug!(model = %request.model, "response stopped at max tokens");
        }

        Ok(LlmResponse {
            text: Self::extract_text(&json_resp),
            status,
            metadata,
        })
    }

    async fn generate_image(
        &self,
        client: &Client,
        base_url: &str,
        request: &ImageRequest,
    ) -> Result<Option<ImageData>> {
        let url = Self::endpoint(base_url, &request.model);
        let body = Self::build_image_body(request);
        let (json_resp, _) = self.send_request(client, &url, &body).await?;
        Ok(Self::extract_image(&json_resp))
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
