//! Pipeline tunables.
//!
//! [`PipelineSettings`] gathers every knob the generation pipeline reads:
//! models, unit count, retry policies, cooldowns, deadlines, and the
//! fallback image service. Every field has a default, so a partial JSON or
//! YAML document only needs to name what it overrides. Durations are
//! serialized as milliseconds.

use crate::backend::LlmConfig;
use crate::error::{PipelineError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest outline the pipeline will build.
pub const MAX_UNITS: usize = 25;

/// Serde adapter storing a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Public prompt-to-image service used when the image model fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackImageSettings {
    /// Service root; the prompt is appended as `/prompt/{encoded}`.
    pub base_url: String,
    pub width: u32,
    pub height: u32,
    /// Model name passed through as the `model` query parameter.
    pub model: String,
}

impl Default for FallbackImageSettings {
    fn default() -> Self {
        Self {
            base_url: "https://image.pollinations.ai".to_string(),
            width: 1280,
            height: 720,
            model: "flux".to_string(),
        }
    }
}

/// Settings for one pipeline deployment.
///
/// # Example
///
/// ```
/// use curriculum_forge::config::PipelineSettings;
///
/// let settings = PipelineSettings::from_json_str(r#"{"unit_count": 5, "inter_unit_cooldown_ms": 0}"#).unwrap();
/// assert_eq!(settings.unit_count, 5);
/// assert_eq!(settings.unit_attempts, 3);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Text model used for outlines and unit content.
    pub text_model: String,
    /// Image model used for thumbnails.
    pub image_model: String,
    /// Units requested from the outline call (clamped to 1..=25).
    pub unit_count: usize,
    /// Generation parameters for text calls.
    pub generation: LlmConfig,

    pub outline_retry: RetryPolicy,
    pub unit_retry: RetryPolicy,
    pub thumbnail_retry: RetryPolicy,

    /// Unit-level attempts wrapped around `unit_retry` before falling back.
    pub unit_attempts: u32,

    /// Pause between successive unit requests (not before the first).
    #[serde(rename = "inter_unit_cooldown_ms", with = "duration_ms")]
    pub inter_unit_cooldown: Duration,

    /// Pause before a unit-level retry. Longer than the inter-unit cooldown.
    #[serde(rename = "unit_retry_cooldown_ms", with = "duration_ms")]
    pub unit_retry_cooldown: Duration,

    /// Deadline applied to every individual service call.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,

    pub fallback_image: FallbackImageSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            text_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-3-pro-image-preview".to_string(),
            unit_count: 12,
            generation: LlmConfig::default(),
            outline_retry: RetryPolicy::outline(),
            unit_retry: RetryPolicy::unit(),
            thumbnail_retry: RetryPolicy::thumbnail(),
            unit_attempts: 3,
            inter_unit_cooldown: Duration::from_millis(4000),
            unit_retry_cooldown: Duration::from_millis(8000),
            request_timeout: Duration::from_secs(120),
            fallback_image: FallbackImageSettings::default(),
        }
    }
}

impl PipelineSettings {
    /// Parse settings from JSON and validate them.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from YAML and validate them.
    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let settings: Self = serde_yaml::from_str(text)
            .map_err(|e| PipelineError::InvalidConfig(format!("YAML settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Drop all delays. Meant for tests and dry runs against a mock backend.
    pub fn without_delays(mut self) -> Self {
        for policy in [
            &mut self.outline_retry,
            &mut self.unit_retry,
            &mut self.thumbnail_retry,
        ] {
            policy.base_delay = Duration::ZERO;
            policy.respect_retry_after = false;
        }
        self.inter_unit_cooldown = Duration::ZERO;
        self.unit_retry_cooldown = Duration::ZERO;
        self
    }

    /// Requested unit count, clamped to the supported range.
    pub fn effective_unit_count(&self) -> usize {
        self.unit_count.clamp(1, MAX_UNITS)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, policy) in [
            ("outline_retry", &self.outline_retry),
            ("unit_retry", &self.unit_retry),
            ("thumbnail_retry", &self.thumbnail_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}.max_attempts must be at least 1",
                    name
                )));
            }
        }
        if self.unit_attempts == 0 {
            return Err(PipelineError::InvalidConfig(
                "unit_attempts must be at least 1".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PipelineError::InvalidConfig(
                "request_timeout_ms must be positive".into(),
            ));
        }
        if self.fallback_image.width == 0 || self.fallback_image.height == 0 {
            return Err(PipelineError::InvalidConfig(
                "fallback_image width and height must be positive".into(),
            ));
        }
        reqwest::Url::parse(&self.fallback_image.base_url).map_err(|e| {
            PipelineError::InvalidConfig(format!(
                "fallback_image.base_url '{}': {}",
                self.fallback_image.base_url, e
            ))
        })?;
        if self.unit_retry_cooldown < self.inter_unit_cooldown {
            tracing::warn!(
                unit_retry_cooldown_ms = self.unit_retry_cooldown.as_millis() as u64,
                inter_unit_cooldown_ms = self.inter_unit_cooldown.as_millis() as u64,
                "unit retry cooldown is shorter than the inter-unit cooldown"
            );
        }
        Ok(())
    }
}
