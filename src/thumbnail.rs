//! Course thumbnail generation.
//!
//! The image model is tried first under the thumbnail retry policy. When it
//! keeps failing, or answers without image data, the thumbnail becomes a URL
//! on the public prompt-to-image service instead, so a missing image never
//! fails a build on its own.

use crate::config::FallbackImageSettings;
use crate::error::{PipelineError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::prompt::{fallback_image_prompt, thumbnail_prompt};
use crate::retry::{with_retry, RetryNotice};
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Exclusive upper bound of the fallback image seed.
const SEED_RANGE: u32 = 100_000;

/// A course thumbnail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Thumbnail {
    /// Bytes returned by the image model, base64-encoded.
    Inline { mime_type: String, data: String },
    /// A URL on the fallback image service.
    Remote { url: String },
}

impl Thumbnail {
    /// The value stored as the course's `thumbnail_url`.
    pub fn to_uri(&self) -> String {
        match self {
            Thumbnail::Inline { mime_type, data } => format!("data:{};base64,{}", mime_type, data),
            Thumbnail::Remote { url } => url.clone(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Thumbnail::Remote { .. })
    }
}

/// Generate a thumbnail for `topic`.
///
/// Returns the thumbnail and whether it came from the fallback service.
/// Fails only on cancellation, rejected credentials, or an unusable
/// fallback configuration.
pub async fn generate_thumbnail(ctx: &ExecCtx, topic: &str) -> Result<(Thumbnail, bool)> {
    let prompt = thumbnail_prompt(topic);

    let mut on_retry = |notice: &RetryNotice<'_>| ctx.notify_retry(notice);
    let generated = with_retry(
        "thumbnail",
        &ctx.settings.thumbnail_retry,
        &ctx.cancellation,
        Some(&mut on_retry),
        |_attempt| {
            let prompt = prompt.clone();
            async move {
                ctx.call_image("thumbnail", prompt)
                    .await?
                    .ok_or(PipelineError::NoImageData)
            }
        },
    )
    .await;

    match generated {
        Ok(image) => {
            tracing::info!(topic, mime_type = %image.mime_type, "thumbnail generated");
            Ok((
                Thumbnail::Inline {
                    mime_type: image.mime_type,
                    data: image.data_base64,
                },
                false,
            ))
        }
        Err(err) if matches!(err, PipelineError::Cancelled) || err.requires_reauth() => Err(err),
        Err(err) => {
            tracing::warn!(topic, error = %err, "image model failed, using fallback image service");
            ctx.emit(Event::ThumbnailFallback {
                reason: err.to_string(),
            });
            let seed = fastrand::u32(0..SEED_RANGE);
            let url = fallback_image_url(&ctx.settings.fallback_image, topic, seed)?;
            Ok((Thumbnail::Remote { url }, true))
        }
    }
}

/// URL of a fallback image for `topic` on the prompt-to-image service.
///
/// # Example
///
/// ```
/// use curriculum_forge::config::FallbackImageSettings;
/// use curriculum_forge::thumbnail::fallback_image_url;
///
/// let url = fallback_image_url(&FallbackImageSettings::default(), "Hydraulics", 7).unwrap();
/// assert!(url.starts_with("https://image.pollinations.ai/prompt/Professional%20industrial"));
/// assert!(url.ends_with("?width=1280&height=720&seed=7&nologo=true&model=flux"));
/// ```
pub fn fallback_image_url(
    settings: &FallbackImageSettings,
    topic: &str,
    seed: u32,
) -> Result<String> {
    let mut url = Url::parse(&settings.base_url).map_err(|e| {
        PipelineError::InvalidConfig(format!("fallback image base URL '{}': {}", settings.base_url, e))
    })?;
    url.path_segments_mut()
        .map_err(|_| {
            PipelineError::InvalidConfig(format!(
                "fallback image base URL '{}' cannot take a path",
                settings.base_url
            ))
        })?
        .pop_if_empty()
        .push("prompt")
        .push(&fallback_image_prompt(topic));
    url.query_pairs_mut()
        .append_pair("width", &settings.width.to_string())
        .append_pair("height", &settings.height.to_string())
        .append_pair("seed", &seed.to_string())
        .append_pair("nologo", "true")
        .append_pair("model", &settings.model);
    Ok(url.into())
}
