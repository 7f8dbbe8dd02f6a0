//! Execution context shared across a build.
//!
//! [`ExecCtx`] carries the HTTP client, generative backend, endpoint,
//! pipeline settings, cancellation token, and optional event handler. It is
//! constructed once and shared by every stage of one or many builds.
//!
//! Every service call goes through [`ExecCtx::call_text`] or
//! [`ExecCtx::call_image`], which bound the call by the configured request
//! timeout and abandon it as soon as the token is cancelled.

use crate::backend::{Backend, GeminiBackend, ImageData, ImageRequest, LlmRequest, LlmResponse};
use crate::config::PipelineSettings;
use crate::error::{PipelineError, Result};
use crate::events::{emit, Event, EventHandler};
use crate::prompt::SYSTEM_PROMPT;
use crate::retry::RetryNotice;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shared execution context for a course build.
///
/// # Example
///
/// ```
/// use curriculum_forge::backend::MockBackend;
/// use curriculum_forge::config::PipelineSettings;
/// use curriculum_forge::ExecCtx;
/// use std::sync::Arc;
///
/// let ctx = ExecCtx::builder("http://localhost:8080")
///     .backend(Arc::new(MockBackend::fixed("{}")))
///     .settings(PipelineSettings::default().without_delays())
///     .build()
///     .unwrap();
/// assert!(!ctx.is_cancelled());
/// ```
pub struct ExecCtx {
    /// HTTP client (cheap to clone, uses `Arc` internally).
    pub client: Client,
    /// Service root passed to the backend.
    pub base_url: String,
    /// Generative backend. Default: [`GeminiBackend::from_env`].
    pub backend: Arc<dyn Backend>,
    pub settings: PipelineSettings,
    /// Honored at every service call, backoff sleep, and cooldown.
    pub cancellation: CancellationToken,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            settings: None,
            cancellation: None,
            event_handler: None,
            timeout: None,
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn emit(&self, event: Event) {
        emit(&self.event_handler, event);
    }

    /// Forward a retry notice to the event handler.
    pub(crate) fn notify_retry(&self, notice: &RetryNotice<'_>) {
        self.emit(Event::Retry {
            label: notice.label.to_string(),
            attempt: notice.next_attempt,
            max_attempts: notice.max_attempts,
            delay: notice.delay,
            class: notice.class,
            reason: notice.reason.clone(),
        });
    }

    /// Sleep for `delay`, returning early with [`PipelineError::Cancelled`]
    /// if the token fires first.
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        if delay.is_zero() {
            return self.check_cancelled();
        }
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Run one service call under the request deadline and the cancellation token.
    async fn guarded<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_cancelled()?;
        let deadline = self.settings.request_timeout;
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(PipelineError::Cancelled),
            outcome = tokio::time::timeout(deadline, call) => match outcome {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    operation: operation.to_string(),
                    after: deadline,
                }),
            },
        }
    }

    /// One text-generation call with the configured model and parameters.
    pub async fn call_text(&self, operation: &str, prompt: String) -> Result<LlmResponse> {
        let request = LlmRequest {
            model: self.settings.text_model.clone(),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            prompt,
            config: self.settings.generation.clone(),
        };
        tracing::debug!(
            operation,
            backend = self.backend.name(),
            model = %request.model,
            "text call"
        );
        self.guarded(
            operation,
            self.backend.complete(&self.client, &self.base_url, &request),
        )
        .await
    }

    /// One image-generation call with the configured image model.
    pub async fn call_image(&self, operation: &str, prompt: String) -> Result<Option<ImageData>> {
        let request = ImageRequest {
            model: self.settings.image_model.clone(),
            prompt,
        };
        tracing::debug!(
            operation,
            backend = self.backend.name(),
            model = %request.model,
            "image call"
        );
        self.guarded(
            operation,
            self.backend.generate_image(&self.client, &self.base_url, &request),
        )
        .await
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("settings", &self.settings)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    settings: Option<PipelineSettings>,
    cancellation: Option<CancellationToken>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the backend. Default: [`GeminiBackend::from_env`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Use the Gemini backend with an explicit key.
    pub fn gemini_with_key(mut self, api_key: impl Into<String>) -> Self {
        self.backend = Some(Arc::new(GeminiBackend::new(api_key)));
        self
    }

    /// Set the pipeline settings. Default: [`PipelineSettings::default`].
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Share a cancellation token with the caller. Default: a fresh token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Override the per-call deadline from the settings.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate the settings and build the execution context.
    pub fn build(self) -> Result<ExecCtx> {
        let mut settings = self.settings.unwrap_or_default();
        if let Some(timeout) = self.timeout {
            settings.request_timeout = timeout;
        }
        settings.validate()?;

        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()?,
        };
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(GeminiBackend::from_env()?),
        };

        Ok(ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend,
            settings,
            cancellation: self.cancellation.unwrap_or_default(),
            event_handler: self.event_handler,
        })
    }
}

/// Strip a trailing slash and a version path the backend appends itself.
/// e.g., "https://generativelanguage.googleapis.com/v1beta/" -> "https://generativelanguage.googleapis.com"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in &["/v1beta/models", "/v1beta", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, MockReply};
    use crate::retry::classify;
    use crate::retry::ErrorClass;

    fn ctx_with(mock: MockBackend) -> ExecCtx {
        ExecCtx::builder("http://unused")
            .backend(Arc::new(mock))
            .settings(PipelineSettings::default().without_delays())
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(
            normalize_base_url("https://generativelanguage.googleapis.com/v1beta/"),
            "https://generativelanguage.googleapis.com"
        );
        assert_eq!(normalize_base_url("http://localhost:8080/"), "http://localhost:8080");
        assert_eq!(normalize_base_url("http://proxy/v1"), "http://proxy");
    }

    #[test]
    fn invalid_settings_rejected_at_build() {
        let mut settings = PipelineSettings::default();
        settings.unit_attempts = 0;
        let result = ExecCtx::builder("http://unused")
            .backend(Arc::new(MockBackend::fixed("{}")))
            .settings(settings)
            .build();
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn call_text_passes_prompt_and_model() {
        let ctx = ctx_with(MockBackend::fixed("{\"titles\": []}"));
        let resp = ctx.call_text("outline", "hello".into()).await.unwrap();
        assert_eq!(resp.text, "{\"titles\": []}");
        assert_eq!(ctx.settings.request_timeout, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let ctx = ctx_with(MockBackend::new(vec![MockReply::Hang]));
        let started = tokio::time::Instant::now();
        let err = ctx.call_text("unit 1", "p".into()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Timeout { .. }));
        assert_eq!(classify(&err), ErrorClass::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_call_and_sleep() {
        let ctx = ctx_with(MockBackend::new(vec![MockReply::Hang]));
        let token = ctx.cancellation.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let err = ctx.call_text("unit 1", "p".into()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));

        let err = ctx.sleep(Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_waits_full_delay() {
        let ctx = ctx_with(MockBackend::fixed("{}"));
        let started = tokio::time::Instant::now();
        ctx.sleep(Duration::from_secs(4)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(4));
    }
}
