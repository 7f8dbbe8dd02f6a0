use crate::retry::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the generation pipeline and its collaborators.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Low-level HTTP transport failure (connection refused, client timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encoding or decoding failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 401, 429, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// A service call exceeded its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// The sanitized payload did not decode into the expected shape.
    #[error("structural failure: {reason}")]
    StructuralFailure { reason: String },

    /// The image model answered without any inline image part.
    #[error("image generation returned no image data")]
    NoImageData,

    /// The build was cancelled through the context's cancellation token.
    #[error("generation was cancelled")]
    Cancelled,

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller-supplied input was rejected before any service call.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The persistence collaborator rejected a write.
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// A fatal build stage (outline, thumbnail, persist) failed after all retries.
    #[error("{stage} failed ({class:?}): {message}")]
    StageFailed {
        stage: &'static str,
        class: ErrorClass,
        message: String,
        /// Whether the underlying error was a credential rejection.
        reauth: bool,
    },

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    pub(crate) fn structural(reason: impl Into<String>) -> Self {
        PipelineError::StructuralFailure {
            reason: reason.into(),
        }
    }

    /// Whether this failure means the credentials were rejected.
    ///
    /// Such errors are never degraded to fallback content: the caller is
    /// expected to run its re-authentication flow.
    pub fn requires_reauth(&self) -> bool {
        match self {
            PipelineError::HttpError { status, .. } => matches!(status, 401 | 403),
            PipelineError::StageFailed { reauth, .. } => *reauth,
            PipelineError::Other(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("unauthorized") || lower.contains("api key")
            }
            _ => false,
        }
    }

    /// Terminal message shown to the person who started the build.
    pub fn user_message(&self) -> String {
        if self.requires_reauth() {
            return "Your session or API credentials were rejected. Sign in again and retry."
                .to_string();
        }
        let class = match self {
            PipelineError::StageFailed { class, .. } => *class,
            other => crate::retry::classify(other),
        };
        match (self, class) {
            (PipelineError::Cancelled, _) => "Generation was cancelled.".to_string(),
            (_, ErrorClass::RateLimited) => {
                "The generation service is rate limiting requests. Wait about 60 seconds and try again."
                    .to_string()
            }
            (_, ErrorClass::Timeout) => {
                "The generation service timed out. Try again in a moment.".to_string()
            }
            (err, _) => format!("Course generation failed: {}", err),
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
