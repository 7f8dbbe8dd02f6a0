//! Mock backend for testing without a live service.
//!
//! [`MockBackend`] plays back scripted [`MockReply`] values, one per call,
//! so retry, fallback, and timeout paths can be driven deterministically.
//! Text and image calls have separate scripts. Once a script is exhausted
//! its last reply repeats.
//!
//! # Example
//!
//! ```
//! use curriculum_forge::backend::{MockBackend, MockReply};
//!
//! let mock = MockBackend::new(vec![
//!     MockReply::RateLimited,
//!     MockReply::text(r#"{"titles": ["Intro"]}"#),
//! ]);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, ImageData, ImageRequest, LlmRequest, LlmResponse};
use crate::error::{PipelineError, Result};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A successful text response with this body.
    Text(String),
    /// HTTP 429 with a quota message.
    RateLimited,
    /// A deadline error, as a transport timeout would produce.
    Timeout,
    /// HTTP 401.
    Unauthorized,
    /// HTTP 500 with this body.
    Fail(String),
    /// Never completes. Used to exercise per-call deadlines.
    Hang,
    /// A successful image response.
    Image { mime_type: String, data: String },
    /// A successful image call that carried no image part.
    NoImage,
}

impl MockReply {
    pub fn text(body: impl Into<String>) -> Self {
        MockReply::Text(body.into())
    }

    pub fn png(data: impl Into<String>) -> Self {
        MockReply::Image {
            mime_type: "image/png".to_string(),
            data: data.into(),
        }
    }
}

#[derive(Debug)]
struct Script {
    replies: Vec<MockReply>,
    index: AtomicUsize,
}

impl Script {
    fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            index: AtomicUsize::new(0),
        }
    }

    fn next(&self) -> Option<MockReply> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed);
        self.replies
            .get(idx)
            .or_else(|| self.replies.last())
            .cloned()
    }

    fn calls(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }
}

/// A test backend that plays back scripted replies in order.
#[derive(Debug)]
pub struct MockBackend {
    text: Script,
    images: Script,
    prompts: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a mock with a text script. Image calls report no image data.
    pub fn new(text: Vec<MockReply>) -> Self {
        Self {
            text: Script::new(text),
            images: Script::new(vec![MockReply::NoImage]),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that always returns the same text.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![MockReply::text(response)])
    }

    /// Replace the image script.
    pub fn with_images(mut self, images: Vec<MockReply>) -> Self {
        self.images = Script::new(images);
        self
    }

    /// Number of text calls made so far.
    pub fn text_calls(&self) -> usize {
        self.text.calls()
    }

    /// Number of image calls made so far.
    pub fn image_calls(&self) -> usize {
        self.images.calls()
    }

    /// Every prompt received, text and image, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    fn record(&self, prompt: &str) {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
    }

    async fn play_error(reply: &MockReply) -> PipelineError {
        match reply {
            MockReply::RateLimited => PipelineError::HttpError {
                status: 429,
                body: "RESOURCE_EXHAUSTED: quota exceeded".to_string(),
                retry_after: None,
            },
            MockReply::Timeout => PipelineError::Timeout {
                operation: "mock call".to_string(),
                after: Duration::from_secs(120),
            },
            MockReply::Unauthorized => PipelineError::HttpError {
                status: 401,
                body: "API key not valid".to_string(),
                retry_after: None,
            },
            MockReply::Fail(body) => PipelineError::HttpError {
                status: 500,
                body: body.clone(),
                retry_after: None,
            },
            MockReply::Hang => {
                std::future::pending::<()>().await;
                PipelineError::Cancelled
            }
            other => PipelineError::Other(format!("mock reply {:?} is not valid here", other)),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        self.record(&request.prompt);
        match self.text.next() {
            Some(MockReply::Text(text)) => Ok(LlmResponse {
                text,
                status: 200,
                metadata: None,
            }),
            Some(reply) => Err(Self::play_error(&reply).await),
            None => Err(PipelineError::Other("mock text script is empty".into())),
        }
    }

    async fn generate_image(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &ImageRequest,
    ) -> Result<Option<ImageData>> {
        self.record(&request.prompt);
        match self.images.next() {
            Some(MockReply::Image { mime_type, data }) => Ok(Some(ImageData {
                mime_type,
                data_base64: data,
            })),
            Some(MockReply::NoImage) | None => Ok(None),
            Some(reply) => Err(Self::play_error(&reply).await),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
