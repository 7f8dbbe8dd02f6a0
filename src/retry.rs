//! Classified retry with exponential backoff.
//!
//! [`with_retry`] runs a fallible async operation, classifies each failure
//! into an [`ErrorClass`], and retries the retry-eligible classes
//! (rate limiting, timeouts, structural failures) with a delay of
//! `base_delay * 2^attempt`. Anything classified as [`ErrorClass::Other`]
//! propagates after a single attempt.
//!
//! The generative service does not expose a machine-readable error contract,
//! so [`classify`] is the one place where status codes and message text are
//! inspected. Everything downstream works with the closed enum.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Message marker carried by structural (decode) failures.
///
/// [`PipelineError::StructuralFailure`] renders with this prefix, so errors
/// that were flattened to text on the way through a collaborator still
/// classify correctly.
pub const STRUCTURAL_FAILURE_MARKER: &str = "structural failure";

/// Retry-relevant classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// The service reported quota exhaustion.
    RateLimited,
    /// The call exceeded a deadline or was aborted.
    Timeout,
    /// The sanitized payload failed to decode into the expected shape.
    StructuralFailure,
    /// Anything else. Never retried.
    Other,
}

impl ErrorClass {
    /// Whether [`with_retry`] will retry a failure of this class.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Other)
    }
}

/// Classify a pipeline error for retry purposes.
///
/// # Example
///
/// ```
/// use curriculum_forge::retry::{classify, ErrorClass};
/// use curriculum_forge::PipelineError;
///
/// let err = PipelineError::HttpError { status: 429, body: String::new(), retry_after: None };
/// assert_eq!(classify(&err), ErrorClass::RateLimited);
/// assert_eq!(classify(&PipelineError::Other("bad api key".into())), ErrorClass::Other);
/// ```
pub fn classify(error: &PipelineError) -> ErrorClass {
    match error {
        PipelineError::Cancelled
        | PipelineError::InvalidConfig(_)
        | PipelineError::InvalidInput(_)
        | PipelineError::Persistence(_)
        | PipelineError::NoImageData => ErrorClass::Other,
        PipelineError::StructuralFailure { .. } | PipelineError::Json(_) => {
            ErrorClass::StructuralFailure
        }
        PipelineError::Timeout { .. } => ErrorClass::Timeout,
        PipelineError::Request(e) if e.is_timeout() => ErrorClass::Timeout,
        PipelineError::HttpError { status, body, .. } => match status {
            // Some providers report capacity exhaustion as 503.
            429 | 503 => ErrorClass::RateLimited,
            408 | 504 => ErrorClass::Timeout,
            401 | 403 => ErrorClass::Other,
            _ => classify_message(body),
        },
        PipelineError::StageFailed { class, .. } => *class,
        other => classify_message(&other.to_string()),
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let normalized = message.to_ascii_lowercase();
    if normalized.contains(STRUCTURAL_FAILURE_MARKER) {
        ErrorClass::StructuralFailure
    } else if normalized.contains("429")
        || normalized.contains("rate limit")
        || normalized.contains("too many requests")
        || normalized.contains("resource_exhausted")
        || normalized.contains("quota")
    {
        ErrorClass::RateLimited
    } else if normalized.contains("timeout")
        || normalized.contains("timed out")
        || normalized.contains("deadline_exceeded")
        || normalized.contains("deadline exceeded")
        || normalized.contains("aborted")
    {
        ErrorClass::Timeout
    } else {
        ErrorClass::Other
    }
}

/// Jitter applied on top of the exponential delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// Delay is exactly `base_delay * 2^attempt`.
    #[default]
    None,
    /// Adds a random extra of up to half the computed delay.
    /// Never shortens the delay below `base_delay * 2^attempt`.
    Additive,
}

/// Retry budget and backoff shape for one kind of service call.
///
/// # Example
///
/// ```
/// use curriculum_forge::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(2000));
/// assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(2000));
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(8000));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry; doubles for each later retry.
    #[serde(rename = "base_delay_ms", with = "crate::config::duration_ms")]
    pub base_delay: Duration,

    /// Jitter strategy. Default: none.
    pub jitter: JitterStrategy,

    /// Wait at least as long as a provider `Retry-After` hint. Default: `true`.
    pub respect_retry_after: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: JitterStrategy::None,
            respect_retry_after: true,
        }
    }

    /// Outline calls: 3 attempts, 2s base.
    pub fn outline() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }

    /// Unit content calls: 3 attempts, 5s base (unit payloads are large).
    pub fn unit() -> Self {
        Self::new(3, Duration::from_millis(5000))
    }

    /// Thumbnail calls: 3 attempts, 2s base.
    pub fn thumbnail() -> Self {
        Self::new(3, Duration::from_millis(2000))
    }

    /// Delay before retry number `attempt` (0-indexed): `base_delay * 2^attempt`,
    /// plus jitter if configured.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        match self.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Additive => delay.saturating_add(delay.mul_f64(fastrand::f64() * 0.5)),
        }
    }

    fn delay_after(&self, attempt: u32, error: &PipelineError) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            PipelineError::HttpError {
                retry_after: Some(hint),
                ..
            } if self.respect_retry_after => backoff.max(*hint),
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::outline()
    }
}

/// Per-invocation retry state, handed to the operation on every attempt.
///
/// Created fresh by [`with_retry`] and dropped when it returns; never shared
/// between invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryContext {
    /// Zero-based attempt index.
    pub attempt: u32,
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryContext {
    pub fn is_last(&self) -> bool {
        self.attempt + 1 >= self.max_attempts
    }
}

/// Advisory notice passed to the retry callback before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryNotice<'a> {
    pub label: &'a str,
    /// 1-indexed number of the attempt about to be made.
    pub next_attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub class: ErrorClass,
    pub reason: String,
}

impl RetryNotice<'_> {
    /// Human-readable status line, e.g. for a progress display.
    pub fn status_line(&self) -> String {
        let what = match self.class {
            ErrorClass::RateLimited => "Rate limit hit",
            ErrorClass::Timeout => "Request timed out",
            ErrorClass::StructuralFailure => "Malformed response",
            ErrorClass::Other => "Request failed",
        };
        format!(
            "{} during {}. Retrying in {}ms (attempt {}/{})",
            what,
            self.label,
            self.delay.as_millis(),
            self.next_attempt,
            self.max_attempts
        )
    }
}

/// Callback invoked before each retry sleep.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(&RetryNotice<'_>) + Send)>;

/// Execute `operation` with classified retry and exponential backoff.
///
/// Makes at most `policy.max_attempts` attempts. After a failed attempt
/// `n` (0-indexed) whose class is retry-eligible, sleeps for
/// `policy.delay_for_attempt(n)` (or longer, if the provider sent a
/// `Retry-After` hint) before trying again. Non-retryable failures and the
/// final failure are returned unchanged.
///
/// Cancellation is checked before every attempt and interrupts the sleep.
pub async fn with_retry<T, Op, Fut>(
    label: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: RetryCallback<'_>,
    mut operation: Op,
) -> Result<T>
where
    Op: FnMut(RetryContext) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let ctx = RetryContext {
            attempt,
            max_attempts,
            base_delay: policy.base_delay,
        };

        let error = match operation(ctx).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let class = classify(&error);
        if !class.is_retryable() {
            tracing::debug!(label, attempt, error = %error, "non-retryable failure");
            return Err(error);
        }
        if ctx.is_last() {
            tracing::warn!(label, attempts = max_attempts, ?class, error = %error, "retries exhausted");
            return Err(error);
        }

        let delay = policy.delay_after(attempt, &error);
        let notice = RetryNotice {
            label,
            next_attempt: attempt + 2,
            max_attempts,
            delay,
            class,
            reason: error.to_string(),
        };
        tracing::warn!(
            label,
            attempt = attempt + 1,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            ?class,
            error = %error,
            "{}",
            notice.status_line()
        );
        if let Some(ref mut cb) = on_retry {
            cb(&notice);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn rate_limited() -> PipelineError {
        PipelineError::HttpError {
            status: 429,
            body: "RESOURCE_EXHAUSTED".into(),
            retry_after: None,
        }
    }

    #[test]
    fn classify_by_variant_and_message() {
        assert_eq!(classify(&rate_limited()), ErrorClass::RateLimited);
        assert_eq!(
            classify(&PipelineError::Timeout {
                operation: "unit".into(),
                after: Duration::from_secs(1)
            }),
            ErrorClass::Timeout
        );
        assert_eq!(
            classify(&PipelineError::structural("missing field `quiz`")),
            ErrorClass::StructuralFailure
        );
        assert_eq!(
            classify(&PipelineError::Other(
                "Structural failure: malformed JSON output".into()
            )),
            ErrorClass::StructuralFailure
        );
        assert_eq!(
            classify(&PipelineError::Other("quota exceeded for project".into())),
            ErrorClass::RateLimited
        );
        assert_eq!(
            classify(&PipelineError::Other("request aborted".into())),
            ErrorClass::Timeout
        );
        assert_eq!(
            classify(&PipelineError::HttpError {
                status: 401,
                body: "quota".into(),
                retry_after: None
            }),
            ErrorClass::Other
        );
        assert_eq!(classify(&PipelineError::Cancelled), ErrorClass::Other);
        assert_eq!(
            classify(&PipelineError::Other("invalid api key".into())),
            ErrorClass::Other
        );
    }

    #[test]
    fn delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
    }

    #[test]
    fn additive_jitter_never_shortens() {
        let policy = RetryPolicy {
            jitter: JitterStrategy::Additive,
            ..RetryPolicy::new(3, Duration::from_millis(100))
        };
        for _ in 0..200 {
            let d = policy.delay_for_attempt(1);
            assert!(d >= Duration::from_millis(200), "delay {:?} < 200ms", d);
            assert!(d <= Duration::from_millis(300), "delay {:?} > 300ms", d);
        }
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        assert!(policy.delay_for_attempt(64) >= Duration::from_secs(1 << 20));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_rate_limit_until_exhausted() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000));
        let attempts = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<()> = with_retry("outline", &policy, &CancellationToken::new(), None, |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(rate_limited())
            }
        })
        .await;

        let err = assert_err!(result);
        assert!(matches!(err, PipelineError::HttpError { status: 429, .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        // 1000ms before the second attempt, 2000ms before the third.
        assert!(start.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_are_attempted_once() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: Result<()> = with_retry("outline", &policy, &CancellationToken::new(), None, |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::HttpError {
                    status: 401,
                    body: "API key not valid".into(),
                    retry_after: None,
                })
            }
        })
        .await;

        assert_err!(result);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn structural_failure_then_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5000));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let value = with_retry("unit", &policy, &CancellationToken::new(), None, |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().unwrap().push(ctx.attempt);
                if ctx.attempt < 2 {
                    Err(PipelineError::structural("truncated"))
                } else {
                    Ok("decoded")
                }
            }
        })
        .await;

        assert_eq!(assert_ok!(value), "decoded");
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_after_hint_extends_delay() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100));
        let start = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = with_retry("thumbnail", &policy, &CancellationToken::new(), None, |_| {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(PipelineError::HttpError {
                        status: 429,
                        body: String::new(),
                        retry_after: Some(Duration::from_secs(30)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_ok!(result);
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn callback_receives_each_retry() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let mut notices = Vec::new();
        let mut on_retry = |n: &RetryNotice<'_>| {
            notices.push((n.next_attempt, n.delay, n.class));
        };

        let result: Result<()> = with_retry(
            "unit",
            &policy,
            &CancellationToken::new(),
            Some(&mut on_retry),
            |_| async { Err(PipelineError::Other("deadline exceeded".into())) },
        )
        .await;

        assert_err!(result);
        assert_eq!(
            notices,
            vec![
                (2, Duration::from_millis(100), ErrorClass::Timeout),
                (3, Duration::from_millis(200), ErrorClass::Timeout),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result: Result<()> =
            with_retry("unit", &policy, &cancel, None, |_| async { Err(rate_limited()) }).await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cancelled_token_skips_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = with_retry("outline", &RetryPolicy::outline(), &cancel, None, |_| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

        assert!(matches!(result, Err(PipelineError::Cancelled)));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn status_line_is_readable() {
        let notice = RetryNotice {
            label: "outline",
            next_attempt: 2,
            max_attempts: 3,
            delay: Duration::from_millis(2000),
            class: ErrorClass::RateLimited,
            reason: "HTTP 429".into(),
        };
        assert_eq!(
            notice.status_line(),
            "Rate limit hit during outline. Retrying in 2000ms (attempt 2/3)"
        );
    }
}
