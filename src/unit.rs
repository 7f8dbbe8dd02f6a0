//! Unit content orchestration.
//!
//! [`UnitCall::run`] produces the manual and quiz for one outline entry.
//! Each unit attempt is one [`with_retry`] invocation under the unit retry
//! policy: the service is called, the payload sanitized and decoded, and a
//! payload that does not decode is a structural failure the wrapper retries.
//! When an attempt exhausts its retries, the unit waits out the unit-retry
//! cooldown and starts another attempt, up to `unit_attempts`.
//!
//! Once every attempt has failed, the last payload is searched for a
//! complete `content` string and `quiz` array. If that also fails, the unit
//! degrades to [`fallback_unit`]. Degradation never fails the build;
//! cancellation and rejected credentials always do.

use std::sync::Mutex;

use crate::diagnostics::{UnitDiagnostics, UnitOutcome};
use crate::error::{PipelineError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::output_parser::extract::{extract_array_field, extract_string_field};
use crate::output_parser::{decode, sanitize, ParseError};
use crate::prompt::unit_prompt;
use crate::quiz::randomize_all;
use crate::retry::{with_retry, RetryNotice};
use crate::types::{QuizQuestion, UnitContent};

/// Questions a unit quiz is asked to contain.
pub const EXPECTED_QUESTIONS: usize = 3;

/// Options each question is asked to carry.
pub const EXPECTED_OPTIONS: usize = 4;

/// Per-unit state machine.
///
/// `Pending -> Requesting -> {Decoded | StructuralFailure}`; a failure goes
/// back to `Requesting` while unit attempts remain and ends in
/// `FallbackApplied` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Pending,
    Requesting,
    Decoded,
    StructuralFailure,
    FallbackApplied,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Decoded | UnitState::FallbackApplied)
    }

    fn advance(self, next: UnitState) -> UnitState {
        debug_assert!(
            matches!(
                (self, next),
                (UnitState::Pending, UnitState::Requesting)
                    | (UnitState::Requesting, UnitState::Decoded)
                    | (UnitState::Requesting, UnitState::StructuralFailure)
                    | (UnitState::StructuralFailure, UnitState::Requesting)
                    | (UnitState::StructuralFailure, UnitState::Decoded)
                    | (UnitState::StructuralFailure, UnitState::FallbackApplied)
            ),
            "illegal unit transition {:?} -> {:?}",
            self,
            next
        );
        next
    }
}

/// Content for one unit plus what it took to produce it.
#[derive(Debug, Clone)]
pub struct GeneratedUnit {
    pub content: UnitContent,
    pub diagnostics: UnitDiagnostics,
}

/// Request for one unit of a course.
#[derive(Debug, Clone)]
pub struct UnitCall {
    pub course_title: String,
    pub unit_title: String,
    /// 0-based position in the outline.
    pub index: usize,
}

impl UnitCall {
    pub fn new(course_title: impl Into<String>, unit_title: impl Into<String>, index: usize) -> Self {
        Self {
            course_title: course_title.into(),
            unit_title: unit_title.into(),
            index,
        }
    }

    fn label(&self) -> String {
        format!("unit {}: {}", self.index + 1, self.unit_title)
    }

    /// Generate the unit.
    ///
    /// Returns `Err` only for cancellation and for failures that require
    /// re-authentication. Every other failure degrades to salvaged or
    /// fallback content, recorded in [`GeneratedUnit::diagnostics`].
    pub async fn run(&self, ctx: &ExecCtx) -> Result<GeneratedUnit> {
        ctx.check_cancelled()?;
        let label = self.label();
        let prompt = unit_prompt(&self.course_title, &self.unit_title);
        let attempts = ctx.settings.unit_attempts.max(1);

        let mut diag = UnitDiagnostics::new(self.index, &self.unit_title);
        let mut state = UnitState::Pending;
        let mut last_payload: Option<String> = None;

        ctx.emit(Event::UnitStart {
            index: self.index,
            title: self.unit_title.clone(),
        });

        for attempt in 0..attempts {
            if attempt > 0 {
                let cooldown = ctx.settings.unit_retry_cooldown;
                let reason = diag.last_error.clone().unwrap_or_default();
                tracing::info!(
                    unit = %self.unit_title,
                    attempt = attempt + 1,
                    max_attempts = attempts,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "retrying unit after cooldown"
                );
                ctx.emit(Event::UnitRetry {
                    index: self.index,
                    title: self.unit_title.clone(),
                    attempt: attempt + 1,
                    reason,
                });
                ctx.emit(Event::Cooldown {
                    kind: "unit-retry",
                    delay: cooldown,
                });
                ctx.sleep(cooldown).await?;
                diag.backoff_total_ms += cooldown.as_millis() as u64;
            }

            state = state.advance(UnitState::Requesting);
            diag.unit_attempts = attempt + 1;

            match self.request(ctx, &label, &prompt, &mut diag, &mut last_payload).await {
                Ok(content) => {
                    state = state.advance(UnitState::Decoded);
                    return Ok(self.finish(ctx, state, randomized(content), diag));
                }
                Err(err) if is_fatal(&err) => return Err(err),
                Err(err) => {
                    tracing::warn!(
                        unit = %self.unit_title,
                        attempt = attempt + 1,
                        error = %err,
                        "unit attempt failed"
                    );
                    diag.last_error = Some(err.to_string());
                    state = state.advance(UnitState::StructuralFailure);
                }
            }
        }

        if let Some(content) = last_payload.as_deref().and_then(salvage) {
            tracing::info!(unit = %self.unit_title, "salvaged unit fields from last payload");
            diag.salvaged = true;
            state = state.advance(UnitState::Decoded);
            return Ok(self.finish(ctx, state, randomized(content), diag));
        }

        tracing::error!(
            unit = %self.unit_title,
            attempts,
            last_error = diag.last_error.as_deref().unwrap_or(""),
            "unit generation failed, applying fallback content"
        );
        diag.outcome = UnitOutcome::FallbackApplied;
        state = state.advance(UnitState::FallbackApplied);
        Ok(self.finish(ctx, state, fallback_unit(&self.unit_title), diag))
    }

    /// One unit attempt: a full `with_retry` run under the unit policy.
    async fn request(
        &self,
        ctx: &ExecCtx,
        label: &str,
        prompt: &str,
        diag: &mut UnitDiagnostics,
        last_payload: &mut Option<String>,
    ) -> Result<UnitContent> {
        let latest_raw: Mutex<Option<String>> = Mutex::new(None);
        let mut retries: u32 = 0;
        let mut backoff_ms: u64 = 0;

        let outcome = {
            let mut on_retry = |notice: &RetryNotice<'_>| {
                retries += 1;
                backoff_ms += notice.delay.as_millis() as u64;
                ctx.notify_retry(notice);
            };
            let latest_raw = &latest_raw;
            with_retry(
                label,
                &ctx.settings.unit_retry,
                &ctx.cancellation,
                Some(&mut on_retry),
                |_attempt| async move {
                    let response = ctx.call_text(label, prompt.to_string()).await?;
                    if let Ok(mut slot) = latest_raw.lock() {
                        *slot = Some(response.text.clone());
                    }
                    decode_unit(&response.text).map_err(PipelineError::from)
                },
            )
            .await
        };

        diag.transport_retries += retries;
        diag.backoff_total_ms += backoff_ms;
        if let Some(raw) = latest_raw.into_inner().ok().flatten() {
            *last_payload = Some(raw);
        }

        let (content, repaired) = outcome?;
        diag.repaired |= repaired;
        Ok(content)
    }

    fn finish(
        &self,
        ctx: &ExecCtx,
        state: UnitState,
        content: UnitContent,
        mut diag: UnitDiagnostics,
    ) -> GeneratedUnit {
        debug_assert!(state.is_terminal());
        if state == UnitState::FallbackApplied {
            diag.outcome = UnitOutcome::FallbackApplied;
        }
        ctx.emit(Event::UnitEnd {
            index: self.index,
            title: self.unit_title.clone(),
            outcome: diag.outcome,
        });
        GeneratedUnit {
            content,
            diagnostics: diag,
        }
    }
}

/// Failures that must reach the caller instead of degrading the unit.
fn is_fatal(err: &PipelineError) -> bool {
    matches!(err, PipelineError::Cancelled) || err.requires_reauth()
}

fn randomized(mut content: UnitContent) -> UnitContent {
    content.quiz = randomize_all(&content.quiz);
    content
}

/// Decode and validate a unit payload. The flag reports whether the
/// sanitizer had to change the payload.
fn decode_unit(raw: &str) -> std::result::Result<(UnitContent, bool), ParseError> {
    let content: UnitContent = decode(raw)?;
    let repaired = sanitize(raw) != raw.trim();
    Ok((validate(content)?, repaired))
}

/// Reject units the course cannot use. Shape deviations that are still
/// usable are logged, not rejected.
fn validate(unit: UnitContent) -> std::result::Result<UnitContent, ParseError> {
    if unit.content.trim().is_empty() {
        return Err(ParseError::InvalidField {
            field: "content",
            reason: "manual text is empty".into(),
        });
    }
    if unit.quiz.is_empty() {
        return Err(ParseError::InvalidField {
            field: "quiz",
            reason: "no questions".into(),
        });
    }
    for (i, question) in unit.quiz.iter().enumerate() {
        if question.options.len() < 2 {
            return Err(ParseError::InvalidField {
                field: "quiz",
                reason: format!("question {} has {} options", i + 1, question.options.len()),
            });
        }
        if question.correct_option().is_none() {
            return Err(ParseError::InvalidField {
                field: "quiz",
                reason: format!(
                    "question {} correctIndex {} is out of range for {} options",
                    i + 1,
                    question.correct_index,
                    question.options.len()
                ),
            });
        }
    }
    if unit.quiz.len() != EXPECTED_QUESTIONS
        || unit.quiz.iter().any(|q| q.options.len() != EXPECTED_OPTIONS)
    {
        tracing::warn!(
            questions = unit.quiz.len(),
            "quiz deviates from {} questions of {} options",
            EXPECTED_QUESTIONS,
            EXPECTED_OPTIONS
        );
    }
    Ok(unit)
}

/// Pull `content` and `quiz` out of a payload that failed to decode as a whole.
fn salvage(raw: &str) -> Option<UnitContent> {
    let content = extract_string_field(raw, "content")?;
    let quiz_span = extract_array_field(raw, "quiz")?;
    let quiz: Vec<QuizQuestion> = decode(quiz_span).ok()?;
    validate(UnitContent { content, quiz }).ok()
}

/// Placeholder content for a unit whose generation failed.
///
/// Always one acknowledgment question with the first option correct, and a
/// body naming the unit.
pub fn fallback_unit(unit_title: &str) -> UnitContent {
    let content = format!(
        "# {title}\n\nGenerated material for this unit is not available yet. \
         Review the primary documentation for **{title}** before continuing.\n\n\
         ## Acknowledgement\n\nBy proceeding, you confirm that you have reviewed \
         the primary documentation for **{title}**.",
        title = unit_title
    );
    let quiz = vec![QuizQuestion::new(
        "Have you reviewed the technical documentation for this unit?",
        vec![
            "Yes, documentation reviewed.".to_string(),
            "In progress".to_string(),
            "No".to_string(),
            "N/A".to_string(),
        ],
        0,
    )];
    UnitContent { content, quiz }
}
