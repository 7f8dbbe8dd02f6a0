//! Event hooks for build lifecycle observation.
//!
//! Provides an optional, non-intrusive way to observe a course build.
//! The pipeline emits events when stages start and end, when a call is
//! retried, when it cools down between units, and when content degrades to
//! a fallback. Implement [`EventHandler`] to receive them for logging,
//! progress displays, or metrics. Events are advisory only.

use std::sync::Arc;
use std::time::Duration;

use crate::diagnostics::UnitOutcome;
use crate::retry::ErrorClass;

/// Events emitted during a course build.
#[derive(Debug, Clone)]
pub enum Event {
    /// A build stage (`"outline"`, `"thumbnail"`, `"units"`, `"persist"`) started.
    StageStart { stage: &'static str },
    /// A build stage finished.
    StageEnd { stage: &'static str, ok: bool },
    /// A failed call is about to be retried after a backoff delay.
    Retry {
        /// Operation label, e.g. `"outline"` or `"unit 2: Grounding"`.
        label: String,
        /// The attempt about to start (1-indexed).
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
        class: ErrorClass,
        reason: String,
    },
    /// A fixed pause between service calls.
    Cooldown {
        /// `"inter-unit"` or `"unit-retry"`.
        kind: &'static str,
        delay: Duration,
    },
    /// Generation of one unit started (index is 0-based).
    UnitStart { index: usize, title: String },
    /// A unit-level retry after a failed unit attempt.
    UnitRetry {
        index: usize,
        title: String,
        /// The unit attempt about to start (1-indexed).
        attempt: u32,
        reason: String,
    },
    /// A unit reached a terminal state.
    UnitEnd {
        index: usize,
        title: String,
        outcome: UnitOutcome,
    },
    /// The image model failed and the public image service URL is used instead.
    ThumbnailFallback { reason: String },
}

/// Handler for build lifecycle events.
///
/// This is entirely optional; builds work without an event handler.
///
/// # Example
///
/// ```
/// use curriculum_forge::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::UnitStart { index, title } => println!("[unit {}] {}", index + 1, title),
///             Event::Retry { label, delay, .. } => println!("[retry] {} in {:?}", label, delay),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the pipeline emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use curriculum_forge::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::ThumbnailFallback { reason } = event {
///         eprintln!("thumbnail fell back: {}", reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emit_reaches_closure_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler: Option<Arc<dyn EventHandler>> = Some(Arc::new(FnEventHandler(move |e| {
            if let Event::StageStart { stage } = e {
                sink.lock().unwrap().push(stage);
            }
        })));

        emit(&handler, Event::StageStart { stage: "outline" });
        emit(&None, Event::StageStart { stage: "ignored" });
        assert_eq!(*seen.lock().unwrap(), vec!["outline"]);
    }
}
