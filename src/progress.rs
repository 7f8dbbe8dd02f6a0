//! Build progress publication.
//!
//! The assembler is the only writer. Every update replaces the whole
//! [`GenerationProgress`] record in a `tokio::sync::watch` channel, so a
//! reader never observes a half-updated snapshot.

use crate::types::{BuildPhase, GenerationProgress};
use tokio::sync::watch;

/// Single-writer publisher of [`GenerationProgress`] snapshots.
#[derive(Debug)]
pub struct ProgressReporter {
    sender: watch::Sender<GenerationProgress>,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(GenerationProgress::default());
        Self { sender }
    }

    /// A receiver that sees the current snapshot and every later one.
    pub fn subscribe(&self) -> watch::Receiver<GenerationProgress> {
        self.sender.subscribe()
    }

    /// Copy of the current snapshot.
    pub fn snapshot(&self) -> GenerationProgress {
        self.sender.borrow().clone()
    }

    /// Publish a complete new record.
    pub fn publish(&self, progress: GenerationProgress) {
        tracing::debug!(
            phase = ?progress.phase,
            completed = progress.units_completed,
            total = progress.units_total,
            status = %progress.status_message,
            "progress"
        );
        self.sender.send_replace(progress);
    }

    /// Start a new build: counters reset, phase set.
    pub fn begin(&self, phase: BuildPhase, status: impl Into<String>) {
        self.publish(GenerationProgress {
            units_completed: 0,
            units_total: 0,
            status_message: status.into(),
            phase,
        });
    }

    /// Move to `phase` with a new status line, keeping the counters.
    pub fn phase(&self, phase: BuildPhase, status: impl Into<String>) {
        let current = self.snapshot();
        self.publish(GenerationProgress {
            status_message: status.into(),
            phase,
            ..current
        });
    }

    /// Replace the status line only.
    pub fn status(&self, status: impl Into<String>) {
        let current = self.snapshot();
        self.publish(GenerationProgress {
            status_message: status.into(),
            ..current
        });
    }

    /// Set both unit counters and the status line.
    pub fn units(&self, completed: usize, total: usize, status: impl Into<String>) {
        self.publish(GenerationProgress {
            units_completed: completed,
            units_total: total,
            status_message: status.into(),
            phase: BuildPhase::Units,
        });
    }
}
