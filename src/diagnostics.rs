//! Per-unit diagnostics and the build report.
//!
//! A build that degrades some units to fallback content still succeeds.
//! [`BuildReport`] makes the degradation visible to the caller instead of
//! hiding it behind a plain success.

use serde::{Deserialize, Serialize};

/// Terminal state of one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The service payload decoded into unit content.
    Decoded,
    /// Every attempt failed; placeholder content was substituted.
    FallbackApplied,
}

/// Records what happened while generating one unit.
///
/// # Example
///
/// ```
/// use curriculum_forge::diagnostics::{UnitDiagnostics, UnitOutcome};
///
/// let diag = UnitDiagnostics::new(0, "Intro");
/// assert_eq!(diag.outcome, UnitOutcome::Decoded);
/// assert!(diag.ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDiagnostics {
    /// 0-based position in the outline.
    pub index: usize,
    pub title: String,
    pub outcome: UnitOutcome,

    /// Unit-level attempts made (1 = first attempt decoded).
    pub unit_attempts: u32,

    /// Transport retries across all unit attempts (rate limits, timeouts,
    /// structural failures caught by the inner retry).
    pub transport_retries: u32,

    /// Total time spent in backoff delays and unit-retry cooldowns (milliseconds).
    pub backoff_total_ms: u64,

    /// Whether the sanitizer had to change the payload for it to decode.
    pub repaired: bool,

    /// Whether the content was pulled out field by field after full decoding failed.
    pub salvaged: bool,

    /// Last failure seen, if any attempt failed.
    pub last_error: Option<String>,
}

impl UnitDiagnostics {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            outcome: UnitOutcome::Decoded,
            unit_attempts: 0,
            transport_retries: 0,
            backoff_total_ms: 0,
            repaired: false,
            salvaged: false,
            last_error: None,
        }
    }

    /// Quick check: did the unit decode?
    pub fn ok(&self) -> bool {
        self.outcome == UnitOutcome::Decoded
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub units: Vec<UnitDiagnostics>,

    /// Whether the thumbnail came from the public image service.
    pub thumbnail_fallback: bool,
}

impl BuildReport {
    /// Number of units that fell back to placeholder content.
    pub fn fallback_units(&self) -> usize {
        self.units.iter().filter(|u| !u.ok()).count()
    }

    /// Titles of the units that fell back.
    pub fn degraded_units(&self) -> Vec<&str> {
        self.units
            .iter()
            .filter(|u| !u.ok())
            .map(|u| u.title.as_str())
            .collect()
    }

    /// Whether any part of the course is placeholder content.
    pub fn is_degraded(&self) -> bool {
        self.thumbnail_fallback || self.fallback_units() > 0
    }
}
