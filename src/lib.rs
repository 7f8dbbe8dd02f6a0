//! # Curriculum Forge
//!
//! Turns a topic string into a complete training course by repeatedly
//! calling an unreliable generative service: unit titles, a manual and a
//! quiz per unit, and a thumbnail image.
//!
//! The service fails in three ways this crate is built around: it rate
//! limits, it times out, and it returns structured text that is truncated
//! or wrapped in prose. Each has a dedicated answer:
//!
//! - **[`output_parser::sanitize`]** repairs a raw payload into a
//!   parseable JSON document, closing whatever a truncation left open.
//! - **[`retry::with_retry`]** classifies each failure into an
//!   [`ErrorClass`] and retries the retryable ones with exponential backoff.
//! - **[`UnitCall`]** generates one unit with nested unit-level retries and
//!   degrades to placeholder content instead of failing the course.
//! - **[`quiz::randomize`]** shuffles answer options while keeping the
//!   correct answer attached.
//! - **[`CourseAssembler`]** drives the whole build strictly one unit at a
//!   time, with a cooldown between requests, and hands the finished course
//!   to a [`CourseStore`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use curriculum_forge::{CourseAssembler, ExecCtx, InMemoryCourseStore};
//! use curriculum_forge::backend::gemini::GEMINI_BASE_URL;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads GEMINI_API_KEY (or API_KEY).
//!     let ctx = ExecCtx::builder(GEMINI_BASE_URL).build()?;
//!     let store = Arc::new(InMemoryCourseStore::new());
//!     let assembler = CourseAssembler::new(store);
//!
//!     let build = assembler.build_course(&ctx, "Arc Flash Safety").await?;
//!     println!(
//!         "{}: {} modules, {} placeholder units",
//!         build.course.course_name,
//!         build.course.modules.len(),
//!         build.report.fallback_units()
//!     );
//!     Ok(())
//! }
//! ```

pub mod assembly;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod outline;
pub mod output_parser;
pub mod progress;
pub mod prompt;
pub mod quiz;
pub mod retry;
pub mod store;
pub mod thumbnail;
pub mod types;
pub mod unit;

pub use assembly::{CourseAssembler, CourseBuild};
pub use backend::{Backend, GeminiBackend, LlmConfig, MockBackend, MockReply};
pub use config::PipelineSettings;
pub use diagnostics::{BuildReport, UnitDiagnostics, UnitOutcome};
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use outline::generate_outline;
pub use progress::ProgressReporter;
pub use retry::{classify, with_retry, ErrorClass, RetryContext, RetryPolicy};
pub use store::{CourseStore, InMemoryCourseStore};
pub use thumbnail::{fallback_image_url, generate_thumbnail, Thumbnail};
pub use types::{
    BuildPhase, Course, CourseStatus, CurriculumOutline, Difficulty, GenerationProgress, Lesson,
    LessonBody, Module, QuizQuestion, UnitContent,
};
pub use unit::{fallback_unit, GeneratedUnit, UnitCall, UnitState};

pub use tokio_util::sync::CancellationToken;
