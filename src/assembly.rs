//! Course assembly.
//!
//! [`CourseAssembler`] drives a whole build: outline, thumbnail, then every
//! unit strictly in outline order with a cooldown between unit requests,
//! and finally the hand-off to the [`CourseStore`]. Progress is published
//! as whole [`GenerationProgress`] snapshots.
//!
//! Outline and persistence failures end the build with
//! [`PipelineError::StageFailed`]. A thumbnail failure falls back to the
//! public image service, and a unit failure falls back to placeholder
//! content; both are reported in the [`BuildReport`] but do not fail the
//! build.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::diagnostics::BuildReport;
use crate::error::{PipelineError, Result};
use crate::events::Event;
use crate::exec_ctx::ExecCtx;
use crate::outline::generate_outline;
use crate::progress::ProgressReporter;
use crate::retry::classify;
use crate::store::CourseStore;
use crate::thumbnail::generate_thumbnail;
use crate::types::{
    BuildPhase, Course, CourseStatus, Difficulty, GenerationProgress, Lesson, LessonBody, Module,
    UnitContent,
};
use crate::unit::{GeneratedUnit, UnitCall};

/// Duration assigned to a unit's manual lesson.
pub const DOCUMENT_MINUTES: u32 = 45;

/// Duration assigned to a unit's quiz lesson.
pub const QUIZ_MINUTES: u32 = 15;

/// A finished build: the stored course and how it was produced.
#[derive(Debug, Clone)]
pub struct CourseBuild {
    pub course: Course,
    pub report: BuildReport,
}

/// Identity a build writes into. Kept across regeneration.
#[derive(Debug, Clone)]
struct CourseIdentity {
    course_id: String,
    course_name: String,
    short_description: String,
    status: CourseStatus,
    difficulty: Difficulty,
    /// Learner progress against the old lessons must be cleared once the
    /// new content is stored.
    replaces_existing: bool,
}

/// Runs course builds one at a time against a [`CourseStore`].
///
/// # Example
///
/// ```no_run
/// use curriculum_forge::{CourseAssembler, ExecCtx, InMemoryCourseStore};
/// use std::sync::Arc;
///
/// # async fn run() -> curriculum_forge::Result<()> {
/// let ctx = ExecCtx::builder(curriculum_forge::backend::gemini::GEMINI_BASE_URL).build()?;
/// let assembler = CourseAssembler::new(Arc::new(InMemoryCourseStore::new()));
/// let mut progress = assembler.progress();
/// tokio::spawn(async move {
///     while progress.changed().await.is_ok() {
///         println!("{}", progress.borrow().status_message);
///     }
/// });
/// let build = assembler.build_course(&ctx, "Industrial Hydraulics").await?;
/// println!("{} modules", build.course.modules.len());
/// # Ok(())
/// # }
/// ```
pub struct CourseAssembler {
    store: Arc<dyn CourseStore>,
    progress: ProgressReporter,
    running: Mutex<()>,
}

impl CourseAssembler {
    pub fn new(store: Arc<dyn CourseStore>) -> Self {
        Self {
            store,
            progress: ProgressReporter::new(),
            running: Mutex::new(()),
        }
    }

    /// Subscribe to progress snapshots of the current and later builds.
    pub fn progress(&self) -> watch::Receiver<GenerationProgress> {
        self.progress.subscribe()
    }

    /// Build and store a new course on `topic`.
    pub async fn build_course(&self, ctx: &ExecCtx, topic: &str) -> Result<CourseBuild> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(PipelineError::InvalidInput("topic is empty".into()));
        }
        let identity = CourseIdentity {
            course_id: format!("c_{}", mint_token()),
            course_name: topic.to_string(),
            short_description: format!("Enterprise technical track for {}.", topic),
            status: CourseStatus::default(),
            difficulty: Difficulty::default(),
            replaces_existing: false,
        };
        self.run(ctx, identity).await
    }

    /// Rebuild an existing course's thumbnail and modules.
    ///
    /// Id, name, description, status, and difficulty are kept. Every module
    /// and lesson gets a fresh id, so learner progress recorded against the
    /// old lessons is reset once the new content is stored. A failed reset
    /// fails the build.
    pub async fn regenerate_course(&self, ctx: &ExecCtx, course: &Course) -> Result<CourseBuild> {
        if course.course_name.trim().is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "course '{}' has no name to regenerate from",
                course.course_id
            )));
        }
        let identity = CourseIdentity {
            course_id: course.course_id.clone(),
            course_name: course.course_name.trim().to_string(),
            short_description: course.short_description.clone(),
            status: course.status,
            difficulty: course.difficulty,
            replaces_existing: true,
        };
        self.run(ctx, identity).await
    }

    /// Regenerate `courses` one after another.
    ///
    /// A failed course is recorded and the next one started. Cancellation
    /// and rejected credentials stop the loop after being recorded.
    pub async fn regenerate_all(
        &self,
        ctx: &ExecCtx,
        courses: &[Course],
    ) -> Vec<(String, Result<CourseBuild>)> {
        let mut results = Vec::with_capacity(courses.len());
        for (i, course) in courses.iter().enumerate() {
            tracing::info!(
                course_id = %course.course_id,
                position = i + 1,
                total = courses.len(),
                "regenerating course"
            );
            let result = self.regenerate_course(ctx, course).await;
            let stop = match &result {
                Err(err) => {
                    tracing::error!(course_id = %course.course_id, error = %err, "course regeneration failed");
                    matches!(err, PipelineError::Cancelled) || err.requires_reauth()
                }
                Ok(_) => false,
            };
            results.push((course.course_id.clone(), result));
            if stop {
                break;
            }
        }
        results
    }

    /// Replace only the thumbnail of an existing course.
    pub async fn refresh_thumbnail(&self, ctx: &ExecCtx, course: &Course) -> Result<Course> {
        let _running = self.running.lock().await;
        let (thumbnail, fallback) =
            stage(ctx, "thumbnail", generate_thumbnail(ctx, &course.course_name)).await?;
        let mut updated = course.clone();
        updated.thumbnail_url = thumbnail.to_uri();
        stage(ctx, "persist", self.store.upsert_course(&updated)).await?;
        tracing::info!(course_id = %course.course_id, fallback, "thumbnail refreshed");
        Ok(updated)
    }

    async fn run(&self, ctx: &ExecCtx, identity: CourseIdentity) -> Result<CourseBuild> {
        let _running = self.running.lock().await;
        let result = self.run_stages(ctx, identity).await;
        if let Err(err) = &result {
            self.progress.phase(BuildPhase::Failed, err.user_message());
        }
        result
    }

    async fn run_stages(&self, ctx: &ExecCtx, identity: CourseIdentity) -> Result<CourseBuild> {
        let topic = identity.course_name.as_str();
        let replaces_existing = identity.replaces_existing;

        self.progress
            .begin(BuildPhase::Outline, format!("Designing curriculum for {}", topic));
        let outline = stage(ctx, "outline", generate_outline(ctx, topic)).await?;

        self.progress
            .phase(BuildPhase::Thumbnail, "Generating course thumbnail");
        let (thumbnail, thumbnail_fallback) =
            stage(ctx, "thumbnail", generate_thumbnail(ctx, topic)).await?;

        let units = stage(ctx, "units", self.generate_units(ctx, topic, &outline.titles)).await?;

        let build_token = mint_token();
        let mut report = BuildReport {
            units: Vec::with_capacity(units.len()),
            thumbnail_fallback,
        };
        let mut modules = Vec::with_capacity(units.len());
        for (i, unit) in units.into_iter().enumerate() {
            let GeneratedUnit {
                content,
                diagnostics,
            } = unit;
            modules.push(assemble_module(
                &identity.course_id,
                &build_token,
                i,
                &outline.titles[i],
                outline.description(i),
                content,
            ));
            report.units.push(diagnostics);
        }

        let course = Course {
            course_id: identity.course_id,
            course_name: identity.course_name,
            short_description: identity.short_description,
            thumbnail_url: thumbnail.to_uri(),
            status: identity.status,
            difficulty: identity.difficulty,
            modules,
        };

        self.progress.phase(BuildPhase::Persisting, "Saving course");
        stage(ctx, "persist", self.store.upsert_course(&course)).await?;
        if replaces_existing {
            self.progress.status("Resetting learner progress");
            stage(
                ctx,
                "reset progress",
                self.store.reset_progress(&course.course_id),
            )
            .await?;
        }

        let fallback_units = report.fallback_units();
        let done = if fallback_units == 0 {
            "Course ready".to_string()
        } else {
            format!(
                "Course ready ({} of {} units use placeholder content)",
                fallback_units,
                report.units.len()
            )
        };
        self.progress.phase(BuildPhase::Done, done);
        tracing::info!(
            course_id = %course.course_id,
            modules = course.modules.len(),
            fallback_units,
            thumbnail_fallback = report.thumbnail_fallback,
            "course build finished"
        );
        Ok(CourseBuild { course, report })
    }

    /// Generate every unit in order, cooling down between requests.
    async fn generate_units(
        &self,
        ctx: &ExecCtx,
        course_title: &str,
        titles: &[String],
    ) -> Result<Vec<GeneratedUnit>> {
        let total = titles.len();
        let mut units = Vec::with_capacity(total);
        self.progress.units(0, total, "Writing units");

        for (i, title) in titles.iter().enumerate() {
            if i > 0 {
                let cooldown = ctx.settings.inter_unit_cooldown;
                ctx.emit(Event::Cooldown {
                    kind: "inter-unit",
                    delay: cooldown,
                });
                ctx.sleep(cooldown).await?;
            }
            self.progress.units(
                i,
                total,
                format!("Writing unit {}/{}: {}", i + 1, total, title),
            );
            units.push(UnitCall::new(course_title, title.as_str(), i).run(ctx).await?);
        }

        self.progress.units(total, total, "All units written");
        Ok(units)
    }
}

impl std::fmt::Debug for CourseAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CourseAssembler")
            .field("progress", &self.progress.snapshot())
            .finish()
    }
}

/// Run one named build stage, emitting its start and end events.
async fn stage<T, F>(ctx: &ExecCtx, name: &'static str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    ctx.emit(Event::StageStart { stage: name });
    let result = work.await;
    ctx.emit(Event::StageEnd {
        stage: name,
        ok: result.is_ok(),
    });
    result.map_err(|e| stage_error(name, e))
}

/// Attach the failing stage to an error. Cancellation and caller mistakes
/// pass through unchanged.
fn stage_error(stage: &'static str, err: PipelineError) -> PipelineError {
    match err {
        PipelineError::Cancelled
        | PipelineError::InvalidInput(_)
        | PipelineError::InvalidConfig(_)
        | PipelineError::StageFailed { .. } => err,
        other => PipelineError::StageFailed {
            stage,
            class: classify(&other),
            reauth: other.requires_reauth(),
            message: other.to_string(),
        },
    }
}

fn mint_token() -> String {
    format!("{:08x}", fastrand::u32(..))
}

fn assemble_module(
    course_id: &str,
    build_token: &str,
    position: usize,
    title: &str,
    description: Option<&str>,
    unit: UnitContent,
) -> Module {
    let module_id = format!("m_{}_{}_{}", course_id, position, build_token);
    let lessons = vec![
        Lesson {
            lesson_id: format!("l_{}_doc", module_id),
            module_id: module_id.clone(),
            lesson_title: format!("{}: Technical Manual", title),
            duration_minutes: DOCUMENT_MINUTES,
            body: LessonBody::Document {
                content: unit.content,
            },
        },
        Lesson {
            lesson_id: format!("l_{}_quiz", module_id),
            module_id: module_id.clone(),
            lesson_title: format!("{}: Knowledge Check", title),
            duration_minutes: QUIZ_MINUTES,
            body: LessonBody::Quiz {
                quiz_questions: unit.quiz,
            },
        },
    ];
    Module {
        module_id,
        course_id: course_id.to_string(),
        module_title: title.to_string(),
        description: description.map(str::to_string),
        position,
        lessons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ErrorClass;
    use crate::types::QuizQuestion;

    #[test]
    fn module_has_manual_then_quiz() {
        let unit = UnitContent {
            content: "# Pumps".into(),
            quiz: vec![QuizQuestion::new("Q", vec!["a".into(), "b".into()], 1)],
        };
        let module = assemble_module("c_1", "abcd", 2, "Pumps", Some("Positive displacement"), unit);

        assert_eq!(module.module_id, "m_c_1_2_abcd");
        assert_eq!(module.position, 2);
        assert_eq!(module.description.as_deref(), Some("Positive displacement"));
        assert_eq!(module.lessons.len(), 2);

        let doc = &module.lessons[0];
        assert_eq!(doc.lesson_id, "l_m_c_1_2_abcd_doc");
        assert_eq!(doc.lesson_title, "Pumps: Technical Manual");
        assert_eq!(doc.duration_minutes, DOCUMENT_MINUTES);
        assert!(matches!(doc.body, LessonBody::Document { ref content } if content == "# Pumps"));

        let quiz = &module.lessons[1];
        assert_eq!(quiz.lesson_id, "l_m_c_1_2_abcd_quiz");
        assert_eq!(quiz.lesson_title, "Pumps: Knowledge Check");
        assert_eq!(quiz.duration_minutes, QUIZ_MINUTES);
        assert!(matches!(quiz.body, LessonBody::Quiz { ref quiz_questions } if quiz_questions.len() == 1));
    }

    #[test]
    fn stage_error_keeps_class_and_passes_cancellation() {
        let rate_limited = PipelineError::HttpError {
            status: 429,
            body: "quota".into(),
            retry_after: None,
        };
        match stage_error("outline", rate_limited) {
            PipelineError::StageFailed { stage, class, .. } => {
                assert_eq!(stage, "outline");
                assert_eq!(class, ErrorClass::RateLimited);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            stage_error("units", PipelineError::Cancelled),
            PipelineError::Cancelled
        ));
    }

    #[test]
    fn stage_error_decides_reauth_from_the_source_error() {
        let rejected = stage_error(
            "outline",
            PipelineError::HttpError {
                status: 401,
                body: "bad key".into(),
                retry_after: None,
            },
        );
        assert!(rejected.requires_reauth());

        let structural = stage_error(
            "outline",
            PipelineError::structural("trailing characters at line 1 column 4011"),
        );
        assert!(matches!(
            structural,
            PipelineError::StageFailed { class: ErrorClass::StructuralFailure, reauth: false, .. }
        ));
        assert!(!structural.requires_reauth());
    }

    #[test]
    fn tokens_are_hex() {
        let token = mint_token();
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
