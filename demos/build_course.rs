//! Example: build a course end to end.
//!
//! Uses the Gemini backend when `GEMINI_API_KEY` is set, otherwise a
//! scripted mock whose second unit needs a retry and whose thumbnail falls
//! back to the image service.
//!
//! Run with: `RUST_LOG=curriculum_forge=debug cargo run --example build_course -- "Arc Flash Safety"`

use curriculum_forge::backend::gemini::GEMINI_BASE_URL;
use curriculum_forge::{
    CourseAssembler, Event, ExecCtx, FnEventHandler, InMemoryCourseStore, LessonBody, MockBackend,
    MockReply, PipelineSettings,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const OUTLINE: &str = r#"{"titles": ["Hazard Analysis", "PPE Categories", "Energized Work Permits"]}"#;

const UNIT: &str = r##"```json
{"content": "# Manual\n\n## Fundamentals\nIncident energy is measured in cal/cm2.", "quiz": [
  {"question": "Incident energy unit?", "options": ["cal/cm2", "volts", "ohms", "lux"], "correctIndex": 0},
  {"question": "PPE category for 8 cal/cm2?", "options": ["0", "1", "2", "4"], "correctIndex": 2},
  {"question": "Who signs the permit?", "options": ["Anyone", "Qualified person", "Visitor", "Nobody"], "correctIndex": 1}
]}
```"##;

fn mock() -> MockBackend {
    MockBackend::new(vec![
        MockReply::text(OUTLINE),
        MockReply::text(UNIT),
        MockReply::RateLimited,
        MockReply::text(&UNIT[..UNIT.len() - 20]),
        MockReply::text(UNIT),
    ])
    .with_images(vec![MockReply::RateLimited])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("curriculum_forge=info")),
        )
        .init();

    let topic = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Arc Flash Safety".to_string());

    let on_event = Arc::new(FnEventHandler(|event: Event| match event {
        Event::Retry { label, attempt, max_attempts, delay, .. } => {
            println!("  retry {} ({}/{}) in {:?}", label, attempt, max_attempts, delay)
        }
        Event::UnitEnd { index, title, outcome } => {
            println!("  unit {} {:?}: {}", index + 1, outcome, title)
        }
        _ => {}
    }));

    let builder = ExecCtx::builder(GEMINI_BASE_URL).event_handler(on_event);
    let ctx = if std::env::var("GEMINI_API_KEY").is_ok() {
        builder.settings(PipelineSettings::default()).build()?
    } else {
        println!("GEMINI_API_KEY not set, using a scripted mock backend");
        builder
            .backend(Arc::new(mock()))
            .settings(PipelineSettings::default().without_delays())
            .build()?
    };

    let store = Arc::new(InMemoryCourseStore::new());
    let assembler = CourseAssembler::new(store.clone());

    let mut progress = assembler.progress();
    tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let snapshot = progress.borrow_and_update().clone();
            println!(
                "[{:>3.0}%] {}",
                snapshot.fraction() * 100.0,
                snapshot.status_message
            );
        }
    });

    let build = match assembler.build_course(&ctx, &topic).await {
        Ok(build) => build,
        Err(err) => {
            eprintln!("{}", err.user_message());
            return Err(err.into());
        }
    };

    let course = &build.course;
    println!("\n{} ({})", course.course_name, course.course_id);
    println!("thumbnail: {:.80}", course.thumbnail_url);
    for module in &course.modules {
        println!("  {}. {}", module.position + 1, module.module_title);
        for lesson in &module.lessons {
            let detail = match &lesson.body {
                LessonBody::Document { content } => format!("{} chars", content.len()),
                LessonBody::Quiz { quiz_questions } => format!("{} questions", quiz_questions.len()),
            };
            println!("     - {} [{} min, {}]", lesson.lesson_title, lesson.duration_minutes, detail);
        }
    }
    if build.report.is_degraded() {
        println!(
            "\ndegraded: {} placeholder units, thumbnail fallback: {}",
            build.report.fallback_units(),
            build.report.thumbnail_fallback
        );
    }
    println!("stored courses: {}", store.courses().await.len());
    Ok(())
}
