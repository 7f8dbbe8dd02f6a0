use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use curriculum_forge::{
    BuildPhase, Course, CourseAssembler, CourseStore, ErrorClass, Event, ExecCtx, FnEventHandler,
    InMemoryCourseStore, LessonBody, MockBackend, MockReply, PipelineError, PipelineSettings,
    UnitOutcome,
};
use tokio_test::assert_ok;

const OUTLINE: &str = r#"{"titles": ["Bonding", "Grounding", "Arc Flash"],
    "descriptions": ["Equipotential bonding", "Earth electrodes", "Incident energy"]}"#;

const UNIT: &str = r##"```json
{"content": "# Manual\n\n## Procedure\n1. Isolate.\n2. Verify.", "quiz": [
  {"question": "First step?", "options": ["Isolate", "Verify", "Energize", "Report"], "correctIndex": 0},
  {"question": "Second step?", "options": ["Isolate", "Verify", "Energize", "Report"], "correctIndex": 1},
  {"question": "Never do?", "options": ["Isolate", "Verify", "Energize live", "Report"], "correctIndex": 2}
]}
```"##;

/// Decodes to `{"content": null}` after repair: a structural failure.
const TRUNCATED: &str = r#"{"content": "#;

struct Harness {
    ctx: ExecCtx,
    mock: Arc<MockBackend>,
    store: Arc<InMemoryCourseStore>,
    assembler: CourseAssembler,
}

fn harness(mock: MockBackend, settings: PipelineSettings) -> Harness {
    let mock = Arc::new(mock);
    let store = Arc::new(InMemoryCourseStore::new());
    let ctx = ExecCtx::builder("http://unused")
        .backend(mock.clone())
        .settings(settings)
        .build()
        .unwrap();
    let assembler = CourseAssembler::new(store.clone());
    Harness {
        ctx,
        mock,
        store,
        assembler,
    }
}

fn fast() -> PipelineSettings {
    PipelineSettings::default().without_delays()
}

fn text(replies: &[&str]) -> Vec<MockReply> {
    replies.iter().map(|r| MockReply::text(*r)).collect()
}

#[tokio::test(start_paused = true)]
async fn unit_recovers_after_two_structural_failures() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT, TRUNCATED, TRUNCATED, UNIT, UNIT]))
        .with_images(vec![MockReply::png("iVBORw0KGgo=")]);
    let h = harness(mock, PipelineSettings::default());
    let progress = h.assembler.progress();

    let started = tokio::time::Instant::now();
    let build = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap();

    // Two inter-unit cooldowns plus the 5s and 10s backoffs inside unit 2.
    assert!(started.elapsed() >= Duration::from_secs(4 + 4 + 5 + 10));
    assert_eq!(h.mock.text_calls(), 6);

    assert_eq!(build.report.fallback_units(), 0);
    assert!(!build.report.is_degraded());
    assert_eq!(build.report.units.len(), 3);
    let second = &build.report.units[1];
    assert_eq!(second.outcome, UnitOutcome::Decoded);
    assert_eq!(second.transport_retries, 2);
    assert_eq!(second.unit_attempts, 1);

    let course = &build.course;
    assert!(course.course_id.starts_with("c_"));
    assert_eq!(course.short_description, "Enterprise technical track for Electrical Safety.");
    assert_eq!(course.thumbnail_url, "data:image/png;base64,iVBORw0KGgo=");
    let titles: Vec<&str> = course.modules.iter().map(|m| m.module_title.as_str()).collect();
    assert_eq!(titles, vec!["Bonding", "Grounding", "Arc Flash"]);
    assert_eq!(course.modules[1].description.as_deref(), Some("Earth electrodes"));
    match &course.modules[0].lessons[1].body {
        LessonBody::Quiz { quiz_questions } => {
            assert_eq!(quiz_questions.len(), 3);
            assert_eq!(quiz_questions[0].correct_option(), Some("Isolate"));
        }
        other => panic!("expected quiz lesson, got {:?}", other),
    }

    assert_eq!(h.store.get(&course.course_id).await.as_ref(), Some(course));
    let last = progress.borrow().clone();
    assert_eq!(last.phase, BuildPhase::Done);
    assert_eq!((last.units_completed, last.units_total), (3, 3));
}

#[tokio::test(start_paused = true)]
async fn thumbnail_rate_limit_falls_back_to_image_service() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT])).with_images(vec![MockReply::RateLimited]);
    let h = harness(mock, PipelineSettings::default());

    let build = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap();

    assert_eq!(h.mock.image_calls(), 3);
    assert!(build.report.thumbnail_fallback);
    assert_eq!(build.report.fallback_units(), 0);
    let url = &build.course.thumbnail_url;
    assert!(url.starts_with("https://image.pollinations.ai/prompt/Professional%20industrial%20photography%20of%20Electrical%20Safety"));
    assert!(url.contains("width=1280&height=720&seed="));
    assert_eq!(build.course.modules.len(), 3);
}

#[tokio::test]
async fn exhausted_unit_gets_fallback_and_build_succeeds() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT, "I'm unable to produce that."]));
    let h = harness(mock, fast());

    let build = assert_ok!(h.assembler.build_course(&h.ctx, "Electrical Safety").await);

    assert_eq!(build.report.fallback_units(), 2);
    assert_eq!(build.report.degraded_units(), vec!["Grounding", "Arc Flash"]);
    assert_eq!(build.report.units[1].unit_attempts, 3);
    // 1 outline + 1 good unit + 2 units * 3 attempts * 3 calls
    assert_eq!(h.mock.text_calls(), 20);

    let module = &build.course.modules[2];
    match (&module.lessons[0].body, &module.lessons[1].body) {
        (LessonBody::Document { content }, LessonBody::Quiz { quiz_questions }) => {
            assert!(content.contains("Arc Flash"));
            assert_eq!(quiz_questions.len(), 1);
            assert_eq!(quiz_questions[0].correct_index, 0);
        }
        other => panic!("unexpected lessons {:?}", other),
    }
    assert!(h
        .assembler
        .progress()
        .borrow()
        .status_message
        .contains("2 of 3 units use placeholder content"));
}

#[tokio::test]
async fn regeneration_keeps_identity_and_resets_progress() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT, UNIT, UNIT, OUTLINE, UNIT]));
    let h = harness(mock, fast());
    let first = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap().course;

    let lesson = first.modules[0].lessons[0].lesson_id.clone();
    h.store
        .record_completion(&first.course_id, "learner-1", &lesson)
        .await
        .unwrap();
    assert_eq!(h.store.completions(&first.course_id).await.len(), 1);

    let mut edited = first.clone();
    edited.short_description = "Custom description".into();
    let second = h.assembler.regenerate_course(&h.ctx, &edited).await.unwrap().course;

    assert_eq!(second.course_id, first.course_id);
    assert_eq!(second.course_name, first.course_name);
    assert_eq!(second.short_description, "Custom description");
    assert_ne!(second.modules[0].module_id, first.modules[0].module_id);
    assert!(h.store.completions(&first.course_id).await.is_empty());
    assert_eq!(h.store.get(&first.course_id).await, Some(second));
    assert_eq!(h.store.courses().await.len(), 1);
}

/// Stores courses but cannot clear learner progress.
struct ResetRejectingStore {
    inner: InMemoryCourseStore,
}

#[async_trait]
impl CourseStore for ResetRejectingStore {
    async fn upsert_course(&self, course: &Course) -> curriculum_forge::Result<()> {
        self.inner.upsert_course(course).await
    }

    async fn reset_progress(&self, _course_id: &str) -> curriculum_forge::Result<()> {
        Err(PipelineError::Persistence("db down".into()))
    }
}

#[tokio::test]
async fn failed_progress_reset_fails_regeneration() {
    let mock = Arc::new(MockBackend::new(text(&[OUTLINE, UNIT])));
    let ctx = ExecCtx::builder("http://unused")
        .backend(mock)
        .settings(fast())
        .build()
        .unwrap();
    let store = Arc::new(ResetRejectingStore {
        inner: InMemoryCourseStore::new(),
    });
    let assembler = CourseAssembler::new(store.clone());
    let progress = assembler.progress();

    let err = assembler
        .regenerate_course(&ctx, &stored_course("c_a"))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::StageFailed { stage: "reset progress", .. }));
    let snapshot = progress.borrow().clone();
    assert_eq!(snapshot.phase, BuildPhase::Failed);
    assert!(snapshot.status_message.contains("db down"));
}

#[tokio::test]
async fn bulk_regeneration_continues_past_structural_outline_failures() {
    // Padding pushes the decoder's column number past 4000.
    let payload = format!("{{\"titles\": {}[1]}}", " ".repeat(3998));
    let mock = MockBackend::fixed(&payload);
    let h = harness(mock, fast());
    let courses = vec![stored_course("c_a"), stored_course("c_b")];

    let results = h.assembler.regenerate_all(&h.ctx, &courses).await;

    assert_eq!(results.len(), 2);
    for (_, result) in &results {
        let err = result.as_ref().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StageFailed { class: ErrorClass::StructuralFailure, .. }
        ));
        assert!(!err.requires_reauth());
        assert!(!err.user_message().contains("Sign in again"));
    }
}

#[tokio::test]
async fn outline_failure_of_class_other_is_not_retried() {
    let mock = MockBackend::new(vec![MockReply::Fail("internal error".into())]);
    let h = harness(mock, fast());
    let progress = h.assembler.progress();

    let err = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap_err();

    match &err {
        PipelineError::StageFailed { stage, class, .. } => {
            assert_eq!(*stage, "outline");
            assert_eq!(*class, ErrorClass::Other);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(h.mock.text_calls(), 1);
    assert_eq!(h.mock.image_calls(), 0);
    assert!(h.store.courses().await.is_empty());
    assert_eq!(progress.borrow().phase, BuildPhase::Failed);
}

#[tokio::test]
async fn outline_rate_limit_exhaustion_reports_rate_limit() {
    let mock = MockBackend::new(vec![MockReply::RateLimited]);
    let h = harness(mock, fast());

    let err = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap_err();

    assert_eq!(h.mock.text_calls(), 3);
    assert!(err.user_message().contains("rate limiting"));
    assert!(!err.requires_reauth());
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_cooldown_stops_build() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT]));
    let h = harness(mock, PipelineSettings::default());
    let token = h.ctx.cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        token.cancel();
    });

    let err = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled));
    // Units 1 and 2 ran; the cooldown before unit 3 was interrupted.
    assert_eq!(h.mock.text_calls(), 3);
    assert!(h.store.courses().await.is_empty());
    let progress = h.assembler.progress().borrow().clone();
    assert_eq!(progress.phase, BuildPhase::Failed);
    assert_eq!(progress.status_message, "Generation was cancelled.");
}

#[tokio::test]
async fn rejected_credentials_during_units_propagate() {
    let mock = MockBackend::new(vec![MockReply::text(OUTLINE), MockReply::Unauthorized]);
    let h = harness(mock, fast());

    let err = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap_err();

    assert!(err.requires_reauth());
    assert!(err.user_message().contains("Sign in again"));
    assert_eq!(h.mock.text_calls(), 2);
    assert!(h.store.courses().await.is_empty());
}

#[tokio::test]
async fn persistence_failure_is_fatal() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT]));
    let h = harness(mock, fast());
    h.store.reject_writes(true);

    let err = h.assembler.build_course(&h.ctx, "Electrical Safety").await.unwrap_err();
    assert!(matches!(err, PipelineError::StageFailed { stage: "persist", .. }));
}

#[tokio::test]
async fn events_follow_build_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let mock = Arc::new(MockBackend::new(text(&[OUTLINE, UNIT])));
    let store = Arc::new(InMemoryCourseStore::new());
    let ctx = ExecCtx::builder("http://unused")
        .backend(mock)
        .settings(fast())
        .event_handler(Arc::new(FnEventHandler(move |e: Event| {
            sink.lock().unwrap().push(e);
        })))
        .build()
        .unwrap();

    CourseAssembler::new(store)
        .build_course(&ctx, "Electrical Safety")
        .await
        .unwrap();

    let events = events.lock().unwrap();
    let stages: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::StageStart { stage } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(stages, vec!["outline", "thumbnail", "units", "persist"]);

    let cooldowns = events
        .iter()
        .filter(|e| matches!(e, Event::Cooldown { kind: "inter-unit", .. }))
        .count();
    assert_eq!(cooldowns, 2);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ThumbnailFallback { .. })));
    let unit_ends = events
        .iter()
        .filter(|e| matches!(e, Event::UnitEnd { outcome: UnitOutcome::Decoded, .. }))
        .count();
    assert_eq!(unit_ends, 3);
}

fn stored_course(id: &str) -> Course {
    Course {
        course_id: id.to_string(),
        course_name: "Hydraulics".into(),
        short_description: "Enterprise technical track for Hydraulics.".into(),
        thumbnail_url: String::new(),
        status: Default::default(),
        difficulty: Default::default(),
        modules: Vec::new(),
    }
}

#[tokio::test]
async fn bulk_regeneration_continues_past_ordinary_failures() {
    let mock = MockBackend::new(vec![MockReply::Fail("internal error".into())]);
    let h = harness(mock, fast());
    let courses = vec![stored_course("c_a"), stored_course("c_b"), stored_course("c_c")];

    let results = h.assembler.regenerate_all(&h.ctx, &courses).await;

    let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["c_a", "c_b", "c_c"]);
    assert!(results.iter().all(|(_, r)| r.is_err()));
}

#[tokio::test]
async fn bulk_regeneration_stops_on_rejected_credentials() {
    let mock = MockBackend::new(vec![MockReply::Unauthorized]);
    let h = harness(mock, fast());
    let courses = vec![stored_course("c_a"), stored_course("c_b")];

    let results = h.assembler.regenerate_all(&h.ctx, &courses).await;

    assert_eq!(results.len(), 1);
    assert!(results[0].1.as_ref().unwrap_err().requires_reauth());
}

#[tokio::test]
async fn bulk_regeneration_rebuilds_each_course() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT, UNIT, UNIT, OUTLINE, UNIT]));
    let h = harness(mock, fast());
    let courses = vec![stored_course("c_a"), stored_course("c_b")];

    let results = h.assembler.regenerate_all(&h.ctx, &courses).await;

    assert_eq!(results.len(), 2);
    for (id, result) in &results {
        let build = result.as_ref().unwrap();
        assert_eq!(&build.course.course_id, id);
        assert_eq!(build.course.modules.len(), 3);
    }
    assert_eq!(h.store.upsert_count(), 2);
}

#[tokio::test]
async fn thumbnail_refresh_updates_only_the_image() {
    let mock = MockBackend::new(text(&[OUTLINE, UNIT]));
    let h = harness(mock, fast());
    let course = h.assembler.build_course(&h.ctx, "Hydraulics").await.unwrap().course;
    assert!(course.thumbnail_url.starts_with("https://"));

    let refreshed_mock = Arc::new(MockBackend::fixed("{}").with_images(vec![MockReply::png("QUJD")]));
    let ctx = ExecCtx::builder("http://unused")
        .backend(refreshed_mock)
        .settings(fast())
        .build()
        .unwrap();
    let updated = h.assembler.refresh_thumbnail(&ctx, &course).await.unwrap();

    assert_eq!(updated.thumbnail_url, "data:image/png;base64,QUJD");
    assert_eq!(updated.modules, course.modules);
    assert_eq!(h.store.get(&course.course_id).await, Some(updated));
}

#[tokio::test]
async fn blank_topic_rejected() {
    let h = harness(MockBackend::fixed(OUTLINE), fast());
    let err = h.assembler.build_course(&h.ctx, "  ").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
    assert_eq!(h.mock.text_calls(), 0);
}
