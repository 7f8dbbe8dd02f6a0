//! Persistence boundary.
//!
//! The pipeline hands finished courses to a [`CourseStore`]. Implementations
//! are expected to replace or insert the course with its modules, lessons,
//! and quiz questions atomically. [`InMemoryCourseStore`] is a complete
//! in-process implementation, used by the demo and the tests.

use crate::error::{PipelineError, Result};
use crate::types::Course;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Storage collaborator for finished courses.
#[async_trait]
pub trait CourseStore: Send + Sync {
    /// Atomically replace or insert a course and everything under it.
    async fn upsert_course(&self, course: &Course) -> Result<()>;

    /// Delete every learner progress record attached to `course_id`.
    async fn reset_progress(&self, course_id: &str) -> Result<()>;
}

/// A learner's completion of one lesson.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRecord {
    pub learner_id: String,
    pub lesson_id: String,
}

/// Course store backed by in-process maps.
#[derive(Debug, Default)]
pub struct InMemoryCourseStore {
    courses: RwLock<HashMap<String, Course>>,
    completions: RwLock<HashMap<String, Vec<CompletionRecord>>>,
    upserts: AtomicUsize,
    reject_writes: AtomicBool,
}

impl InMemoryCourseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later upsert fail with [`PipelineError::Persistence`].
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub async fn get(&self, course_id: &str) -> Option<Course> {
        self.courses.read().await.get(course_id).cloned()
    }

    /// All stored courses, ordered by id.
    pub async fn courses(&self) -> Vec<Course> {
        let mut all: Vec<Course> = self.courses.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.course_id.cmp(&b.course_id));
        all
    }

    /// Number of successful upserts so far.
    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    /// Record that `learner_id` finished `lesson_id` of `course_id`.
    ///
    /// The lesson must exist in the stored course.
    pub async fn record_completion(
        &self,
        course_id: &str,
        learner_id: &str,
        lesson_id: &str,
    ) -> Result<()> {
        let known = self
            .courses
            .read()
            .await
            .get(course_id)
            .map(|c| c.lesson_ids().any(|id| id == lesson_id))
            .unwrap_or(false);
        if !known {
            return Err(PipelineError::Persistence(format!(
                "lesson '{}' not found in course '{}'",
                lesson_id, course_id
            )));
        }
        self.completions
            .write()
            .await
            .entry(course_id.to_string())
            .or_default()
            .push(CompletionRecord {
                learner_id: learner_id.to_string(),
                lesson_id: lesson_id.to_string(),
            });
        Ok(())
    }

    pub async fn completions(&self, course_id: &str) -> Vec<CompletionRecord> {
        self.completions
            .read()
            .await
            .get(course_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CourseStore for InMemoryCourseStore {
    async fn upsert_course(&self, course: &Course) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::Persistence(format!(
                "write rejected for course '{}'",
                course.course_id
            )));
        }
        if course.course_id.is_empty() {
            return Err(PipelineError::Persistence("course id is empty".into()));
        }
        self.courses
            .write()
            .await
            .insert(course.course_id.clone(), course.clone());
        self.upserts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            course_id = %course.course_id,
            modules = course.modules.len(),
            "course upserted"
        );
        Ok(())
    }

    async fn reset_progress(&self, course_id: &str) -> Result<()> {
        let removed = self
            .completions
            .write()
            .await
            .remove(course_id)
            .map(|records| records.len())
            .unwrap_or(0);
        tracing::info!(course_id, removed, "learner progress reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Lesson, LessonBody, Module};
    use tokio_test::{assert_err, assert_ok};

    fn course(id: &str) -> Course {
        Course {
            course_id: id.to_string(),
            course_name: "Arc Flash Safety".into(),
            short_description: "Enterprise technical track for Arc Flash Safety.".into(),
            thumbnail_url: "https://img.example/1.png".into(),
            status: Default::default(),
            difficulty: Default::default(),
            modules: vec![Module {
                module_id: format!("m_{}_0", id),
                course_id: id.to_string(),
                module_title: "PPE".into(),
                description: None,
                position: 0,
                lessons: vec![Lesson {
                    lesson_id: format!("l_m_{}_0_doc", id),
                    module_id: format!("m_{}_0", id),
                    lesson_title: "PPE: Technical Manual".into(),
                    duration_minutes: 45,
                    body: LessonBody::Document {
                        content: "# PPE".into(),
                    },
                }],
            }],
        }
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let store = InMemoryCourseStore::new();
        assert_ok!(store.upsert_course(&course("c_1")).await);
        let mut renamed = course("c_1");
        renamed.course_name = "Renamed".into();
        assert_ok!(store.upsert_course(&renamed).await);

        assert_eq!(store.courses().await.len(), 1);
        assert_eq!(store.get("c_1").await.unwrap().course_name, "Renamed");
        assert_eq!(store.upsert_count(), 2);
    }

    #[tokio::test]
    async fn completions_require_known_lesson_and_reset() {
        let store = InMemoryCourseStore::new();
        store.upsert_course(&course("c_1")).await.unwrap();

        assert_ok!(store.record_completion("c_1", "learner-7", "l_m_c_1_0_doc").await);
        assert_err!(store.record_completion("c_1", "learner-7", "l_missing").await);
        assert_eq!(store.completions("c_1").await.len(), 1);

        store.reset_progress("c_1").await.unwrap();
        assert!(store.completions("c_1").await.is_empty());
    }

    #[tokio::test]
    async fn rejected_writes_surface_as_persistence_errors() {
        let store = InMemoryCourseStore::new();
        store.reject_writes(true);
        let err = store.upsert_course(&course("c_1")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));
        assert!(store.get("c_1").await.is_none());
    }
}
