use serde::{Deserialize, Serialize};

/// Unit titles (and optional one-line descriptions) for a new course.
///
/// Created once per build from the outline call and consumed immediately by
/// the assembler; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurriculumOutline {
    pub titles: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub descriptions: Vec<String>,
}

impl CurriculumOutline {
    /// Description for the unit at `index`, if the service supplied one.
    pub fn description(&self, index: usize) -> Option<&str> {
        self.descriptions
            .get(index)
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
    }
}

/// One multiple-choice question.
///
/// Accepts both `correctIndex` (service output) and `correct_index`
/// (persisted form) on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizQuestion {
    #[serde(rename = "question", alias = "prompt")]
    pub prompt: String,

    pub options: Vec<String>,

    #[serde(rename = "correctIndex", alias = "correct_index")]
    pub correct_index: usize,
}

impl QuizQuestion {
    pub fn new(prompt: impl Into<String>, options: Vec<String>, correct_index: usize) -> Self {
        Self {
            prompt: prompt.into(),
            options,
            correct_index,
        }
    }

    /// The option value marked correct, if the index is in range.
    pub fn correct_option(&self) -> Option<&str> {
        self.options.get(self.correct_index).map(String::as_str)
    }
}

/// Instructional body plus quiz for one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitContent {
    pub content: String,

    #[serde(default)]
    pub quiz: Vec<QuizQuestion>,
}

/// Coarse position of a build, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    Idle,
    Outline,
    Thumbnail,
    Units,
    Persisting,
    Done,
    Failed,
}

/// Immutable snapshot of build progress.
///
/// Published by atomic replace; readers always see a whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationProgress {
    pub units_completed: usize,
    pub units_total: usize,
    pub status_message: String,
    pub phase: BuildPhase,
}

impl Default for GenerationProgress {
    fn default() -> Self {
        Self {
            units_completed: 0,
            units_total: 0,
            status_message: String::new(),
            phase: BuildPhase::Idle,
        }
    }
}

impl GenerationProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.units_total == 0 {
            0.0
        } else {
            self.units_completed as f64 / self.units_total as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Draft,
    #[default]
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    #[default]
    Advanced,
}

/// Lesson payload, tagged by `lesson_type` in serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "lesson_type", rename_all = "lowercase")]
pub enum LessonBody {
    Document { content: String },
    Quiz { quiz_questions: Vec<QuizQuestion> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub lesson_id: String,
    pub module_id: String,
    pub lesson_title: String,
    pub duration_minutes: u32,
    #[serde(flatten)]
    pub body: LessonBody,
}

/// One course unit as persisted: a document lesson followed by a quiz lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub module_id: String,
    pub course_id: String,
    pub module_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub position: usize,
    pub lessons: Vec<Lesson>,
}

/// The structure handed to the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub course_id: String,
    pub course_name: String,
    pub short_description: String,
    pub thumbnail_url: String,
    #[serde(default)]
    pub status: CourseStatus,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub modules: Vec<Module>,
}

impl Course {
    /// Ids of every lesson in the course, in module order.
    pub fn lesson_ids(&self) -> impl Iterator<Item = &str> {
        self.modules
            .iter()
            .flat_map(|m| m.lessons.iter())
            .map(|l| l.lesson_id.as_str())
    }
}
