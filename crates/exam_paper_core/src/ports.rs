//! crates/exam_paper_core/src/ports.rs
//!
//! Defines the service contracts (traits) the draft engine depends on.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the database, the language model and the document renderer.

use crate::domain::{
    Course, Difficulty, Draft, DraftStatus, FacultyProfile, NewDraft, Part, Question, QuestionId,
    QuestionType, Role,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// The stored draft was saved by someone else since it was loaded.
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Question Filter
//=========================================================================================

/// Restriction on question marks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarksFilter {
    #[default]
    Any,
    Exact(u32),
    AtMost(u32),
    Above(u32),
}

impl MarksFilter {
    pub fn admits(&self, marks: u32) -> bool {
        match *self {
            MarksFilter::Any => true,
            MarksFilter::Exact(m) => marks == m,
            MarksFilter::AtMost(m) => marks <= m,
            MarksFilter::Above(m) => marks > m,
        }
    }
}

/// Criteria for a question-bank query. Empty collections and `None` mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuestionFilter {
    pub course_id: String,
    pub types: Vec<QuestionType>,
    pub marks: MarksFilter,
    pub difficulties: Vec<Difficulty>,
    pub co: Option<String>,
    pub bt: Option<String>,
    pub unit_number: Option<i32>,
    /// Each keyword must appear in the text (case-insensitive).
    pub keywords: Vec<String>,
    pub exclude_ids: Vec<QuestionId>,
}

impl QuestionFilter {
    pub fn for_course(course_id: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            ..Self::default()
        }
    }

    /// Reference semantics of the filter; database adapters translate it to SQL.
    pub fn matches(&self, question: &Question) -> bool {
        let text = question.text.to_lowercase();
        question.course_id == self.course_id
            && (self.types.is_empty() || self.types.contains(&question.question_type))
            && self.marks.admits(question.marks)
            && (self.difficulties.is_empty() || self.difficulties.contains(&question.difficulty))
            && self
                .co
                .as_ref()
                .map_or(true, |co| co.eq_ignore_ascii_case(&question.co))
            && self
                .bt
                .as_ref()
                .map_or(true, |bt| bt.eq_ignore_ascii_case(&question.bt))
            && self.unit_number.map_or(true, |number| {
                question.unit.as_ref().map(|u| u.number) == Some(number)
            })
            && self
                .keywords
                .iter()
                .all(|keyword| text.contains(&keyword.to_lowercase()))
            && !self.exclude_ids.contains(&question.id)
    }

    /// Human-readable list of every applied criterion, used in violation narration.
    pub fn describe(&self) -> Vec<String> {
        let mut criteria = vec![format!("course: {}", self.course_id)];
        if !self.types.is_empty() {
            let types: Vec<&str> = self.types.iter().map(|t| t.as_str()).collect();
            criteria.push(format!("type: {}", types.join("/")));
        }
        match self.marks {
            MarksFilter::Any => {}
            MarksFilter::Exact(m) => criteria.push(format!("marks: {m}")),
            MarksFilter::AtMost(m) => criteria.push(format!("marks: <= {m}")),
            MarksFilter::Above(m) => criteria.push(format!("marks: > {m}")),
        }
        if !self.difficulties.is_empty() {
            let levels: Vec<&str> = self.difficulties.iter().map(|d| d.as_str()).collect();
            criteria.push(format!("difficulty: {}", levels.join("/")));
        }
        if let Some(co) = &self.co {
            criteria.push(format!("co: {co}"));
        }
        if let Some(bt) = &self.bt {
            criteria.push(format!("bt: {bt}"));
        }
        if let Some(unit) = self.unit_number {
            criteria.push(format!("unit: {unit}"));
        }
        if !self.keywords.is_empty() {
            criteria.push(format!("text contains: {}", self.keywords.join(" + ")));
        }
        if !self.exclude_ids.is_empty() {
            criteria.push(format!("excluding {} already selected", self.exclude_ids.len()));
        }
        criteria
    }
}

//=========================================================================================
// Completion and Rendering Contracts
//=========================================================================================

/// One message sent to the completion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system_prompt: String,
    /// Conversation so far, ending with the user's new message.
    pub history: Vec<CompletionMessage>,
}

/// The outcome of a completion call that reached the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Text(String),
    /// The provider refused to answer (e.g. a safety filter).
    Blocked { reason: String },
}

/// Header information printed on a rendered paper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperMetadata {
    pub course_code: String,
    pub course_title: String,
    pub exam_date: String,
    pub max_marks: i64,
    pub duration: String,
    pub semester: String,
    pub exam_type: String,
    pub faculty_name: String,
    pub faculty_department: Option<String>,
}

/// Everything the renderer needs: header, ordered selections and full question records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRequest {
    pub draft_id: Uuid,
    pub metadata: PaperMetadata,
    pub selections: Vec<(Part, Vec<QuestionId>)>,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPaper {
    pub file_name: String,
    /// Path relative to the generated-papers root.
    pub relative_path: String,
}

/// Typed failure of the document renderer.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Faculty profile is missing")]
    MissingProfile,
    #[error("No questions selected")]
    NoQuestions,
    #[error("Could not write the paper: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not lay out the paper: {0}")]
    Template(String),
}

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DraftRepository: Send + Sync {
    async fn get_draft(&self, draft_id: Uuid) -> PortResult<Draft>;

    /// The most recently updated draft of a user for a course in the given status.
    async fn find_draft(
        &self,
        user_id: Uuid,
        course_id: &str,
        status: DraftStatus,
    ) -> PortResult<Option<Draft>>;

    async fn create_draft(&self, new_draft: NewDraft) -> PortResult<Draft>;

    /// Persists `draft` if the stored version still equals `draft.version`;
    /// returns the stored draft with its version bumped.
    async fn save_draft(&self, draft: &Draft) -> PortResult<Draft>;

    /// Drafts of a user, most recently updated first.
    async fn list_drafts_for_user(
        &self,
        user_id: Uuid,
        status: Option<DraftStatus>,
    ) -> PortResult<Vec<Draft>>;
}

#[async_trait]
pub trait QuestionBank: Send + Sync {
    async fn get_course(&self, course_id: &str) -> PortResult<Course>;

    async fn find_questions(&self, filter: &QuestionFilter) -> PortResult<Vec<Question>>;

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question>;

    /// Questions for the given ids; unknown ids are silently absent from the result.
    async fn get_questions(&self, question_ids: &[QuestionId]) -> PortResult<Vec<Question>>;
}

#[async_trait]
pub trait FacultyDirectory: Send + Sync {
    async fn get_faculty_profile(&self, user_id: Uuid) -> PortResult<Option<FacultyProfile>>;
}

#[async_trait]
pub trait TextCompletionService: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<Completion>;
}

#[async_trait]
pub trait PaperRenderer: Send + Sync {
    async fn render_paper(&self, request: &PaperRequest) -> Result<RenderedPaper, RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Unit;

    fn question() -> Question {
        Question {
            id: 4,
            course_id: "CS101".to_string(),
            unit: Some(Unit {
                number: 2,
                name: "Trees".to_string(),
            }),
            text: "Explain the rotation of an AVL tree".to_string(),
            marks: 5,
            question_type: QuestionType::Test,
            difficulty: Difficulty::Medium,
            co: "CO2".to_string(),
            bt: "Understand".to_string(),
        }
    }

    #[test]
    fn keywords_are_anded_substrings() {
        let mut filter = QuestionFilter::for_course("CS101");
        filter.keywords = vec!["avl".to_string(), "ROTATION".to_string()];
        assert!(filter.matches(&question()));

        filter.keywords.push("heap".to_string());
        assert!(!filter.matches(&question()));
    }

    #[test]
    fn marks_unit_and_exclusions_restrict() {
        let mut filter = QuestionFilter::for_course("CS101");
        filter.marks = MarksFilter::Above(2);
        filter.unit_number = Some(2);
        assert!(filter.matches(&question()));

        filter.marks = MarksFilter::AtMost(2);
        assert!(!filter.matches(&question()));

        filter.marks = MarksFilter::Any;
        filter.exclude_ids = vec![4];
        assert!(!filter.matches(&question()));
    }

    #[test]
    fn describe_lists_every_criterion() {
        let mut filter = QuestionFilter::for_course("CS101");
        filter.types = vec![QuestionType::Quiz, QuestionType::Mcq];
        filter.marks = MarksFilter::Exact(2);
        filter.co = Some("CO1".to_string());
        assert_eq!(
            filter.describe(),
            vec!["course: CS101", "type: Quiz/MCQ", "marks: 2", "co: CO1"]
        );
    }
}
