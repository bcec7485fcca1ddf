//! crates/exam_paper_core/src/memory.rs
//!
//! In-process implementations of the ports. They back the unit tests and can run
//! the service without a database or a model.

use crate::constraints::Constraints;
use crate::domain::{Course, Draft, DraftMetadata, DraftStatus, FacultyProfile, NewDraft, Question, QuestionId};
use crate::ports::{
    Completion, CompletionRequest, DraftRepository, FacultyDirectory, PaperRenderer, PaperRequest,
    PortError, PortResult, QuestionBank, QuestionFilter, RenderError, RenderedPaper,
    TextCompletionService,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError, RwLock};
use uuid::Uuid;

fn poisoned<T>(_: PoisonError<T>) -> PortError {
    PortError::Unexpected("in-memory store lock poisoned".to_string())
}

//=========================================================================================
// Drafts
//=========================================================================================

#[derive(Default)]
pub struct InMemoryDraftStore {
    drafts: RwLock<HashMap<Uuid, Draft>>,
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drafts(drafts: impl IntoIterator<Item = Draft>) -> Self {
        Self {
            drafts: RwLock::new(drafts.into_iter().map(|d| (d.id, d)).collect()),
        }
    }

    /// Copy of every stored draft.
    pub fn snapshot(&self) -> PortResult<Vec<Draft>> {
        Ok(self.drafts.read().map_err(poisoned)?.values().cloned().collect())
    }
}

#[async_trait]
impl DraftRepository for InMemoryDraftStore {
    async fn get_draft(&self, draft_id: Uuid) -> PortResult<Draft> {
        self.drafts
            .read()
            .map_err(poisoned)?
            .get(&draft_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Draft with id {draft_id} not found")))
    }

    async fn find_draft(
        &self,
        user_id: Uuid,
        course_id: &str,
        status: DraftStatus,
    ) -> PortResult<Option<Draft>> {
        Ok(self
            .drafts
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|d| d.user_id == user_id && d.course_id == course_id && d.status == status)
            .max_by_key(|d| d.updated_at)
            .cloned())
    }

    async fn create_draft(&self, new_draft: NewDraft) -> PortResult<Draft> {
        let now = Utc::now();
        let draft = Draft {
            id: Uuid::new_v4(),
            user_id: new_draft.user_id,
            course_id: new_draft.course.id,
            course_name: new_draft.course.name,
            constraints: new_draft.constraints,
            part_a_question_ids: Vec::new(),
            part_b_question_ids: Vec::new(),
            conversation_history: Vec::new(),
            metadata: DraftMetadata::default(),
            status: DraftStatus::Drafting,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        self.drafts
            .write()
            .map_err(poisoned)?
            .insert(draft.id, draft.clone());
        Ok(draft)
    }

    async fn save_draft(&self, draft: &Draft) -> PortResult<Draft> {
        let mut drafts = self.drafts.write().map_err(poisoned)?;
        let stored = drafts
            .get_mut(&draft.id)
            .ok_or_else(|| PortError::NotFound(format!("Draft with id {} not found", draft.id)))?;
        if stored.version != draft.version {
            return Err(PortError::Conflict(format!(
                "Draft {} was modified concurrently (expected version {}, found {})",
                draft.id, draft.version, stored.version
            )));
        }

        let mut saved = draft.clone();
        saved.version += 1;
        saved.updated_at = Utc::now();
        *stored = saved.clone();
        Ok(saved)
    }

    async fn list_drafts_for_user(
        &self,
        user_id: Uuid,
        status: Option<DraftStatus>,
    ) -> PortResult<Vec<Draft>> {
        let mut drafts: Vec<Draft> = self
            .drafts
            .read()
            .map_err(poisoned)?
            .values()
            .filter(|d| d.user_id == user_id && status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        drafts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(drafts)
    }
}

//=========================================================================================
// Question bank and faculty
//=========================================================================================

#[derive(Default)]
pub struct InMemoryQuestionBank {
    courses: HashMap<String, Course>,
    questions: Vec<Question>,
}

impl InMemoryQuestionBank {
    /// A bank holding `questions`. Their courses are registered with the course id as name.
    pub fn with_questions(questions: Vec<Question>) -> Self {
        let courses = questions
            .iter()
            .map(|q| {
                let course = Course {
                    id: q.course_id.clone(),
                    name: q.course_id.clone(),
                };
                (course.id.clone(), course)
            })
            .collect();
        Self { courses, questions }
    }

    pub fn with_course(mut self, course: Course) -> Self {
        self.courses.insert(course.id.clone(), course);
        self
    }
}

#[async_trait]
impl QuestionBank for InMemoryQuestionBank {
    async fn get_course(&self, course_id: &str) -> PortResult<Course> {
        self.courses
            .get(course_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Course with id {course_id} not found")))
    }

    async fn find_questions(&self, filter: &QuestionFilter) -> PortResult<Vec<Question>> {
        let mut found: Vec<Question> = self
            .questions
            .iter()
            .filter(|q| filter.matches(q))
            .cloned()
            .collect();
        found.sort_by_key(|q| q.id);
        Ok(found)
    }

    async fn get_question(&self, question_id: QuestionId) -> PortResult<Question> {
        self.questions
            .iter()
            .find(|q| q.id == question_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Question with id {question_id} not found")))
    }

    async fn get_questions(&self, question_ids: &[QuestionId]) -> PortResult<Vec<Question>> {
        Ok(self
            .questions
            .iter()
            .filter(|q| question_ids.contains(&q.id))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryFacultyDirectory {
    profiles: HashMap<Uuid, FacultyProfile>,
}

impl InMemoryFacultyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, profile: FacultyProfile) -> Self {
        self.profiles.insert(profile.user_id, profile);
        self
    }
}

#[async_trait]
impl FacultyDirectory for InMemoryFacultyDirectory {
    async fn get_faculty_profile(&self, user_id: Uuid) -> PortResult<Option<FacultyProfile>> {
        Ok(self.profiles.get(&user_id).cloned())
    }
}

//=========================================================================================
// Completion and rendering
//=========================================================================================

/// Replays canned completions in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedCompletion {
    replies: Mutex<VecDeque<PortResult<Completion>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(Completion::Text(text.into())))
    }

    pub fn with_outcome(self, outcome: PortResult<Completion>) -> Self {
        self.push(outcome)
    }

    fn push(self, outcome: PortResult<Completion>) -> Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(outcome);
        }
        self
    }

    pub fn requests(&self) -> PortResult<Vec<CompletionRequest>> {
        Ok(self.requests.lock().map_err(poisoned)?.clone())
    }
}

#[async_trait]
impl TextCompletionService for ScriptedCompletion {
    async fn complete(&self, request: &CompletionRequest) -> PortResult<Completion> {
        self.requests.lock().map_err(poisoned)?.push(request.clone());
        self.replies
            .lock()
            .map_err(poisoned)?
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Unexpected("no scripted completion left".to_string())))
    }
}

/// Keeps rendered requests in memory instead of writing files.
#[derive(Default)]
pub struct RecordingRenderer {
    failure: Option<String>,
    rendered: Mutex<Vec<PaperRequest>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A renderer whose every call fails with a layout error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn rendered(&self) -> PortResult<Vec<PaperRequest>> {
        Ok(self.rendered.lock().map_err(poisoned)?.clone())
    }
}

#[async_trait]
impl PaperRenderer for RecordingRenderer {
    async fn render_paper(&self, request: &PaperRequest) -> Result<RenderedPaper, RenderError> {
        if let Some(message) = &self.failure {
            return Err(RenderError::Template(message.clone()));
        }
        let file_name = format!(
            "QP_{}_draft_{}.txt",
            request.metadata.course_code, request.draft_id
        );
        self.rendered
            .lock()
            .map_err(|_| RenderError::Template("recorder lock poisoned".to_string()))?
            .push(request.clone());
        Ok(RenderedPaper {
            relative_path: file_name.clone(),
            file_name,
        })
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

/// A small course with a known question set, shared by tests across the workspace.
pub mod fixtures {
    use super::*;
    use crate::domain::{Difficulty, QuestionType, Unit};

    pub const COURSE_ID: &str = "CS101";
    pub const COURSE_NAME: &str = "Data Structures";

    pub fn user_id() -> Uuid {
        Uuid::from_u128(1)
    }

    pub fn course() -> Course {
        Course {
            id: COURSE_ID.to_string(),
            name: COURSE_NAME.to_string(),
        }
    }

    pub fn faculty_profile() -> FacultyProfile {
        FacultyProfile {
            user_id: user_id(),
            name: "Dr. Ada Rao".to_string(),
            department: Some("Computer Science".to_string()),
        }
    }

    /// A fresh drafting draft for [`course`] with the initial constraints.
    pub fn draft() -> Draft {
        let now = Utc::now();
        Draft {
            id: Uuid::from_u128(100),
            user_id: user_id(),
            course_id: COURSE_ID.to_string(),
            course_name: COURSE_NAME.to_string(),
            constraints: Constraints::initial(),
            part_a_question_ids: Vec::new(),
            part_b_question_ids: Vec::new(),
            conversation_history: Vec::new(),
            metadata: DraftMetadata::default(),
            status: DraftStatus::Drafting,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn unit(number: i32) -> Unit {
        let name = match number {
            1 => "Arrays",
            2 => "Linked Lists",
            3 => "Trees",
            _ => "Graphs",
        };
        Unit {
            number,
            name: name.to_string(),
        }
    }

    pub fn question(
        id: QuestionId,
        question_type: QuestionType,
        marks: u32,
        difficulty: Difficulty,
        co: &str,
        bt: &str,
        unit_number: i32,
    ) -> Question {
        Question {
            id,
            course_id: COURSE_ID.to_string(),
            unit: Some(unit(unit_number)),
            text: format!("{question_type} question {id} on {}", unit(unit_number).name),
            marks,
            question_type,
            difficulty,
            co: co.to_string(),
            bt: bt.to_string(),
        }
    }

    /// A medium Part B question of the given marks.
    pub fn test_question(id: QuestionId, marks: u32) -> Question {
        question(id, QuestionType::Test, marks, Difficulty::Medium, "CO1", "Apply", 1)
    }

    pub fn sample_questions() -> Vec<Question> {
        use Difficulty::{Easy, Hard, Medium};
        use QuestionType::{Mcq, Quiz, Test};

        let mut questions = vec![
            question(1, Quiz, 1, Easy, "CO1", "Remember", 1),
            question(2, Mcq, 1, Easy, "CO1", "Understand", 1),
            question(3, Quiz, 2, Medium, "CO2", "Apply", 2),
            question(4, Mcq, 2, Hard, "CO2", "Apply", 2),
            question(5, Quiz, 2, Easy, "CO3", "Remember", 3),
            question(6, Quiz, 2, Medium, "CO3", "Understand", 3),
            question(7, Quiz, 1, Hard, "CO1", "Analyze", 1),
            question(10, Test, 10, Easy, "CO1", "Apply", 1),
            question(11, Test, 10, Medium, "CO2", "Analyze", 2),
            question(12, Test, 10, Hard, "CO2", "Evaluate", 2),
            question(13, Test, 5, Easy, "CO3", "Understand", 3),
            question(14, Test, 5, Medium, "CO3", "Apply", 3),
            question(15, Test, 5, Hard, "CO4", "Create", 4),
            question(16, Test, 8, Medium, "CO4", "Analyze", 4),
            question(17, Test, 12, Hard, "CO4", "Evaluate", 4),
        ];
        questions.push(Question {
            id: 90,
            course_id: "MA201".to_string(),
            unit: None,
            text: "Prove that the harmonic series diverges".to_string(),
            marks: 10,
            question_type: Test,
            difficulty: Medium,
            co: "CO1".to_string(),
            bt: "Evaluate".to_string(),
        });
        questions
    }

    /// Bank with the sample questions and the named course.
    pub fn question_bank() -> InMemoryQuestionBank {
        InMemoryQuestionBank::with_questions(sample_questions()).with_course(course())
    }
}
