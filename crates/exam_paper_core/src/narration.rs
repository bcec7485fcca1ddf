//! crates/exam_paper_core/src/narration.rs
//!
//! Structured outcomes of applied actions. They are stored on the draft between
//! turns and turned into system notes when the next prompt is built.

use crate::coverage::CoverageSummary;
use crate::domain::{Difficulty, Part, Question, QuestionId, QuestionType};
use serde::{Deserialize, Serialize};

/// Length of the text excerpt shown for suggested questions.
pub const SUMMARY_CHARS: usize = 100;

/// Compact view of a question offered to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSummary {
    pub q_id: QuestionId,
    pub text_summary: String,
    pub unit_name: Option<String>,
    pub unit_number: Option<i32>,
    pub marks: u32,
    pub difficulty: Difficulty,
    pub co: String,
    pub bt: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
}

impl From<&Question> for QuestionSummary {
    fn from(question: &Question) -> Self {
        Self {
            q_id: question.id,
            text_summary: question.summary(SUMMARY_CHARS),
            unit_name: question.unit.as_ref().map(|u| u.name.clone()),
            unit_number: question.unit.as_ref().map(|u| u.number),
            marks: question.marks,
            difficulty: question.difficulty,
            co: question.co.clone(),
            bt: question.bt.clone(),
            question_type: question.question_type,
        }
    }
}

/// Candidates proposed for a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionBundle {
    pub part: Option<Part>,
    pub question_type: Option<QuestionType>,
    pub questions: Vec<QuestionSummary>,
    /// Marks the suggestion tried to fill, when a part was known.
    pub aimed_marks: Option<i64>,
    pub achieved_marks: u32,
}

/// Every attribute of one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDetails {
    pub q_id: QuestionId,
    pub text: String,
    pub course_name: String,
    pub unit_name: Option<String>,
    pub unit_number: Option<i32>,
    pub marks: u32,
    pub co: String,
    pub bt: String,
    pub difficulty_level: Difficulty,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
}

impl QuestionDetails {
    pub fn new(question: &Question, course_name: impl Into<String>) -> Self {
        Self {
            q_id: question.id,
            text: question.text.clone(),
            course_name: course_name.into(),
            unit_name: question.unit.as_ref().map(|u| u.name.clone()),
            unit_number: question.unit.as_ref().map(|u| u.number),
            marks: question.marks,
            co: question.co.clone(),
            bt: question.bt.clone(),
            difficulty_level: question.difficulty,
            question_type: question.question_type,
        }
    }
}

/// The outcome of one applied action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Narration {
    Acknowledgment { message: String },
    Suggestions(SuggestionBundle),
    /// Nothing matched; `criteria` lists every filter that was applied.
    Violation { message: String, criteria: Vec<String> },
    Coverage(CoverageSummary),
    QuestionDetails(QuestionDetails),
    QuestionDetailsError { message: String },
    SwapResult { message: String, swapped: bool },
    TuneResult { message: String, swapped: u32 },
    FinalizeResult {
        message: String,
        success: bool,
        path: Option<String>,
    },
}

impl Narration {
    pub fn ack(message: impl Into<String>) -> Self {
        Narration::Acknowledgment {
            message: message.into(),
        }
    }

    pub fn violation(message: impl Into<String>, criteria: Vec<String>) -> Self {
        Narration::Violation {
            message: message.into(),
            criteria,
        }
    }

    /// Short machine-oriented status line recorded as `last_action_status`.
    pub fn status_line(&self) -> String {
        match self {
            Narration::Acknowledgment { message } => message.clone(),
            Narration::Suggestions(bundle) => format!(
                "Prepared {} suggestions (type: {}, achieved {} marks).",
                bundle.questions.len(),
                bundle
                    .question_type
                    .map_or("any".to_string(), |t| t.to_string()),
                bundle.achieved_marks
            ),
            Narration::Violation { .. } => "No questions found; violation feedback prepared.".to_string(),
            Narration::Coverage(_) => "Coverage summary calculated.".to_string(),
            Narration::QuestionDetails(details) => {
                format!("Details for QID {} prepared.", details.q_id)
            }
            Narration::QuestionDetailsError { message }
            | Narration::SwapResult { message, .. }
            | Narration::TuneResult { message, .. }
            | Narration::FinalizeResult { message, .. } => message.clone(),
        }
    }
}
