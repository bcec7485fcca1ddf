//! crates/exam_paper_core/src/domain.rs
//!
//! Defines the pure, core data structures for paper drafting.
//! These structs are independent of any database or transport format; the
//! serde derives exist so drafts can be stored as opaque documents.

use crate::action::Action;
use crate::constraints::Constraints;
use crate::narration::Narration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a question in the question bank.
pub type QuestionId = i64;

/// Returned when a string does not name any variant of one of the text enums below.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{value}' is not a valid {kind}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares a fieldless enum that is written as a fixed string and parsed
/// case-insensitively (assistants are not careful about casing).
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::domain::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($text) $(|| s.eq_ignore_ascii_case($alias))* {
                        return Ok($name::$variant);
                    }
                )+
                Err($crate::domain::UnknownVariant {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::domain::UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> String {
                value.as_str().to_string()
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    /// The kind of a bank question. Quiz and MCQ items are the short Part A kinds.
    QuestionType {
        Quiz => "Quiz",
        Mcq => "MCQ",
        Test => "Test",
    }
}

text_enum! {
    Difficulty {
        Easy => "Easy",
        Medium => "Medium",
        Hard => "Hard",
    }
}

impl Difficulty {
    /// Easy=1, Medium=2, Hard=3.
    pub fn ordinal(&self) -> u8 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Medium => 2,
            Difficulty::Hard => 3,
        }
    }
}

text_enum! {
    /// One of the two sections of a paper.
    Part {
        A => "A" | "Part A",
        B => "B" | "Part B",
    }
}

impl Part {
    pub fn other(&self) -> Part {
        match self {
            Part::A => Part::B,
            Part::B => Part::A,
        }
    }
}

text_enum! {
    /// Target of a clear operation.
    PartSelector {
        A => "A" | "Part A",
        B => "B" | "Part B",
        All => "All" | "Both",
    }
}

impl PartSelector {
    pub fn includes(&self, part: Part) -> bool {
        match self {
            PartSelector::All => true,
            PartSelector::A => part == Part::A,
            PartSelector::B => part == Part::B,
        }
    }
}

text_enum! {
    TuneDirection {
        Harder => "harder",
        Easier => "easier",
    }
}

text_enum! {
    /// Draft lifecycle. The only transition is drafting -> finalized.
    DraftStatus {
        Drafting => "drafting",
        Finalized => "finalized",
    }
}

text_enum! {
    ExamType {
        Cie => "CIE",
        See => "SEE",
        Quiz => "Quiz",
        TestEvent => "Test Event",
    }
}

text_enum! {
    Role {
        User => "user",
        Assistant => "assistant",
    }
}

/// A numbered unit (chapter) of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub number: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub name: String,
}

/// A question from the bank. The engine only reads these and refers to them by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub course_id: String,
    pub unit: Option<Unit>,
    pub text: String,
    pub marks: u32,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    /// Course-outcome tag, e.g. "CO2".
    pub co: String,
    /// Bloom's-level tag, e.g. "Apply".
    pub bt: String,
}

impl Question {
    /// The first `max_chars` characters of the text, with an ellipsis when cut.
    pub fn summary(&self, max_chars: usize) -> String {
        let mut chars = self.text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{head}...")
        } else {
            head
        }
    }
}

/// The faculty member a paper is generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyProfile {
    pub user_id: Uuid,
    pub name: String,
    pub department: Option<String>,
}

/// A single entry in a draft's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Transient narration plus persisted outputs of a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftMetadata {
    /// Outcomes of the last processed actions, consumed by the next prompt.
    #[serde(default)]
    pub pending_narration: Vec<Narration>,
    #[serde(default)]
    pub last_action_status: Option<String>,
    #[serde(default)]
    pub last_actions: Vec<Action>,
    #[serde(default)]
    pub unknown_actions: Vec<String>,
    /// Index into the conversation of the last assistant turn whose actions were applied.
    #[serde(default)]
    pub applied_reply_turn: Option<usize>,
    #[serde(default)]
    pub generated_paper_path: Option<String>,
}

impl DraftMetadata {
    pub fn clear_narration(&mut self) {
        self.pending_narration.clear();
    }
}

/// The mutable aggregate for one in-progress paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft {
    pub id: Uuid,
    pub user_id: Uuid,
    pub course_id: String,
    pub course_name: String,
    pub constraints: Constraints,
    pub part_a_question_ids: Vec<QuestionId>,
    pub part_b_question_ids: Vec<QuestionId>,
    pub conversation_history: Vec<ChatTurn>,
    pub metadata: DraftMetadata,
    pub status: DraftStatus,
    /// Optimistic concurrency counter, bumped by every successful save.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Draft {
    pub fn part(&self, part: Part) -> &[QuestionId] {
        match part {
            Part::A => &self.part_a_question_ids,
            Part::B => &self.part_b_question_ids,
        }
    }

    pub fn part_mut(&mut self, part: Part) -> &mut Vec<QuestionId> {
        match part {
            Part::A => &mut self.part_a_question_ids,
            Part::B => &mut self.part_b_question_ids,
        }
    }

    /// The part currently holding `question_id`, if any.
    pub fn part_of(&self, question_id: QuestionId) -> Option<Part> {
        if self.part_a_question_ids.contains(&question_id) {
            Some(Part::A)
        } else if self.part_b_question_ids.contains(&question_id) {
            Some(Part::B)
        } else {
            None
        }
    }

    /// Part A ids followed by Part B ids.
    pub fn selected_question_ids(&self) -> Vec<QuestionId> {
        self.part_a_question_ids
            .iter()
            .chain(self.part_b_question_ids.iter())
            .copied()
            .collect()
    }

    pub fn has_selection(&self) -> bool {
        !self.part_a_question_ids.is_empty() || !self.part_b_question_ids.is_empty()
    }

    pub fn is_finalized(&self) -> bool {
        self.status == DraftStatus::Finalized
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        self.conversation_history.push(ChatTurn {
            role,
            content: content.into(),
        });
    }

    /// Index of the trailing assistant turn when its actions have not been applied yet.
    pub fn unapplied_assistant_turn(&self) -> Option<usize> {
        let last = self.conversation_history.len().checked_sub(1)?;
        let is_assistant = self.conversation_history[last].role == Role::Assistant;
        (is_assistant && self.metadata.applied_reply_turn != Some(last)).then_some(last)
    }

    /// Returns the draft to the state of a brand new one, keeping its identity.
    pub fn reset(&mut self, constraints: Constraints) {
        self.constraints = constraints;
        self.part_a_question_ids.clear();
        self.part_b_question_ids.clear();
        self.conversation_history.clear();
        self.metadata = DraftMetadata::default();
        self.status = DraftStatus::Drafting;
    }
}

/// Everything needed to create a draft.
#[derive(Debug, Clone)]
pub struct NewDraft {
    pub user_id: Uuid,
    pub course: Course,
    pub constraints: Constraints,
}
