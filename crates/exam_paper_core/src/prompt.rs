//! crates/exam_paper_core/src/prompt.rs
//!
//! Builds the completion request for a chat turn from the draft alone: system
//! notes for pending narration, the current paper state and the directive catalogue.

use crate::action::{
    Action, AddRequest, BalancedRequest, ClearRequest, DetailsRequest, NoPayload, RemoveRequest,
    SuggestCriteria, SwapRequest, TuneRequest,
};
use crate::domain::{Difficulty, Draft, Part, PartSelector, QuestionType, Role, TuneDirection};
use crate::narration::{Narration, SuggestionBundle};
use crate::ports::{CompletionMessage, CompletionRequest};
use serde_json::json;
use std::fmt::Write;

const ROLE: &str = "\
You are an assistant helping a faculty member assemble an exam question paper.
You never query or modify the question bank yourself. Instead you emit directives of the form
[ACTION: TYPE {json}] and the backend applies them after your reply. Results of those
directives reach you as System Notes at the top of the next prompt.";

const RULES: &str = "\
**Rules:**
- Relay every System Note to the faculty before addressing their new message.
- Present suggested questions with their QIDs and the part they were meant for; add them only
  after the faculty confirms which QIDs to use. A general confirmation means all of them.
- Emit at most one SUGGEST_QUESTIONS or SUGGEST_BALANCED_QUESTIONS directive per reply and
  handle Part A and Part B one after the other.
- Directive payloads must be valid JSON with double-quoted keys and strings.
- When a keyword search finds nothing, offer to search for each keyword separately.
- Use the targets from the Current Paper State when no target is given.";

/// `"s"` quoted for embedding in a note.
fn quoted(message: &str) -> String {
    format!("\"{message}\"")
}

fn suggestions_note(bundle: &SuggestionBundle) -> String {
    let part = bundle.part.map_or("?".to_string(), |p| p.to_string());
    let type_label = bundle
        .question_type
        .map(|t| format!("{t} "))
        .unwrap_or_default();
    let aimed = bundle
        .aimed_marks
        .map_or("an unspecified number of".to_string(), |m| m.to_string());

    let mut note = format!(
        "**System Note (Suggestions Found):** For Part {part} (aiming for {aimed} marks), \
         I found the following {type_label}questions, totaling {} marks:\n",
        bundle.achieved_marks
    );
    for q in &bundle.questions {
        let _ = writeln!(
            note,
            "- QID {}: {} (Type: {}, Unit: {}, Marks: {}, Diff: {}, CO: {}, BT: {})",
            q.q_id,
            q.text_summary,
            q.question_type,
            q.unit_name.as_deref().unwrap_or("N/A"),
            q.marks,
            q.difficulty,
            q.co,
            q.bt
        );
    }
    if let Some(aimed) = bundle.aimed_marks {
        let achieved = i64::from(bundle.achieved_marks);
        if achieved < aimed {
            let _ = write!(note, "This set is {} marks short of the aim. ", aimed - achieved);
        } else if achieved > aimed {
            let _ = write!(note, "This set is {} marks over the aim. ", achieved - aimed);
        }
    }
    let ids: Vec<String> = bundle.questions.iter().map(|q| q.q_id.to_string()).collect();
    let _ = write!(
        note,
        "Ask the faculty which QIDs to add. QIDs for your reference: [{}].",
        ids.join(", ")
    );
    note
}

/// One System Note per narration entry, in the order the actions ran.
pub fn system_notes(narration: &[Narration]) -> String {
    narration
        .iter()
        .map(|entry| match entry {
            Narration::Acknowledgment { message } => format!(
                "**System Note (Action Acknowledgment):** Please confirm the following to the faculty: {}",
                quoted(message)
            ),
            Narration::Suggestions(bundle) => suggestions_note(bundle),
            Narration::Violation { message, criteria } => format!(
                "**System Note (Constraint Violation):** Please inform the faculty: {} \
                 Criteria used: {}. Suggest one or two concrete changes to these criteria.",
                quoted(message),
                criteria.join(", ")
            ),
            Narration::Coverage(summary) => format!(
                "**System Note (Coverage Summary):** Here's the calculated coverage. Please present it to the faculty:\n{}",
                serde_json::to_string_pretty(summary).unwrap_or_default()
            ),
            Narration::QuestionDetails(details) => format!(
                "**System Note (Question Details):** Here are the details for QID {}. Please present them:\n{}",
                details.q_id,
                serde_json::to_string_pretty(details).unwrap_or_default()
            ),
            Narration::QuestionDetailsError { message } => format!(
                "**System Note (Question Details):** Please inform the faculty: {}",
                quoted(message)
            ),
            Narration::SwapResult { message, .. } => format!(
                "**System Note (Question Swap Result):** Please inform the faculty about the question swap: {}",
                quoted(message)
            ),
            Narration::TuneResult { message, .. } => format!(
                "**System Note (Difficulty Tune Result):** Please inform the faculty about the difficulty tuning: {}",
                quoted(message)
            ),
            Narration::FinalizeResult { message, .. } => format!(
                "**System Note (Finalize Paper Result):** Please inform the faculty: {}",
                quoted(message)
            ),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The targets, fill levels and selected ids of both parts.
pub fn paper_state(draft: &Draft) -> String {
    let constraints = &draft.constraints;
    let mut state = format!(
        "**Current Paper State:**\n- Course: {} (ID: {})\n- Target Total Marks: {}\n",
        draft.course_name,
        draft.course_id,
        constraints
            .total_marks
            .map_or("not set".to_string(), |m| m.to_string())
    );
    for part in [Part::A, Part::B] {
        let ids: Vec<String> = draft.part(part).iter().map(|id| id.to_string()).collect();
        let _ = writeln!(
            state,
            "- Part {part} Target Marks: {}, Current Questions (IDs): [{}] (Currently {} Marks)",
            constraints.part_target(part).unwrap_or(0),
            ids.join(", "),
            constraints.current_marks(part)
        );
    }
    let _ = write!(
        state,
        "- Current Constraints Defined: {}",
        serde_json::to_string(constraints).unwrap_or_default()
    );
    state
}

/// Example directives for every action type, rendered by the same encoder the
/// decoder mirrors.
pub fn action_catalogue(draft: &Draft) -> String {
    let target_b = draft.constraints.part_target(Part::B);
    let examples = [
        (
            "Update paper settings",
            Action::UpdateConstraints(
                json!({"total_marks": 75, "part_a_total_marks": 15, "part_b_total_marks": 60, "exam_type": "SEE"})
                    .as_object()
                    .cloned()
                    .unwrap_or_default(),
            ),
        ),
        (
            "Suggest questions by criteria",
            Action::SuggestQuestions(SuggestCriteria {
                part: Some(Part::A),
                count: Some(2),
                question_type: Some(QuestionType::Quiz),
                difficulty_level: Some(Difficulty::Easy),
                keywords: Some("linked list".to_string()),
                ..SuggestCriteria::default()
            }),
        ),
        (
            "Suggest a set filling a part's marks",
            Action::SuggestBalancedQuestions(BalancedRequest {
                part: Part::B,
                target_marks: target_b,
                question_type: None,
                difficulty_level: None,
                keywords: None,
            }),
        ),
        (
            "Add confirmed questions",
            Action::AddQuestions(AddRequest {
                part: Part::A,
                q_ids: vec![201, 202],
            }),
        ),
        (
            "Remove a question",
            Action::RemoveQuestion(RemoveRequest {
                part: Part::A,
                q_id: 123,
            }),
        ),
        (
            "Clear a part (A, B or All)",
            Action::ClearSelectedQuestions(ClearRequest {
                part: PartSelector::All,
            }),
        ),
        (
            "Replace one question",
            Action::SwapQuestion(SwapRequest {
                part: Part::A,
                q_id_to_remove: 123,
                new_question_criteria: SuggestCriteria {
                    marks: Some(2),
                    unit_number: Some(1),
                    ..SuggestCriteria::default()
                },
            }),
        ),
        (
            "Make a part harder or easier",
            Action::TuneDifficulty(TuneRequest {
                part: Part::B,
                direction: TuneDirection::Harder,
            }),
        ),
        ("Report coverage", Action::CalculateCoverage(NoPayload {})),
        (
            "Explain one question",
            Action::GetQuestionDetails(DetailsRequest {
                q_id: Some(json!(789)),
            }),
        ),
        ("Finalize the paper", Action::FinalizePaper(NoPayload {})),
    ];

    let mut catalogue = String::from("**Available Directives:**\n");
    for (purpose, action) in examples {
        let _ = writeln!(catalogue, "- {purpose}: {}", action.to_directive());
    }
    catalogue.push_str(
        "Question attributes: type (Quiz, MCQ, Test), marks, difficulty_level (Easy, Medium, Hard), \
         co (e.g. CO1), bt (e.g. Apply), unit_number, text__icontains (space separated words, all must match).",
    );
    catalogue
}

/// The last user message of the conversation, if any.
fn faculty_message(draft: &Draft) -> &str {
    draft
        .conversation_history
        .iter()
        .rev()
        .find(|turn| turn.role == Role::User)
        .map_or("", |turn| turn.content.as_str())
}

pub fn build_system_prompt(draft: &Draft) -> String {
    let mut sections = vec![
        format!(
            "{ROLE}\nThe paper is for the course '{}' (Course ID: {}).",
            draft.course_name, draft.course_id
        ),
    ];
    let notes = system_notes(&draft.metadata.pending_narration);
    if !notes.is_empty() {
        sections.push(notes);
    }
    sections.push(paper_state(draft));
    sections.push(action_catalogue(draft));
    sections.push(RULES.to_string());
    sections.push(format!(
        "The faculty's current message is: {}",
        quoted(faculty_message(draft))
    ));
    sections.join("\n\n")
}

/// The full request for the next assistant reply. The history must already end
/// with the faculty's new message.
pub fn build_request(draft: &Draft) -> CompletionRequest {
    CompletionRequest {
        system_prompt: build_system_prompt(draft),
        history: draft
            .conversation_history
            .iter()
            .map(|turn| CompletionMessage {
                role: turn.role,
                content: turn.content.clone(),
            })
            .collect(),
    }
}
