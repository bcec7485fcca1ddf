//! crates/exam_paper_core/src/engine.rs
//!
//! Applies the actions of an assistant reply to a draft.

use crate::action::{parse_directives, Action};
use crate::domain::Draft;
use crate::mutator;
use crate::narration::Narration;
use crate::ports::{FacultyDirectory, PaperRenderer, PortResult, QuestionBank};
use crate::selector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, instrument};

/// Status recorded when a reply carried no usable directive.
pub const NO_ACTION_STATUS: &str = "No specific action parsed from AI reply.";

/// Dispatches decoded actions to the selector and mutator.
pub struct ActionEngine<'a> {
    questions: &'a dyn QuestionBank,
    faculty: &'a dyn FacultyDirectory,
    renderer: &'a dyn PaperRenderer,
    rng: StdRng,
}

impl<'a> ActionEngine<'a> {
    pub fn new(
        questions: &'a dyn QuestionBank,
        faculty: &'a dyn FacultyDirectory,
        renderer: &'a dyn PaperRenderer,
    ) -> Self {
        Self::with_rng(questions, faculty, renderer, StdRng::from_entropy())
    }

    /// Same as [`ActionEngine::new`] with a caller-supplied generator, for reproducible picks.
    pub fn with_rng(
        questions: &'a dyn QuestionBank,
        faculty: &'a dyn FacultyDirectory,
        renderer: &'a dyn PaperRenderer,
        rng: StdRng,
    ) -> Self {
        Self {
            questions,
            faculty,
            renderer,
            rng,
        }
    }

    /// Applies one action and returns its narration.
    pub async fn apply(&mut self, draft: &mut Draft, action: &Action) -> PortResult<Narration> {
        let bank = self.questions;
        match action {
            Action::UpdateConstraints(payload) => {
                mutator::update_constraints(bank, draft, payload).await
            }
            Action::SuggestQuestions(criteria) => {
                selector::suggest_questions(bank, draft, criteria, &mut self.rng).await
            }
            Action::SuggestBalancedQuestions(request) => {
                selector::suggest_balanced(bank, draft, request, &mut self.rng).await
            }
            Action::AddQuestions(request) => Ok(mutator::add_questions(bank, draft, request)
                .await?
                .narration()),
            Action::RemoveQuestion(request) => mutator::remove_question(bank, draft, request).await,
            Action::ClearSelectedQuestions(request) => {
                mutator::clear_selected(bank, draft, request).await
            }
            Action::SwapQuestion(request) => {
                mutator::swap_question(bank, draft, request, &mut self.rng).await
            }
            Action::TuneDifficulty(request) => {
                mutator::tune_difficulty(bank, draft, request, &mut self.rng).await
            }
            Action::CalculateCoverage(_) => mutator::coverage(bank, draft).await,
            Action::GetQuestionDetails(request) => {
                mutator::question_details(bank, draft, request).await
            }
            Action::FinalizePaper(_) => {
                mutator::finalize_paper(bank, self.faculty, self.renderer, draft).await
            }
        }
    }

    /// Parses `reply` and applies its actions in order. Narration from the previous
    /// pass is replaced. Returns the number of applied actions.
    #[instrument(skip(self, draft, reply), fields(draft_id = %draft.id))]
    pub async fn process_reply(&mut self, draft: &mut Draft, reply: &str) -> PortResult<usize> {
        let parsed = parse_directives(reply);
        draft.metadata.clear_narration();
        draft.metadata.last_actions = parsed.actions.clone();
        draft.metadata.unknown_actions.extend(parsed.rejected);

        if parsed.actions.is_empty() {
            draft.metadata.last_action_status = Some(NO_ACTION_STATUS.to_string());
            return Ok(0);
        }

        let mut statuses = Vec::with_capacity(parsed.actions.len());
        for action in &parsed.actions {
            let narration = self.apply(draft, action).await?;
            statuses.push(format!("{}: {}", action.kind(), narration.status_line()));
            draft.metadata.pending_narration.push(narration);
            // Finalizing ends the draft; anything after it is ignored.
            if draft.is_finalized() {
                break;
            }
        }
        mutator::refresh_current_marks(self.questions, draft).await?;

        draft.metadata.last_action_status = Some(statuses.join(" | "));
        info!(applied = statuses.len(), "assistant actions applied");
        Ok(statuses.len())
    }

    /// Applies the trailing assistant turn if it has not been applied yet.
    /// Returns the number of actions applied, zero when there was nothing to do.
    pub async fn apply_pending_reply(&mut self, draft: &mut Draft) -> PortResult<usize> {
        let Some(index) = draft.unapplied_assistant_turn() else {
            return Ok(0);
        };
        let reply = draft.conversation_history[index].content.clone();
        let applied = self.process_reply(draft, &reply).await?;
        draft.metadata.applied_reply_turn = Some(index);
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DraftStatus, Role};
    use crate::memory::{fixtures, InMemoryFacultyDirectory, RecordingRenderer};

    fn seeded<'a>(
        bank: &'a dyn QuestionBank,
        faculty: &'a dyn FacultyDirectory,
        renderer: &'a dyn PaperRenderer,
    ) -> ActionEngine<'a> {
        ActionEngine::with_rng(bank, faculty, renderer, StdRng::seed_from_u64(11))
    }

    #[tokio::test]
    async fn reply_actions_are_applied_in_order() {
        let bank = fixtures::question_bank();
        let faculty = InMemoryFacultyDirectory::new();
        let renderer = RecordingRenderer::new();
        let mut engine = seeded(&bank, &faculty, &renderer);
        let mut draft = fixtures::draft();

        let reply = r#"Adding them now.
            [ACTION: ADD_QUESTIONS {"part": "A", "q_ids": [1, 3]}]
            [ACTION: REMOVE_QUESTION {"part": "A", "q_id": 1}]
            [ACTION: CALCULATE_COVERAGE]"#;
        let applied = engine.process_reply(&mut draft, reply).await.unwrap();

        assert_eq!(applied, 3);
        assert_eq!(draft.part_a_question_ids, vec![3]);
        assert_eq!(draft.constraints.part_a_current_marks, 2);
        assert_eq!(draft.metadata.pending_narration.len(), 3);
        assert!(matches!(draft.metadata.pending_narration[2], Narration::Coverage(_)));
        assert_eq!(draft.metadata.last_actions.len(), 3);
    }

    #[tokio::test]
    async fn reply_without_actions_records_status() {
        let bank = fixtures::question_bank();
        let faculty = InMemoryFacultyDirectory::new();
        let renderer = RecordingRenderer::new();
        let mut engine = seeded(&bank, &faculty, &renderer);
        let mut draft = fixtures::draft();
        draft.metadata.pending_narration.push(Narration::ack("old"));

        let applied = engine
            .process_reply(&mut draft, "Sure. [ACTION: MAKE_COFFEE {}]")
            .await
            .unwrap();

        assert_eq!(applied, 0);
        assert!(draft.metadata.pending_narration.is_empty());
        assert_eq!(draft.metadata.unknown_actions, vec!["MAKE_COFFEE".to_string()]);
        assert_eq!(draft.metadata.last_action_status.as_deref(), Some(NO_ACTION_STATUS));
    }

    #[tokio::test]
    async fn pending_reply_is_applied_once() {
        let bank = fixtures::question_bank();
        let faculty = InMemoryFacultyDirectory::new();
        let renderer = RecordingRenderer::new();
        let mut engine = seeded(&bank, &faculty, &renderer);
        let mut draft = fixtures::draft();
        draft.push_turn(Role::User, "add 10 to part B");
        draft.push_turn(
            Role::Assistant,
            r#"[ACTION: ADD_QUESTIONS {"part": "B", "q_ids": [10]}]"#,
        );

        assert_eq!(engine.apply_pending_reply(&mut draft).await.unwrap(), 1);
        assert_eq!(engine.apply_pending_reply(&mut draft).await.unwrap(), 0);
        assert_eq!(draft.part_b_question_ids, vec![10]);
        assert_eq!(draft.metadata.pending_narration.len(), 1);
    }

    #[tokio::test]
    async fn finalize_stops_further_actions() {
        let bank = fixtures::question_bank();
        let faculty = InMemoryFacultyDirectory::new().with_profile(fixtures::faculty_profile());
        let renderer = RecordingRenderer::new();
        let mut engine = seeded(&bank, &faculty, &renderer);
        let mut draft = fixtures::draft();
        draft.part_a_question_ids = vec![1];

        let reply = r#"[ACTION: FINALIZE_PAPER] [ACTION: ADD_QUESTIONS {"part": "A", "q_ids": [2]}]"#;
        let applied = engine.process_reply(&mut draft, reply).await.unwrap();

        assert_eq!(applied, 1);
        assert_eq!(draft.status, DraftStatus::Finalized);
        assert_eq!(draft.part_a_question_ids, vec![1]);
    }
}
