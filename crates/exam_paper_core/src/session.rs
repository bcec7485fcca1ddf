//! crates/exam_paper_core/src/session.rs
//!
//! Orchestrates a chat turn against a draft: apply leftover actions, record the
//! faculty message, ask the assistant, apply the reply's actions, persist.

use crate::action::{Action, NoPayload};
use crate::constraints::Constraints;
use crate::domain::{Draft, DraftStatus, NewDraft, Role};
use crate::engine::ActionEngine;
use crate::narration::Narration;
use crate::ports::{
    Completion, DraftRepository, FacultyDirectory, PaperRenderer, PortError, QuestionBank,
    TextCompletionService,
};
use crate::prompt::build_request;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Sent by the UI when it reopens a draft; answered without calling the model.
pub const RESUME_SESSION_MESSAGE: &str = "SYSTEM_RESUME_SESSION_FETCH_DETAILS";

const EMPTY_REPLY: &str =
    "AI could not generate a response. Please try rephrasing your request.";
const FAILED_REPLY: &str =
    "Sorry, I ran into a problem while preparing a response. Please try again in a moment.";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Draft {0} not found")]
    DraftNotFound(Uuid),
    #[error("Course {0} not found")]
    CourseNotFound(String),
    #[error("Access to this draft is forbidden")]
    Forbidden,
    #[error("Either a draft id or a course id is required")]
    MissingTarget,
    #[error("Draft {0} is finalized and can no longer be edited")]
    Finalized(Uuid),
    #[error(transparent)]
    Port(#[from] PortError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// How a chat request names its draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftLocator {
    ById(Uuid),
    /// The user's in-progress draft for the course, created when missing.
    /// `new_session` resets an existing one instead of resuming it.
    ByCourse { course_id: String, new_session: bool },
}

impl DraftLocator {
    /// Builds a locator from the optional ids of a request. A bare course id starts a
    /// new session, as the UI sends it only when a course is picked afresh.
    pub fn from_request(draft_id: Option<Uuid>, course_id: Option<String>) -> SessionResult<Self> {
        match (draft_id, course_id) {
            (Some(id), _) => Ok(DraftLocator::ById(id)),
            (None, Some(course_id)) => Ok(DraftLocator::ByCourse {
                course_id,
                new_session: true,
            }),
            (None, None) => Err(SessionError::MissingTarget),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub draft: Draft,
    pub reply: String,
}

/// Entry point used by the transport layer.
pub struct DraftSession {
    drafts: Arc<dyn DraftRepository>,
    questions: Arc<dyn QuestionBank>,
    faculty: Arc<dyn FacultyDirectory>,
    completion: Arc<dyn TextCompletionService>,
    renderer: Arc<dyn PaperRenderer>,
    rng_seed: Option<u64>,
}

impl DraftSession {
    pub fn new(
        drafts: Arc<dyn DraftRepository>,
        questions: Arc<dyn QuestionBank>,
        faculty: Arc<dyn FacultyDirectory>,
        completion: Arc<dyn TextCompletionService>,
        renderer: Arc<dyn PaperRenderer>,
    ) -> Self {
        Self {
            drafts,
            questions,
            faculty,
            completion,
            renderer,
            rng_seed: None,
        }
    }

    /// Makes question picks reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    fn engine(&self) -> ActionEngine<'_> {
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        ActionEngine::with_rng(
            self.questions.as_ref(),
            self.faculty.as_ref(),
            self.renderer.as_ref(),
            rng,
        )
    }

    /// Loads a draft of `user_id`. Drafts of other users are reported as missing.
    pub async fn get_owned_draft(&self, user_id: Uuid, draft_id: Uuid) -> SessionResult<Draft> {
        let draft = match self.drafts.get_draft(draft_id).await {
            Ok(draft) => draft,
            Err(PortError::NotFound(_)) => return Err(SessionError::DraftNotFound(draft_id)),
            Err(e) => return Err(e.into()),
        };
        if draft.user_id != user_id {
            warn!(%draft_id, %user_id, "draft requested by a user who does not own it");
            return Err(SessionError::DraftNotFound(draft_id));
        }
        Ok(draft)
    }

    /// Finds the draft a request refers to, creating or resetting it as needed.
    pub async fn resolve_draft(&self, user_id: Uuid, locator: &DraftLocator) -> SessionResult<Draft> {
        let (course_id, new_session) = match locator {
            DraftLocator::ById(id) => return self.get_owned_draft(user_id, *id).await,
            DraftLocator::ByCourse {
                course_id,
                new_session,
            } => (course_id, *new_session),
        };

        let course = match self.questions.get_course(course_id).await {
            Ok(course) => course,
            Err(PortError::NotFound(_)) => return Err(SessionError::CourseNotFound(course_id.clone())),
            Err(e) => return Err(e.into()),
        };

        match self
            .drafts
            .find_draft(user_id, course_id, DraftStatus::Drafting)
            .await?
        {
            Some(mut draft) if new_session => {
                info!(draft_id = %draft.id, %course_id, "resetting in-progress draft for a new session");
                draft.reset(Constraints::initial());
                draft.course_name = course.name;
                Ok(self.drafts.save_draft(&draft).await?)
            }
            Some(draft) => Ok(draft),
            None => {
                let draft = self
                    .drafts
                    .create_draft(NewDraft {
                        user_id,
                        course,
                        constraints: Constraints::initial(),
                    })
                    .await?;
                info!(draft_id = %draft.id, %course_id, "created draft");
                Ok(draft)
            }
        }
    }

    /// Resolves a draft for display or resumption and drops narration left over
    /// from an earlier session.
    pub async fn open_draft(&self, user_id: Uuid, locator: &DraftLocator) -> SessionResult<Draft> {
        let mut draft = self.resolve_draft(user_id, locator).await?;
        if draft.metadata.pending_narration.is_empty() {
            return Ok(draft);
        }
        draft.metadata.clear_narration();
        Ok(self.drafts.save_draft(&draft).await?)
    }

    /// Creates a draft for a course, or returns the in-progress one. With `reset`
    /// the in-progress draft is emptied first.
    pub async fn create_draft(&self, user_id: Uuid, course_id: &str, reset: bool) -> SessionResult<Draft> {
        let locator = DraftLocator::ByCourse {
            course_id: course_id.to_string(),
            new_session: reset,
        };
        self.open_draft(user_id, &locator).await
    }

    /// One faculty message and the assistant's answer.
    #[instrument(skip(self, locator, message))]
    pub async fn chat_turn(
        &self,
        user_id: Uuid,
        locator: &DraftLocator,
        message: &str,
    ) -> SessionResult<ChatOutcome> {
        if message.trim() == RESUME_SESSION_MESSAGE {
            let resume = match locator {
                DraftLocator::ByCourse { course_id, .. } => DraftLocator::ByCourse {
                    course_id: course_id.clone(),
                    new_session: false,
                },
                by_id => by_id.clone(),
            };
            let draft = self.open_draft(user_id, &resume).await?;
            let reply = format!(
                "Welcome back to your session for {}! How would you like to continue with your question paper?",
                draft.course_name
            );
            return Ok(ChatOutcome { draft, reply });
        }

        let mut draft = self.resolve_draft(user_id, locator).await?;
        if draft.is_finalized() {
            return Err(SessionError::Finalized(draft.id));
        }
        let mut engine = self.engine();

        // A reply persisted without its actions applied is handled before the new message.
        engine.apply_pending_reply(&mut draft).await?;

        draft.push_turn(Role::User, message);
        let request = build_request(&draft);

        let (reply, actionable) = match self.completion.complete(&request).await {
            Ok(Completion::Text(text)) if !text.trim().is_empty() => (text, true),
            Ok(Completion::Text(_)) => (EMPTY_REPLY.to_string(), false),
            Ok(Completion::Blocked { reason }) => {
                warn!(draft_id = %draft.id, %reason, "completion blocked");
                (format!("AI response blocked. Reason: {reason}"), false)
            }
            Err(e) => {
                error!(draft_id = %draft.id, error = %e, "completion failed");
                (FAILED_REPLY.to_string(), false)
            }
        };

        draft.push_turn(Role::Assistant, reply.clone());
        if actionable {
            engine.apply_pending_reply(&mut draft).await?;
        } else {
            // Nothing to apply; keep the earlier narration for the next attempt.
            draft.metadata.applied_reply_turn = draft.conversation_history.len().checked_sub(1);
        }

        let draft = self.drafts.save_draft(&draft).await?;
        Ok(ChatOutcome { draft, reply })
    }

    /// Finalizes a draft outside of a chat turn. The outcome is also queued as
    /// narration so the assistant mentions it on the next turn.
    pub async fn finalize(&self, user_id: Uuid, draft_id: Uuid) -> SessionResult<(Draft, Narration)> {
        let mut draft = self.get_owned_draft(user_id, draft_id).await?;
        let mut engine = self.engine();

        let narration = engine
            .apply(&mut draft, &Action::FinalizePaper(NoPayload {}))
            .await?;
        draft.metadata.clear_narration();
        draft.metadata.pending_narration.push(narration.clone());
        draft.metadata.last_action_status = Some(narration.status_line());

        let draft = self.drafts.save_draft(&draft).await?;
        Ok((draft, narration))
    }

    /// In-progress drafts of a user, most recently updated first.
    pub async fn list_in_progress(&self, user_id: Uuid) -> SessionResult<Vec<Draft>> {
        Ok(self
            .drafts
            .list_drafts_for_user(user_id, Some(DraftStatus::Drafting))
            .await?)
    }

    /// Whether one of the user's drafts produced the paper at `relative_path`.
    pub async fn owns_paper(&self, user_id: Uuid, relative_path: &str) -> SessionResult<bool> {
        let drafts = self.drafts.list_drafts_for_user(user_id, None).await?;
        Ok(drafts
            .iter()
            .any(|d| d.metadata.generated_paper_path.as_deref() == Some(relative_path)))
    }
}
