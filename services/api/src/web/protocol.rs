//! services/api/src/web/protocol.rs
//!
//! Defines the JSON payloads exchanged between the browser client and the API server.

use chrono::{DateTime, Utc};
use exam_paper_core::domain::Draft;
use exam_paper_core::narration::Narration;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Requests
//=========================================================================================

/// One faculty message. Either `draft_id` or `course_id` must be given; a bare
/// `course_id` starts a fresh session for that course.
#[derive(Deserialize, Debug, ToSchema)]
pub struct ChatRequest {
    pub draft_id: Option<Uuid>,
    pub course_id: Option<String>,
    pub message: String,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct CreateDraftRequest {
    pub course_id: String,
    /// Empty the existing in-progress draft for this course instead of resuming it.
    #[serde(default)]
    pub reset: bool,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DownloadQuery {
    /// Path of the paper relative to the generated papers directory.
    pub path: String,
}

//=========================================================================================
// Responses
//=========================================================================================

#[derive(Serialize, Debug, ToSchema)]
pub struct ChatTurnView {
    pub role: String,
    pub content: String,
}

/// The client's view of a draft.
#[derive(Serialize, Debug, ToSchema)]
pub struct DraftView {
    pub id: Uuid,
    pub course_id: String,
    pub course_name: String,
    pub status: String,
    pub version: i64,
    #[schema(value_type = Object)]
    pub constraints: serde_json::Value,
    pub part_a_question_ids: Vec<i64>,
    pub part_b_question_ids: Vec<i64>,
    pub conversation_history: Vec<ChatTurnView>,
    pub last_action_status: Option<String>,
    pub generated_paper_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Draft> for DraftView {
    fn from(draft: &Draft) -> Self {
        Self {
            id: draft.id,
            course_id: draft.course_id.clone(),
            course_name: draft.course_name.clone(),
            status: draft.status.to_string(),
            version: draft.version,
            constraints: serde_json::to_value(&draft.constraints).unwrap_or_default(),
            part_a_question_ids: draft.part_a_question_ids.clone(),
            part_b_question_ids: draft.part_b_question_ids.clone(),
            conversation_history: draft
                .conversation_history
                .iter()
                .map(|turn| ChatTurnView {
                    role: turn.role.to_string(),
                    content: turn.content.clone(),
                })
                .collect(),
            last_action_status: draft.metadata.last_action_status.clone(),
            generated_paper_path: draft.metadata.generated_paper_path.clone(),
            created_at: draft.created_at,
            updated_at: draft.updated_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ChatResponse {
    pub draft: DraftView,
    pub ai_reply: String,
}

/// A row of the in-progress drafts list.
#[derive(Serialize, Debug, ToSchema)]
pub struct DraftSummary {
    pub id: Uuid,
    pub course_id: String,
    pub course_name: String,
    pub part_a_questions: usize,
    pub part_b_questions: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Draft> for DraftSummary {
    fn from(draft: &Draft) -> Self {
        Self {
            id: draft.id,
            course_id: draft.course_id.clone(),
            course_name: draft.course_name.clone(),
            part_a_questions: draft.part_a_question_ids.len(),
            part_b_questions: draft.part_b_question_ids.len(),
            updated_at: draft.updated_at,
        }
    }
}

#[derive(Serialize, Debug, ToSchema)]
pub struct FinalizeResponse {
    pub success: bool,
    pub message: String,
    pub path: Option<String>,
    pub draft: DraftView,
}

impl FinalizeResponse {
    pub fn new(draft: &Draft, narration: &Narration) -> Self {
        let (success, path) = match narration {
            Narration::FinalizeResult { success, path, .. } => (*success, path.clone()),
            _ => (false, None),
        };
        Self {
            success,
            message: narration.status_line(),
            path,
            draft: DraftView::from(draft),
        }
    }
}
