//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::protocol::{
    ChatRequest, ChatResponse, ChatTurnView, CreateDraftRequest, DraftSummary, DraftView,
    FinalizeResponse,
};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use exam_paper_core::session::DraftLocator;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        health_handler,
        chat_handler,
        list_drafts_handler,
        create_draft_handler,
        get_draft_handler,
        finalize_draft_handler,
        crate::web::download::download_paper_handler,
    ),
    components(
        schemas(
            ChatRequest,
            ChatResponse,
            ChatTurnView,
            CreateDraftRequest,
            DraftSummary,
            DraftView,
            FinalizeResponse
        )
    ),
    tags(
        (name = "Exam Paper Assistant API", description = "Conversational drafting of exam question papers.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "The server is up"))
)]
pub async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Send one faculty message to the drafting assistant.
///
/// The assistant's reply is returned together with the draft after all actions in
/// the reply have been applied.
#[utoipa::path(
    post,
    path = "/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply and updated draft", body = ChatResponse),
        (status = 400, description = "Neither draft_id nor course_id given"),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Draft or course not found"),
        (status = 409, description = "The draft is finalized or was changed concurrently")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn chat_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if payload.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }
    let locator = DraftLocator::from_request(payload.draft_id, payload.course_id)?;
    let outcome = app_state
        .session
        .chat_turn(user_id, &locator, &payload.message)
        .await?;

    Ok(Json(ChatResponse {
        draft: DraftView::from(&outcome.draft),
        ai_reply: outcome.reply,
    }))
}

/// List the caller's in-progress drafts, most recently updated first.
#[utoipa::path(
    get,
    path = "/drafts",
    responses(
        (status = 200, description = "In-progress drafts", body = [DraftSummary]),
        (status = 401, description = "Missing or invalid x-user-id header")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn list_drafts_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
) -> Result<Json<Vec<DraftSummary>>, ApiError> {
    let drafts = app_state.session.list_in_progress(user_id).await?;
    Ok(Json(drafts.iter().map(DraftSummary::from).collect()))
}

/// Open the caller's draft for a course, creating it when none is in progress.
#[utoipa::path(
    post,
    path = "/drafts",
    request_body = CreateDraftRequest,
    responses(
        (status = 201, description = "Draft ready", body = DraftView),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Course not found")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_draft_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Json(payload): Json<CreateDraftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let draft = app_state
        .session
        .create_draft(user_id, &payload.course_id, payload.reset)
        .await?;
    info!(draft_id = %draft.id, course_id = %draft.course_id, "draft opened");
    Ok((StatusCode::CREATED, Json(DraftView::from(&draft))))
}

/// Fetch one of the caller's drafts.
#[utoipa::path(
    get,
    path = "/drafts/{id}",
    responses(
        (status = 200, description = "The draft", body = DraftView),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Draft not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Draft id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn get_draft_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<DraftView>, ApiError> {
    let draft = app_state.session.get_owned_draft(user_id, id).await?;
    Ok(Json(DraftView::from(&draft)))
}

/// Render the paper and close the draft.
///
/// A render failure is reported with `success: false` and leaves the draft open.
#[utoipa::path(
    post,
    path = "/drafts/{id}/finalize",
    responses(
        (status = 200, description = "Finalize outcome", body = FinalizeResponse),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Draft not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Draft id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn finalize_draft_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Path(id): Path<Uuid>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let (draft, narration) = app_state.session.finalize(user_id, id).await?;
    Ok(Json(FinalizeResponse::new(&draft, &narration)))
}
