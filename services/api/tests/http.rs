//! HTTP-level tests for the drafting API.
//!
//! The router runs against the in-memory ports with a scripted assistant, so no
//! database or model access is needed.

use std::path::PathBuf;
use std::sync::Arc;

use api_lib::adapters::FilePaperRenderer;
use api_lib::config::Config;
use api_lib::web::{build_router, AppState};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use exam_paper_core::memory::{
    fixtures, InMemoryDraftStore, InMemoryFacultyDirectory, ScriptedCompletion,
};
use exam_paper_core::session::DraftSession;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

// ── Test app builder ───────────────────────────────────────────

struct TestApp {
    router: axum::Router,
    papers_dir: PathBuf,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.papers_dir);
    }
}

fn build_test_app(completion: ScriptedCompletion) -> TestApp {
    let papers_dir = std::env::temp_dir().join(format!("exam-papers-{}", Uuid::new_v4()));
    let config = Arc::new(Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: tracing::Level::INFO,
        openai_api_key: None,
        completion_model: "test-model".to_string(),
        generated_papers_dir: papers_dir.clone(),
        cors_origin: "http://localhost:5173".to_string(),
    });

    let session = DraftSession::new(
        Arc::new(InMemoryDraftStore::new()),
        Arc::new(fixtures::question_bank()),
        Arc::new(InMemoryFacultyDirectory::new().with_profile(fixtures::faculty_profile())),
        Arc::new(completion),
        Arc::new(FilePaperRenderer::new(papers_dir.clone())),
    )
    .with_rng_seed(11);

    let state = Arc::new(AppState {
        session: Arc::new(session),
        config,
    });
    TestApp {
        router: build_router(state),
        papers_dir,
    }
}

fn other_user() -> Uuid {
    Uuid::from_u128(2)
}

// ── Request helpers ────────────────────────────────────────────

async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user.to_string());
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn send_json(
    app: &TestApp,
    method: &str,
    uri: &str,
    user: Option<Uuid>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, bytes) = send(app, method, uri, user, body).await;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn start_draft(app: &TestApp) -> String {
    let (status, draft) = send_json(
        app,
        "POST",
        "/drafts",
        Some(fixtures::user_id()),
        Some(json!({ "course_id": fixtures::COURSE_ID })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    draft["id"].as_str().unwrap().to_string()
}

// ── Tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_public() {
    let app = build_test_app(ScriptedCompletion::new());
    let (status, body) = send_json(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn protected_routes_require_a_user() {
    let app = build_test_app(ScriptedCompletion::new());

    let (status, _) = send(&app, "GET", "/drafts", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/drafts")
        .header("x-user-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_applies_actions_from_the_reply() {
    let app = build_test_app(ScriptedCompletion::new().with_reply(
        r#"Adding them now. [ACTION: ADD_QUESTIONS {"part": "A", "q_ids": [1, 3]}]"#,
    ));

    let (status, body) = send_json(
        &app,
        "POST",
        "/chat",
        Some(fixtures::user_id()),
        Some(json!({ "course_id": fixtures::COURSE_ID, "message": "add 1 and 3 to part A" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["ai_reply"].as_str().unwrap().starts_with("Adding them now."));
    assert_eq!(body["draft"]["part_a_question_ids"], json!([1, 3]));
    assert_eq!(body["draft"]["constraints"]["part_a_current_marks"], 3);
    assert_eq!(body["draft"]["conversation_history"].as_array().unwrap().len(), 2);
    assert_eq!(body["draft"]["conversation_history"][0]["role"], "user");
}

#[tokio::test]
async fn resume_message_is_answered_without_the_model() {
    // An empty script fails any model call, so a reply proves none was made.
    let app = build_test_app(ScriptedCompletion::new());
    let (status, body) = send_json(
        &app,
        "POST",
        "/chat",
        Some(fixtures::user_id()),
        Some(json!({
            "course_id": fixtures::COURSE_ID,
            "message": "SYSTEM_RESUME_SESSION_FETCH_DETAILS"
        })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["ai_reply"].as_str().unwrap().starts_with("Welcome back"));
    assert!(body["draft"]["conversation_history"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn chat_needs_a_target() {
    let app = build_test_app(ScriptedCompletion::new());
    let (status, body) = send_json(
        &app,
        "POST",
        "/chat",
        Some(fixtures::user_id()),
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn chat_for_unknown_course_is_not_found() {
    let app = build_test_app(ScriptedCompletion::new());
    let (status, _) = send_json(
        &app,
        "POST",
        "/chat",
        Some(fixtures::user_id()),
        Some(json!({ "course_id": "NOPE", "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn drafts_are_listed_per_user() {
    let app = build_test_app(ScriptedCompletion::new());
    let id = start_draft(&app).await;

    let (status, mine) = send_json(&app, "GET", "/drafts", Some(fixtures::user_id()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine.as_array().unwrap().len(), 1);
    assert_eq!(mine[0]["id"], id.as_str());
    assert_eq!(mine[0]["course_name"], fixtures::COURSE_NAME);

    let (_, theirs) = send_json(&app, "GET", "/drafts", Some(other_user()), None).await;
    assert!(theirs.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn foreign_drafts_are_hidden() {
    let app = build_test_app(ScriptedCompletion::new());
    let id = start_draft(&app).await;

    let (status, _) = send_json(&app, "GET", &format!("/drafts/{id}"), Some(other_user()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        send_json(&app, "GET", &format!("/drafts/{id}"), Some(fixtures::user_id()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "drafting");
}

#[tokio::test]
async fn finalize_without_questions_keeps_the_draft_open() {
    let app = build_test_app(ScriptedCompletion::new());
    let id = start_draft(&app).await;

    let (status, body) = send_json(
        &app,
        "POST",
        &format!("/drafts/{id}/finalize"),
        Some(fixtures::user_id()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Cannot finalize. No questions added.");
    assert_eq!(body["draft"]["status"], "drafting");
}

#[tokio::test]
async fn finalized_paper_can_be_downloaded_by_its_owner_only() {
    let app = build_test_app(ScriptedCompletion::new().with_reply(
        r#"[ACTION: ADD_QUESTIONS {"part": "B", "q_ids": [10, 11]}]"#,
    ));
    let user = fixtures::user_id();

    let (_, chat) = send_json(
        &app,
        "POST",
        "/chat",
        Some(user),
        Some(json!({ "course_id": fixtures::COURSE_ID, "message": "add 10 and 11" })),
    )
    .await;
    let id = chat["draft"]["id"].as_str().unwrap().to_string();

    let (status, done) =
        send_json(&app, "POST", &format!("/drafts/{id}/finalize"), Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["success"], true);
    assert_eq!(done["draft"]["status"], "finalized");
    let path = done["path"].as_str().unwrap().to_string();

    let uri = format!("/papers/download?path={path}");
    let (status, bytes) = send(&app, "GET", &uri, Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    let document = String::from_utf8(bytes).unwrap();
    assert!(document.contains("PART B (20 Marks)"));

    let (status, _) = send(&app, "GET", &uri, Some(other_user()), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // No further edits once finalized.
    let (status, _) = send_json(
        &app,
        "POST",
        "/chat",
        Some(user),
        Some(json!({ "draft_id": id, "message": "add more" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn download_rejects_traversal() {
    let app = build_test_app(ScriptedCompletion::new());
    let (status, _) = send(
        &app,
        "GET",
        "/papers/download?path=../QP_CS101_draft_1.txt",
        Some(fixtures::user_id()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = build_test_app(ScriptedCompletion::new());
    let (status, doc) = send_json(&app, "GET", "/api-docs/openapi.json", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(doc["paths"]["/chat"].is_object());
    assert!(doc["paths"]["/papers/download"].is_object());
}
