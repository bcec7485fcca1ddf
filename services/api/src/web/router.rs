//! services/api/src/web/router.rs
//!
//! Assembles the HTTP router: public and protected routes, CORS, request tracing
//! and the Swagger UI.

use crate::web::{
    download::download_paper_handler,
    middleware::require_user,
    rest::{
        chat_handler, create_draft_handler, finalize_draft_handler, get_draft_handler,
        health_handler, list_drafts_handler, ApiDoc,
    },
    state::AppState,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(super::middleware::USER_ID_HEADER),
        ]);
    match origin.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(_) => {
            warn!(%origin, "CORS_ORIGIN is not a valid header value; cross-origin requests are refused");
            layer
        }
    }
}

/// Builds the complete application router.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no identity required)
    let public_routes = Router::new().route("/health", get(health_handler));

    // Protected routes (x-user-id required)
    let protected_routes = Router::new()
        .route("/chat", post(chat_handler))
        .route("/drafts", get(list_drafts_handler).post(create_draft_handler))
        .route("/drafts/{id}", get(get_draft_handler))
        .route("/drafts/{id}/finalize", post(finalize_draft_handler))
        .route("/papers/download", get(download_paper_handler))
        .layer(axum_middleware::from_fn(require_user));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors_layer(&app_state.config.cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
}
