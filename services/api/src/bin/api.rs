//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, FilePaperRenderer, OpenAiCompletionAdapter},
    config::Config,
    error::ApiError,
    web::{build_router, AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use exam_paper_core::session::DraftSession;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = DbAdapter::new(db_pool);
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let completion_adapter = Arc::new(OpenAiCompletionAdapter::new(
        Client::with_config(openai_config),
        config.completion_model.clone(),
    ));
    let renderer = Arc::new(FilePaperRenderer::new(config.generated_papers_dir.clone()));
    info!(
        "Papers are written to {}",
        config.generated_papers_dir.display()
    );

    // --- 4. Build the Shared AppState ---
    let session = DraftSession::new(
        Arc::new(db_adapter.clone()),
        Arc::new(db_adapter.clone()),
        Arc::new(db_adapter),
        completion_adapter,
        renderer,
    );
    let app_state = Arc::new(AppState {
        session: Arc::new(session),
        config: config.clone(),
    });

    // --- 5. Create the Web Router ---
    let app = build_router(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
