//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use exam_paper_core::session::DraftSession;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<DraftSession>,
    pub config: Arc<Config>,
}
