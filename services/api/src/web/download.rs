//! services/api/src/web/download.rs
//!
//! Serves rendered papers to the faculty member whose draft produced them.

use crate::error::ApiError;
use crate::web::middleware::CurrentUser;
use crate::web::protocol::DownloadQuery;
use crate::web::state::AppState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Extension,
};
use exam_paper_core::session::SessionError;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use uuid::Uuid;

/// Validates a client supplied paper path and joins it onto `root`.
///
/// Returns the normalized relative path (as recorded on the draft) and the file
/// location. Absolute paths, parent references and names that are not paper files
/// are rejected.
pub fn resolve_download_path(root: &Path, requested: &str) -> Result<(String, PathBuf), ApiError> {
    let normalized = requested.trim().replace('\\', "/");
    if normalized.is_empty() {
        return Err(ApiError::BadRequest("path is required".to_string()));
    }
    if normalized.starts_with('/') {
        return Err(ApiError::BadRequest("Invalid file path.".to_string()));
    }

    let relative = Path::new(&normalized);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return Err(ApiError::BadRequest("Invalid file path.".to_string()));
    }

    let is_paper = relative
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.contains("_draft_"));
    if !is_paper {
        return Err(ApiError::BadRequest("Invalid file name.".to_string()));
    }

    Ok((normalized.clone(), root.join(relative)))
}

/// Download a generated paper.
#[utoipa::path(
    get,
    path = "/papers/download",
    params(
        crate::web::protocol::DownloadQuery,
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    ),
    responses(
        (status = 200, description = "The paper file, sent as an attachment"),
        (status = 400, description = "Invalid path"),
        (status = 403, description = "The paper belongs to another user"),
        (status = 404, description = "File not found")
    )
)]
pub async fn download_paper_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(CurrentUser(user_id)): Extension<CurrentUser>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let (relative, full_path) =
        resolve_download_path(&app_state.config.generated_papers_dir, &query.path)?;

    if !app_state.session.owns_paper(user_id, &relative).await? {
        warn!(%user_id, path = %relative, "download of a foreign paper refused");
        return Err(SessionError::Forbidden.into());
    }

    let file = match tokio::fs::File::open(&full_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("File not found.".to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    info!(%user_id, path = %relative, "serving paper");

    let file_name = full_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("paper.txt")
        .replace('"', "");
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, no-store, must-revalidate"),
            ),
            (header::PRAGMA, HeaderValue::from_static("no-cache")),
            (header::EXPIRES, HeaderValue::from_static("0")),
        ],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_paper_name() {
        let (relative, full) =
            resolve_download_path(Path::new("/srv/papers"), "QP_CS101_draft_1_20240101.txt").unwrap();
        assert_eq!(relative, "QP_CS101_draft_1_20240101.txt");
        assert_eq!(full, PathBuf::from("/srv/papers/QP_CS101_draft_1_20240101.txt"));
    }

    #[test]
    fn backslashes_are_normalized() {
        let (relative, _) =
            resolve_download_path(Path::new("/srv/papers"), "2024\\QP_CS101_draft_1.txt").unwrap();
        assert_eq!(relative, "2024/QP_CS101_draft_1.txt");
    }

    #[test]
    fn traversal_is_rejected() {
        for path in ["../QP_x_draft_1.txt", "a/../../QP_x_draft_1.txt", "..\\QP_x_draft_1.txt"] {
            assert!(matches!(
                resolve_download_path(Path::new("/srv"), path),
                Err(ApiError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn absolute_and_empty_paths_are_rejected() {
        assert!(resolve_download_path(Path::new("/srv"), "/etc/QP_draft_1.txt").is_err());
        assert!(resolve_download_path(Path::new("/srv"), "  ").is_err());
    }

    #[test]
    fn only_paper_files_are_served() {
        assert!(matches!(
            resolve_download_path(Path::new("/srv"), "notes.txt"),
            Err(ApiError::BadRequest(_))
        ));
    }
}
