//! Defines routes for the file store.
//!
//! ## Structure
//! - `POST   /upload`          : multipart upload (field `file`)
//! - `GET    /files`           : list every stored file
//! - `GET    /files/{filename}`: catalog record for one file
//! - `DELETE /files/{id}`      : delete a file by identifier
//! - `GET    /image/{filename}`: stream a JPEG/PNG for inline display
//! - `GET    /healthz`, `GET /readyz`: probes

use crate::{
    handlers::{
        file_handlers::{delete_file, get_file, get_image, list_files, upload_file},
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. Upload bodies may be up to `max_upload_bytes` long;
/// every other route keeps axum's default body limit.
pub fn routes(max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/upload",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(list_files))
        // `{filename}` on GET and `{id}` on DELETE share one path segment.
        .route("/files/{key}", get(get_file).delete(delete_file))
        .route("/image/{filename}", get(get_image))
}
