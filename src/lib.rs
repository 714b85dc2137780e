//! blobvault: a small binary-object store. Uploads are split into
//! fixed-size chunks in SQLite alongside a catalog of per-file metadata, and
//! served back over an axum HTTP API.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use axum::Router;
use state::AppState;

/// Router with state attached, ready to serve.
pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    routes::routes::routes(max_upload_bytes).with_state(state)
}
