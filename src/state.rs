//! Shared state handed to every handler.

use crate::{
    config::AppConfig,
    services::{
        catalog::ObjectCatalog, chunk_store::ChunkStore, retrieval_service::RetrievalService,
        upload_service::UploadPipeline,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite connection pool, used directly by the readiness probe.
    pub db: Arc<SqlitePool>,
    pub uploads: UploadPipeline,
    pub retrieval: RetrievalService,
}

impl AppState {
    /// Wire the catalog and chunk store over one pool.
    pub fn new(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        let catalog = ObjectCatalog::new(db.clone());
        let chunks = ChunkStore::sqlite(db.clone(), chunk_size);
        Self {
            db,
            uploads: UploadPipeline::new(catalog.clone(), chunks.clone()),
            retrieval: RetrievalService::new(catalog, chunks),
        }
    }

    pub fn from_config(db: Arc<SqlitePool>, cfg: &AppConfig) -> Self {
        Self::new(db, cfg.chunk_size)
    }
}
