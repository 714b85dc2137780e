//! src/services/retrieval_service.rs
//!
//! RetrievalService: read side of the store: metadata lookups, listings,
//! inline image streaming and caller-facing deletes.

use super::{
    catalog::ObjectCatalog,
    chunk_store::{ChunkStore, ChunkStream},
    store_error::{StoreError, StoreResult},
};
use crate::models::stored_object::StoredObject;
use futures::{StreamExt, stream};
use tracing::info;
use uuid::Uuid;

/// Content types that may be streamed back for inline display.
pub const INLINE_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(Clone)]
pub struct RetrievalService {
    catalog: ObjectCatalog,
    chunks: ChunkStore,
}

impl RetrievalService {
    pub fn new(catalog: ObjectCatalog, chunks: ChunkStore) -> Self {
        Self { catalog, chunks }
    }

    pub async fn get_metadata(&self, filename: &str) -> StoreResult<StoredObject> {
        self.catalog.find_by_filename(filename).await
    }

    /// Every committed record in insertion order.
    ///
    /// An empty catalog is reported as `StoreError::Empty` rather than an
    /// empty list.
    pub async fn list_all(&self) -> StoreResult<Vec<StoredObject>> {
        let objects = self.catalog.list().await?;
        if objects.is_empty() {
            return Err(StoreError::Empty);
        }
        Ok(objects)
    }

    /// Resolve `filename` and open a lazy stream over its payload.
    ///
    /// Only allow-listed image types are streamed; anything else fails with
    /// `UnsupportedContentType` before any chunk is read.
    pub async fn stream_content(&self, filename: &str) -> StoreResult<(StoredObject, ChunkStream)> {
        let object = self.catalog.find_by_filename(filename).await?;
        if !is_inline_image(&object.content_type) {
            return Err(StoreError::UnsupportedContentType(object.content_type));
        }

        // Zero-length objects have no chunks to open a cursor over.
        if object.length == 0 {
            return Ok((object, stream::empty().boxed()));
        }

        let body = self.chunks.read(object.id, object.chunk_count()).await?;
        Ok((object, body))
    }

    /// Remove the record and chunks of `id`.
    ///
    /// Unlike the idempotent catalog and chunk deletes, an unknown id is an
    /// error here. The catalog row goes first so readers never see a record
    /// whose chunks are missing.
    pub async fn delete(&self, id: Uuid) -> StoreResult<StoredObject> {
        let object = self.catalog.find_by_id(id).await?;
        self.catalog.delete(id).await?;
        self.chunks.delete(id).await?;
        info!("deleted {} (`{}`)", object.id, object.filename);
        Ok(object)
    }
}

/// Compare the MIME essence (parameters stripped, case-insensitive).
fn is_inline_image(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    INLINE_CONTENT_TYPES
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(essence))
}
