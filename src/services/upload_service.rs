//! src/services/upload_service.rs
//!
//! UploadPipeline: all-or-nothing object creation. Chunks are written
//! first, the catalog row is committed last, and any failure in between
//! (including the request being dropped mid-stream) deletes the chunks that
//! were already written.

use super::{
    catalog::ObjectCatalog,
    chunk_store::ChunkStore,
    filename::{self, OsRandom, RandomSource},
    store_error::StoreResult,
};
use crate::models::stored_object::{NewObject, StoredObject};
use bytes::Bytes;
use futures::Stream;
use std::{io, sync::Arc};
use tracing::{info, warn};
use uuid::Uuid;

/// Used when the uploader declares no content type.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Clone)]
pub struct UploadPipeline {
    catalog: ObjectCatalog,
    chunks: ChunkStore,
    random: Arc<dyn RandomSource>,
}

impl UploadPipeline {
    pub fn new(catalog: ObjectCatalog, chunks: ChunkStore) -> Self {
        Self {
            catalog,
            chunks,
            random: Arc::new(OsRandom),
        }
    }

    /// Replace the randomness behind generated filenames.
    pub fn with_random_source(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// Store `stream` as a new object and commit its catalog record.
    ///
    /// On failure no catalog row exists and the object's chunks have been
    /// removed before the error is returned.
    pub async fn upload<S>(
        &self,
        stream: S,
        content_type: Option<&str>,
        original_filename: &str,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let id = Uuid::new_v4();
        let filename = filename::generate(self.random.as_ref(), original_filename);
        let content_type = content_type
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        let mut guard = RollbackGuard::new(self.catalog.clone(), self.chunks.clone(), id);

        match self.store(id, filename, content_type, stream).await {
            Ok(object) => {
                guard.disarm();
                info!(
                    "committed {} as `{}` ({} bytes, {} chunks)",
                    object.id,
                    object.filename,
                    object.length,
                    object.chunk_count()
                );
                Ok(object)
            }
            Err(err) => {
                warn!("upload {} failed, rolling back chunks: {}", id, err);
                match self.chunks.delete(id).await {
                    Ok(()) => guard.disarm(),
                    Err(cleanup) => {
                        // Leave the guard armed for one more attempt on drop.
                        warn!("rollback of {} failed: {}", id, cleanup);
                    }
                }
                Err(err)
            }
        }
    }

    async fn store<S>(
        &self,
        id: Uuid,
        filename: String,
        content_type: String,
        stream: S,
    ) -> StoreResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let summary = self.chunks.write(id, stream).await?;
        self.catalog
            .create(NewObject {
                id,
                filename,
                content_type,
                length: summary.length as i64,
                chunk_size: self.chunks.chunk_size() as i64,
                md5: summary.md5,
            })
            .await
    }
}

/// Removes an object's catalog row and chunks if dropped while still armed.
///
/// Covers uploads whose future is dropped mid-stream, e.g. when the client
/// disconnects and the server cancels the request. The drop may land while
/// the catalog insert is already in flight, so the row goes first, then the
/// chunks; both deletes are no-ops for things that never got written.
struct RollbackGuard {
    stores: Option<(ObjectCatalog, ChunkStore)>,
    id: Uuid,
}

impl RollbackGuard {
    fn new(catalog: ObjectCatalog, chunks: ChunkStore, id: Uuid) -> Self {
        Self {
            stores: Some((catalog, chunks)),
            id,
        }
    }

    fn disarm(&mut self) {
        self.stores = None;
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some((catalog, chunks)) = self.stores.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("upload {} abandoned mid-stream, scheduling cleanup", id);
                handle.spawn(async move {
                    if let Err(err) = catalog.delete(id).await {
                        warn!("catalog cleanup of abandoned upload {} failed: {}", id, err);
                    }
                    if let Err(err) = chunks.delete(id).await {
                        warn!("chunk cleanup of abandoned upload {} failed: {}", id, err);
                    }
                });
            }
            Err(_) => warn!("upload {} abandoned outside a runtime, data left behind", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        services::{
            chunk_store::{ChunkBackend, SqliteChunkBackend},
            store_error::StoreError,
        },
    };
    use async_trait::async_trait;
    use futures::{StreamExt, stream};
    use sqlx::SqlitePool;
    use std::time::Duration;

    struct FixedRandom;

    impl RandomSource for FixedRandom {
        fn fill(&self, buf: &mut [u8]) {
            buf.fill(0x42);
        }
    }

    /// Delegates to SQLite but fails when asked to write chunk `fail_at`.
    struct FaultyBackend {
        inner: SqliteChunkBackend,
        fail_at: u32,
    }

    #[async_trait]
    impl ChunkBackend for FaultyBackend {
        async fn put_chunk(&self, files_id: Uuid, n: u32, data: Bytes) -> StoreResult<()> {
            if n == self.fail_at {
                return Err(io::Error::other("simulated write failure").into());
            }
            self.inner.put_chunk(files_id, n, data).await
        }

        async fn get_chunk(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Bytes>> {
            self.inner.get_chunk(files_id, n).await
        }

        async fn delete_chunks(&self, files_id: Uuid) -> StoreResult<u64> {
            self.inner.delete_chunks(files_id).await
        }
    }

    fn body(data: Vec<u8>) -> impl Stream<Item = io::Result<Bytes>> + Send {
        stream::once(async move { Ok(Bytes::from(data)) })
    }

    async fn total_chunks(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn total_files(pool: &SqlitePool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn pipeline(pool: &Arc<SqlitePool>, chunk_size: usize) -> UploadPipeline {
        UploadPipeline::new(
            ObjectCatalog::new(pool.clone()),
            ChunkStore::sqlite(pool.clone(), chunk_size),
        )
    }

    #[tokio::test]
    async fn ten_mebibytes_at_default_chunk_size() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 255 * 1024);

        let object = uploads
            .upload(body(vec![7u8; 10 * 1024 * 1024]), Some("image/png"), "big.png")
            .await
            .unwrap();

        assert_eq!(object.length, 10_485_760);
        assert_eq!(object.chunk_size, 261_120);
        assert_eq!(object.chunk_count(), 41);
        assert_eq!(total_chunks(&pool).await, 41);
        assert!(object.filename.ends_with(".png"));
    }

    #[tokio::test]
    async fn zero_length_upload_commits() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 16);

        let object = uploads
            .upload(stream::empty::<io::Result<Bytes>>(), None, "empty")
            .await
            .unwrap();

        assert_eq!(object.length, 0);
        assert_eq!(object.chunk_count(), 0);
        assert_eq!(object.content_type, DEFAULT_CONTENT_TYPE);
        assert_eq!(object.filename.len(), 32);
        assert_eq!(total_files(&pool).await, 1);
    }

    #[tokio::test]
    async fn failure_mid_write_leaves_no_trace() {
        let pool = db::memory_pool().await;
        let backend = FaultyBackend {
            inner: SqliteChunkBackend::new(pool.clone()),
            fail_at: 2,
        };
        let uploads = UploadPipeline::new(
            ObjectCatalog::new(pool.clone()),
            ChunkStore::new(Arc::new(backend), 4),
        );

        // 20 bytes at 4 bytes per chunk is five chunks; the third one fails.
        let err = uploads
            .upload(body(vec![1u8; 20]), Some("image/jpeg"), "a.jpg")
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(total_files(&pool).await, 0);
        assert_eq!(total_chunks(&pool).await, 0);
    }

    #[tokio::test]
    async fn colliding_filenames_keep_one_object() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 4).with_random_source(Arc::new(FixedRandom));

        let (first, second) = tokio::join!(
            uploads.upload(body(vec![1u8; 10]), Some("image/png"), "one.png"),
            uploads.upload(body(vec![2u8; 10]), Some("image/png"), "two.png"),
        );

        let (winner, loser) = match (first, second) {
            (Ok(obj), Err(err)) | (Err(err), Ok(obj)) => (obj, err),
            other => panic!("expected exactly one success, got {:?}", other),
        };
        assert!(matches!(loser, StoreError::DuplicateFilename(_)));
        assert_eq!(total_files(&pool).await, 1);
        assert_eq!(total_chunks(&pool).await, winner.chunk_count() as i64);
    }

    #[tokio::test]
    async fn abandoned_upload_is_cleaned_up() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 4);

        // Two full chunks arrive, then the client stalls forever.
        let stalled = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"abcdefgh"))])
            .chain(stream::pending());
        let attempt = tokio::time::timeout(
            Duration::from_millis(100),
            uploads.upload(stalled, Some("image/png"), "stall.png"),
        )
        .await;
        assert!(attempt.is_err());

        let mut remaining = total_chunks(&pool).await;
        for _ in 0..50 {
            if remaining == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            remaining = total_chunks(&pool).await;
        }
        assert_eq!(remaining, 0);
        assert_eq!(total_files(&pool).await, 0);
    }

    #[tokio::test]
    async fn content_type_is_stored_verbatim() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 8);

        let object = uploads
            .upload(body(b"%PDF-1.7".to_vec()), Some("application/pdf"), "doc.pdf")
            .await
            .unwrap();
        assert_eq!(object.content_type, "application/pdf");
        assert_eq!(object.md5, format!("{:x}", md5::compute(b"%PDF-1.7")));
    }

    #[tokio::test]
    async fn dropped_guard_removes_committed_row_and_chunks() {
        let pool = db::memory_pool().await;
        let catalog = ObjectCatalog::new(pool.clone());
        let chunks = ChunkStore::sqlite(pool.clone(), 4);
        let id = Uuid::new_v4();

        // State of an upload dropped right after its catalog insert landed.
        let summary = chunks.write(id, body(vec![3u8; 10])).await.unwrap();
        catalog
            .create(NewObject {
                id,
                filename: "late.png".into(),
                content_type: "image/png".into(),
                length: summary.length as i64,
                chunk_size: 4,
                md5: summary.md5,
            })
            .await
            .unwrap();
        drop(RollbackGuard::new(catalog.clone(), chunks.clone(), id));

        for _ in 0..50 {
            if total_files(&pool).await == 0 && total_chunks(&pool).await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(total_files(&pool).await, 0);
        assert_eq!(total_chunks(&pool).await, 0);
        assert!(matches!(catalog.find_by_id(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn disarmed_guard_leaves_object_alone() {
        let pool = db::memory_pool().await;
        let uploads = pipeline(&pool, 4);
        let object = uploads
            .upload(body(vec![5u8; 10]), Some("image/png"), "keep.png")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(total_files(&pool).await, 1);
        assert_eq!(total_chunks(&pool).await, object.chunk_count() as i64);
    }
}
