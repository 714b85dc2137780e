//! src/services/chunk_store.rs
//!
//! ChunkStore: slices inbound byte streams into fixed-size chunks and
//! streams them back in sequence order. Persistence sits behind the
//! `ChunkBackend` seam; the SQLite backend keeps chunks in the `chunks` table
//! keyed by `(files_id, n)`.

use super::store_error::{StoreError, StoreResult};
use crate::models::chunk::Chunk;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{
    Stream, StreamExt, future, pin_mut,
    stream::{self, BoxStream},
};
use md5::Context;
use sqlx::SqlitePool;
use std::{io, sync::Arc};
use tracing::debug;
use uuid::Uuid;

/// 255 KiB, the conventional GridFS chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 255 * 1024;

/// Ordered payload of one object, fetched lazily chunk by chunk.
pub type ChunkStream = BoxStream<'static, io::Result<Bytes>>;

/// Persistence primitives for chunk rows.
#[async_trait]
pub trait ChunkBackend: Send + Sync {
    /// Durably store chunk `n` of `files_id`.
    async fn put_chunk(&self, files_id: Uuid, n: u32, data: Bytes) -> StoreResult<()>;

    /// Fetch chunk `n` of `files_id`, `None` past the last chunk.
    async fn get_chunk(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Bytes>>;

    /// Remove every chunk of `files_id`, returning how many were removed.
    async fn delete_chunks(&self, files_id: Uuid) -> StoreResult<u64>;
}

/// Chunk rows stored in SQLite.
#[derive(Clone)]
pub struct SqliteChunkBackend {
    db: Arc<SqlitePool>,
}

impl SqliteChunkBackend {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChunkBackend for SqliteChunkBackend {
    async fn put_chunk(&self, files_id: Uuid, n: u32, data: Bytes) -> StoreResult<()> {
        sqlx::query("INSERT INTO chunks (files_id, n, data) VALUES (?, ?, ?)")
            .bind(files_id)
            .bind(i64::from(n))
            .bind(data.as_ref())
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    async fn get_chunk(&self, files_id: Uuid, n: u32) -> StoreResult<Option<Bytes>> {
        let chunk = sqlx::query_as::<_, Chunk>(
            "SELECT files_id, n, data FROM chunks WHERE files_id = ? AND n = ?",
        )
        .bind(files_id)
        .bind(i64::from(n))
        .fetch_optional(&*self.db)
        .await?;
        Ok(chunk.map(|chunk| Bytes::from(chunk.data)))
    }

    async fn delete_chunks(&self, files_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE files_id = ?")
            .bind(files_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Outcome of a completed `ChunkStore::write`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub length: u64,
    pub chunk_count: u32,
    pub md5: String,
}

/// Splits payloads into fixed-size chunks and reassembles them in order.
///
/// Cloning is cheap; clones share the same backend.
#[derive(Clone)]
pub struct ChunkStore {
    backend: Arc<dyn ChunkBackend>,
    chunk_size: usize,
}

impl ChunkStore {
    /// Create a store writing chunks of at most `chunk_size` bytes.
    /// A zero chunk size is bumped to one byte.
    pub fn new(backend: Arc<dyn ChunkBackend>, chunk_size: usize) -> Self {
        Self {
            backend,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Convenience constructor for the SQLite backend.
    pub fn sqlite(db: Arc<SqlitePool>, chunk_size: usize) -> Self {
        Self::new(Arc::new(SqliteChunkBackend::new(db)), chunk_size)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Consume `stream`, persisting consecutive chunks in sequence order.
    ///
    /// Each chunk is written before the next is assembled, so at most one
    /// chunk (plus the inbound piece being sliced) is held in memory. On error
    /// the chunks already written are left in place; the caller owns cleanup.
    pub async fn write<S>(&self, files_id: Uuid, stream: S) -> StoreResult<WriteSummary>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        pin_mut!(stream);
        let mut pending = BytesMut::new();
        let mut next_n: u32 = 0;
        let mut length: u64 = 0;
        let mut digest = Context::new();

        while let Some(piece) = stream.next().await {
            let mut piece = piece?;
            length += piece.len() as u64;
            digest.consume(&piece);

            while !piece.is_empty() {
                // Full chunks straight from the inbound buffer avoid a copy.
                if pending.is_empty() && piece.len() >= self.chunk_size {
                    let data = piece.split_to(self.chunk_size);
                    self.put(files_id, &mut next_n, data).await?;
                    continue;
                }
                let take = (self.chunk_size - pending.len()).min(piece.len());
                pending.extend_from_slice(&piece.split_to(take));
                if pending.len() == self.chunk_size {
                    let data = pending.split().freeze();
                    self.put(files_id, &mut next_n, data).await?;
                }
            }
        }

        if !pending.is_empty() {
            let data = pending.split().freeze();
            self.put(files_id, &mut next_n, data).await?;
        }

        Ok(WriteSummary {
            length,
            chunk_count: next_n,
            md5: format!("{:x}", digest.compute()),
        })
    }

    async fn put(&self, files_id: Uuid, next_n: &mut u32, data: Bytes) -> StoreResult<()> {
        let n = *next_n;
        let len = data.len();
        self.backend.put_chunk(files_id, n, data).await?;
        debug!("wrote chunk {} of {} ({} bytes)", n, files_id, len);
        *next_n += 1;
        Ok(())
    }

    /// Open a fresh ordered cursor over the `chunk_count` chunks of `files_id`.
    ///
    /// The first chunk is fetched eagerly so a missing object fails here with
    /// `NotFound`; the remaining chunks are fetched one at a time as the
    /// returned stream is polled. A chunk missing before `chunk_count` (e.g.
    /// the object was deleted mid-read) ends the stream with `UnexpectedEof`.
    pub async fn read(&self, files_id: Uuid, chunk_count: u64) -> StoreResult<ChunkStream> {
        let first = self
            .backend
            .get_chunk(files_id, 0)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("chunks of object `{}`", files_id)))?;

        let backend = Arc::clone(&self.backend);
        let rest = stream::try_unfold(1u32, move |n| {
            let backend = Arc::clone(&backend);
            async move {
                if u64::from(n) >= chunk_count {
                    return Ok::<_, io::Error>(None);
                }
                match backend.get_chunk(files_id, n).await? {
                    Some(data) => Ok(Some((data, n + 1))),
                    None => Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("chunk {} of {} missing for object `{}`", n, chunk_count, files_id),
                    )),
                }
            }
        });

        Ok(stream::once(future::ready(Ok::<_, io::Error>(first)))
            .chain(rest)
            .boxed())
    }

    /// Remove all chunks of `files_id`. Deleting an unknown object is a no-op.
    pub async fn delete(&self, files_id: Uuid) -> StoreResult<()> {
        let removed = self.backend.delete_chunks(files_id).await?;
        debug!("removed {} chunks of {}", removed, files_id);
        Ok(())
    }
}
