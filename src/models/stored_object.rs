//! Represents the catalog record of one uploaded file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a committed object.
///
/// The record never carries payload bytes; those live in the chunk table and
/// are reached through `files_id = id`. A record only exists once every chunk
/// of the object has been written.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    /// Opaque identifier assigned before the first chunk is written.
    pub id: Uuid,

    /// Generated, catalog-unique name (random hex plus original extension).
    pub filename: String,

    /// MIME type declared by the uploader. Not trusted.
    pub content_type: String,

    /// Total payload size in bytes.
    pub length: i64,

    /// Maximum bytes per chunk for this object.
    pub chunk_size: i64,

    /// Hex MD5 digest of the full payload.
    pub md5: String,

    /// When the record was committed.
    pub created_at: DateTime<Utc>,

    /// Same instant as `created_at`.
    pub upload_date: DateTime<Utc>,
}

impl StoredObject {
    /// Number of chunks backing this object.
    pub fn chunk_count(&self) -> u64 {
        if self.length <= 0 || self.chunk_size <= 0 {
            return 0;
        }
        (self.length as u64).div_ceil(self.chunk_size as u64)
    }
}

/// Fields supplied by the upload pipeline when committing a record.
/// Timestamps are assigned by the catalog at commit time.
#[derive(Clone, Debug)]
pub struct NewObject {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub length: i64,
    pub chunk_size: i64,
    pub md5: String,
}
