//! Represents a single persisted slice of an object's payload.

use sqlx::FromRow;
use uuid::Uuid;

/// One row of the chunk table.
///
/// `n` is zero-based and gap-free within an object; every chunk except the
/// last holds exactly the object's chunk size.
#[derive(Clone, FromRow, Debug)]
pub struct Chunk {
    /// Owning object.
    pub files_id: Uuid,

    /// Sequence number within the object.
    pub n: i64,

    /// Raw payload bytes.
    pub data: Vec<u8>,
}
