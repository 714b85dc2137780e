//! Core data models for the chunked object store.
//!
//! `StoredObject` is the catalog record, `Chunk` is one slice of an object's
//! payload. Both map to SQLite rows via `sqlx::FromRow`; catalog records also
//! serialize as JSON for the HTTP layer.

pub mod chunk;
pub mod stored_object;
