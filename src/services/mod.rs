//! Storage core: chunk store, object catalog, and the upload / retrieval
//! services built on them.

pub mod catalog;
pub mod chunk_store;
pub mod filename;
pub mod retrieval_service;
pub mod store_error;
pub mod upload_service;

pub use store_error::{StoreError, StoreResult};
