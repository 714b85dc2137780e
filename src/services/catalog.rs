//! ObjectCatalog: one metadata row per committed object, looked up by id or
//! by filename. Rows live in the SQLite `files` table; the `seq` column keeps
//! insertion order for listings.

use super::store_error::{StoreError, StoreResult, is_unique_violation};
use crate::models::stored_object::{NewObject, StoredObject};
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

const SELECT_COLUMNS: &str = "SELECT id, filename, content_type, length, chunk_size, md5, \
                              created_at, upload_date FROM files";

#[derive(Clone)]
pub struct ObjectCatalog {
    db: Arc<SqlitePool>,
}

impl ObjectCatalog {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Commit a record. The row becomes visible to lookups once this returns.
    ///
    /// Returns `DuplicateFilename` when another object already owns the name.
    pub async fn create(&self, record: NewObject) -> StoreResult<StoredObject> {
        let now = Utc::now();
        let object = StoredObject {
            id: record.id,
            filename: record.filename,
            content_type: record.content_type,
            length: record.length,
            chunk_size: record.chunk_size,
            md5: record.md5,
            created_at: now,
            upload_date: now,
        };

        match sqlx::query(
            "INSERT INTO files (id, filename, content_type, length, chunk_size, md5,
                                created_at, upload_date)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(object.id)
        .bind(&object.filename)
        .bind(&object.content_type)
        .bind(object.length)
        .bind(object.chunk_size)
        .bind(&object.md5)
        .bind(object.created_at)
        .bind(object.upload_date)
        .execute(&*self.db)
        .await
        {
            Ok(_) => Ok(object),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::DuplicateFilename(object.filename))
            }
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("object `{}`", id)))
    }

    pub async fn find_by_filename(&self, filename: &str) -> StoreResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(&format!("{SELECT_COLUMNS} WHERE filename = ?"))
            .bind(filename)
            .fetch_optional(&*self.db)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("file `{}`", filename)))
    }

    /// All records, oldest first.
    pub async fn list(&self) -> StoreResult<Vec<StoredObject>> {
        let rows = sqlx::query_as::<_, StoredObject>(&format!("{SELECT_COLUMNS} ORDER BY seq ASC"))
            .fetch_all(&*self.db)
            .await?;
        Ok(rows)
    }

    /// Remove the record for `id`. Removing an unknown id is a no-op.
    pub async fn delete(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        debug!("catalog delete {} removed {} rows", id, result.rows_affected());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn new_object(filename: &str) -> NewObject {
        NewObject {
            id: Uuid::new_v4(),
            filename: filename.to_string(),
            content_type: "image/png".into(),
            length: 12,
            chunk_size: 4,
            md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
        }
    }

    #[tokio::test]
    async fn create_then_find() {
        let catalog = ObjectCatalog::new(db::memory_pool().await);
        let created = catalog.create(new_object("a.png")).await.unwrap();
        assert_eq!(created.created_at, created.upload_date);

        assert_eq!(catalog.find_by_id(created.id).await.unwrap(), created);
        assert_eq!(catalog.find_by_filename("a.png").await.unwrap(), created);
        assert_eq!(created.chunk_count(), 3);
    }

    #[tokio::test]
    async fn lookup_miss_is_not_found() {
        let catalog = ObjectCatalog::new(db::memory_pool().await);
        assert!(matches!(
            catalog.find_by_id(Uuid::new_v4()).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            catalog.find_by_filename("missing.png").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected() {
        let catalog = ObjectCatalog::new(db::memory_pool().await);
        let first = catalog.create(new_object("same.jpg")).await.unwrap();

        let err = catalog.create(new_object("same.jpg")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateFilename(name) if name == "same.jpg"));

        // The original record is untouched.
        assert_eq!(catalog.find_by_filename("same.jpg").await.unwrap().id, first.id);
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn list_keeps_insertion_order() {
        let catalog = ObjectCatalog::new(db::memory_pool().await);
        for name in ["c.png", "a.png", "b.png"] {
            catalog.create(new_object(name)).await.unwrap();
        }

        let names: Vec<String> = catalog
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.filename)
            .collect();
        assert_eq!(names, ["c.png", "a.png", "b.png"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let catalog = ObjectCatalog::new(db::memory_pool().await);
        let created = catalog.create(new_object("gone.png")).await.unwrap();

        catalog.delete(created.id).await.unwrap();
        catalog.delete(created.id).await.unwrap();
        assert!(catalog.list().await.unwrap().is_empty());
    }
}
