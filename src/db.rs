//! SQLite pool setup, schema migration, and startup maintenance.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{str::FromStr, sync::Arc};

/// Schema for the catalog and chunk tables.
pub const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool against `database_url`, creating the database file if needed.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database URL `{}`", database_url))?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to `{}`", database_url))?;

    Ok(Arc::new(pool))
}

/// Run the embedded schema statement by statement.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}

/// True once both store tables exist.
pub async fn schema_ready(db: &SqlitePool) -> sqlx::Result<bool> {
    let tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('files', 'chunks')",
    )
    .fetch_one(db)
    .await?;
    Ok(tables == 2)
}

/// Delete chunks that no catalog row refers to.
///
/// These are left behind when the process dies between writing chunks and
/// rolling them back. Only safe while no upload is in flight, i.e. at startup.
pub async fn sweep_orphan_chunks(db: &SqlitePool) -> sqlx::Result<u64> {
    let result =
        sqlx::query("DELETE FROM chunks WHERE files_id NOT IN (SELECT id FROM files)")
            .execute(db)
            .await?;
    Ok(result.rows_affected())
}

/// Migrated single-connection in-memory pool for unit tests.
#[cfg(test)]
pub(crate) async fn memory_pool() -> Arc<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    Arc::new(pool)
}
