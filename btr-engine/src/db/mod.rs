//! Database access for btr-engine
//!
//! SQLite archive of terminal rectification sessions

pub mod sessions;

use btr_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the archive table if it doesn't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rectification_sessions (
            session_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            termination TEXT,
            iteration_count INTEGER NOT NULL DEFAULT 0,
            score REAL,
            rectified_time TEXT,
            session TEXT NOT NULL,
            created_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (rectification_sessions)");

    Ok(())
}
