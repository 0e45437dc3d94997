//! Rectification session archive
//!
//! Terminal sessions are stored whole as JSON, with the headline fields
//! (state, score, rectified time) in their own columns for ad-hoc queries.

use crate::models::RectificationSession;
use btr_common::{Error, Result};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Save (or overwrite) a session
pub async fn save_session(pool: &SqlitePool, session: &RectificationSession) -> Result<()> {
    // Prepare all data BEFORE acquiring a connection
    let session_id = session.session_id.to_string();
    let state = serde_json::to_string(&session.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let termination = session
        .termination
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize termination: {}", e)))?;
    let body = serde_json::to_string(session)
        .map_err(|e| Error::Internal(format!("Failed to serialize session: {}", e)))?;
    let score = session.last_result.as_ref().map(|r| r.score);
    let rectified_time = session.last_result.as_ref().map(|r| r.rectified_clock.clone());
    let created_at = session.created_at.to_rfc3339();
    let ended_at = session.ended_at.map(|dt| dt.to_rfc3339());

    sqlx::query(
        r#"
        INSERT INTO rectification_sessions (
            session_id, state, termination, iteration_count, score,
            rectified_time, session, created_at, ended_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(session_id) DO UPDATE SET
            state = excluded.state,
            termination = excluded.termination,
            iteration_count = excluded.iteration_count,
            score = excluded.score,
            rectified_time = excluded.rectified_time,
            session = excluded.session,
            ended_at = excluded.ended_at
        "#,
    )
    .bind(&session_id)
    .bind(&state)
    .bind(&termination)
    .bind(session.iteration_count as i64)
    .bind(score)
    .bind(&rectified_time)
    .bind(&body)
    .bind(&created_at)
    .bind(&ended_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load an archived session
pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<RectificationSession>> {
    let row = sqlx::query("SELECT session FROM rectification_sessions WHERE session_id = ?")
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let body: String = row.get("session");
            let session = serde_json::from_str(&body)
                .map_err(|e| Error::Internal(format!("Failed to deserialize session: {}", e)))?;
            Ok(Some(session))
        }
        None => Ok(None),
    }
}

/// Number of archived sessions
pub async fn count_sessions(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rectification_sessions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
