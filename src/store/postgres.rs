//! Postgres-backed `WhiteboardStore`.
//!
//! DESIGN
//! ======
//! The stroke log is a `jsonb` array on the whiteboard row. Bounded append
//! is a single `UPDATE` that concatenates the batch and keeps the newest
//! `max_len` elements, so concurrent writers never observe a log longer
//! than the bound.

use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use super::{StoreError, WhiteboardStore};
use crate::state::{Stroke, Whiteboard};

#[derive(Clone)]
pub struct PgWhiteboardStore {
    pool: PgPool,
}

impl PgWhiteboardStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Writes spawned during shutdown can outlive the pool.
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.pool.is_closed() {
            return Err(StoreError::Unavailable("connection pool closed".into()));
        }
        Ok(())
    }
}

type WhiteboardRow = (Uuid, Uuid, Option<String>, serde_json::Value, String, Option<i64>, Json<Vec<Stroke>>);

#[async_trait::async_trait]
impl WhiteboardStore for PgWhiteboardStore {
    async fn find_whiteboard(&self, id: Uuid) -> Result<Option<Whiteboard>, StoreError> {
        let row = sqlx::query_as::<_, WhiteboardRow>(
            "SELECT id, owner_id, question_id, state, snapshot_image, snapshot_at, strokes \
             FROM whiteboards WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, owner_id, question_id, state, snapshot_image, snapshot_at, Json(strokes))) = row else {
            return Ok(None);
        };

        let members = sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM whiteboard_members WHERE whiteboard_id = $1 ORDER BY joined_at ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(Whiteboard { id, owner_id, question_id, members, state, snapshot_image, snapshot_at, strokes }))
    }

    async fn add_member(&self, id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query(
            "INSERT INTO whiteboard_members (whiteboard_id, user_id) \
             SELECT $1, $2 WHERE EXISTS (SELECT 1 FROM whiteboards WHERE id = $1) \
             ON CONFLICT (whiteboard_id, user_id) DO NOTHING",
        )
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_strokes_bounded(&self, id: Uuid, strokes: &[Stroke], max_len: usize) -> Result<(), StoreError> {
        self.ensure_open()?;
        if strokes.is_empty() {
            return Ok(());
        }
        let limit = i64::try_from(max_len).unwrap_or(i64::MAX);

        sqlx::query(
            "UPDATE whiteboards \
             SET strokes = ( \
                     SELECT COALESCE(jsonb_agg(tail.elem ORDER BY tail.ord), '[]'::jsonb) \
                     FROM ( \
                         SELECT t.elem, t.ord \
                         FROM jsonb_array_elements(whiteboards.strokes || $2::jsonb) WITH ORDINALITY AS t(elem, ord) \
                         ORDER BY t.ord DESC \
                         LIMIT $3 \
                     ) tail \
                 ), \
                 updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(Json(strokes))
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_snapshot(&self, id: Uuid, image: &str, at_ms: i64) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query(
            "UPDATE whiteboards \
             SET snapshot_image = $2, snapshot_at = $3, strokes = '[]'::jsonb, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(image)
        .bind(at_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_strokes_and_snapshot(&self, id: Uuid) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query(
            "UPDATE whiteboards \
             SET snapshot_image = '', strokes = '[]'::jsonb, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace_state(&self, id: Uuid, state: &serde_json::Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        sqlx::query("UPDATE whiteboards SET state = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(state)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
