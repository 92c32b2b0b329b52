//! Postgres-backed session store.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use tracing::debug;

use crate::models::SessionState;
use crate::session::{decode_state, encode_state, SessionStore, StoreError};

const CREATE_TABLE_SQL: &str = r"
CREATE TABLE IF NOT EXISTS chat_sessions (
    session_id TEXT PRIMARY KEY,
    data JSONB NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
";

const LOAD_SQL: &str = "SELECT data FROM chat_sessions WHERE session_id = $1";

const UPSERT_SQL: &str = r"
INSERT INTO chat_sessions (session_id, data, updated_at)
VALUES ($1, $2, now())
ON CONFLICT (session_id) DO UPDATE SET
    data = EXCLUDED.data,
    updated_at = now()
";

/// Session store over the chat database.
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the sessions table if it does not exist.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let row: Option<(Value,)> = sqlx::query_as(LOAD_SQL)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|(data,)| decode_state(session_id, data)).transpose()
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        let data = encode_state(state)?;

        sqlx::query(UPSERT_SQL)
            .bind(session_id)
            .bind(Json(data))
            .execute(&self.pool)
            .await?;

        debug!(session_id, messages = state.history.len(), "session saved");
        Ok(())
    }
}
