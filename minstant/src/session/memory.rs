//! In-process session store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use super::{decode_state, encode_state, SessionStore, StoreError};
use crate::models::SessionState;

#[derive(Debug, Clone)]
struct StoredSession {
    data: Value,
    updated_at: DateTime<Utc>,
}

/// Session store kept in memory. State is held in serialized form so reads
/// go through the same decoding path as the database store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last modification time of a session, if it exists.
    #[cfg(test)]
    pub async fn updated_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.updated_at)
    }

    /// Store a raw document, bypassing encoding.
    #[cfg(test)]
    pub async fn insert_raw(&self, session_id: &str, data: Value) {
        self.sessions.write().await.insert(
            session_id.to_string(),
            StoredSession {
                data,
                updated_at: Utc::now(),
            },
        );
    }

    /// Raw stored document for a session.
    #[cfg(test)]
    pub async fn raw(&self, session_id: &str) -> Option<Value> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.data.clone())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError> {
        let data = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.data.clone());

        data.map(|d| decode_state(session_id, d)).transpose()
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError> {
        let data = encode_state(state)?;
        let previous = self.sessions.write().await.insert(
            session_id.to_string(),
            StoredSession {
                data,
                updated_at: Utc::now(),
            },
        );
        match previous {
            Some(p) => debug!(session_id, previous = %p.updated_at, "session replaced"),
            None => debug!(session_id, "session created"),
        }
        Ok(())
    }
}
