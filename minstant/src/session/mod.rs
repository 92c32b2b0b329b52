//! Session persistence: load-or-none and upsert of conversation state.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::SessionState;

pub use memory::MemorySessionStore;

/// Failure loading or saving a session.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store: {0}")]
    Storage(#[from] sqlx::Error),

    /// The stored state exists but cannot be decoded. Never treated as "not found".
    #[error("session store: failed to decode state of session '{session_id}': {source}")]
    Corrupt {
        session_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("session store: failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Durable mapping from session id to conversation state.
///
/// Implementations store an opaque serialized form. No per-session locking is
/// provided: concurrent turns on one id may race between `load` and `save`.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch the state for `session_id`; `None` when the id is unknown.
    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StoreError>;

    /// Insert or overwrite the state for `session_id`, bumping its
    /// modification time.
    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StoreError>;
}

/// Decode a stored JSON document into session state.
pub(crate) fn decode_state(
    session_id: &str,
    data: serde_json::Value,
) -> Result<SessionState, StoreError> {
    serde_json::from_value(data).map_err(|source| StoreError::Corrupt {
        session_id: session_id.to_string(),
        source,
    })
}

/// Encode session state into its stored JSON document.
pub(crate) fn encode_state(state: &SessionState) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(state).map_err(StoreError::Encode)
}
