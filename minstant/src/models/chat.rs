//! Per-request turn input.

use thiserror::Error;

/// Caller identity and optional context forwarded into the system prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Identity {
    /// Authenticated caller id.
    pub caller_id: String,
    /// Display name, if the client supplied one.
    pub display_name: Option<String>,
    /// Latitude of the caller, if known.
    pub lat: Option<f64>,
    /// Longitude of the caller, if known.
    pub long: Option<f64>,
}

/// One turn request. Consumed to produce a user message and prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatInput {
    pub session_id: String,
    pub message: String,
    pub identity: Option<Identity>,
}

/// Request rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message is required")]
    MissingMessage,

    #[error("sessionId is required")]
    MissingSessionId,
}

impl ChatInput {
    /// Build a validated input. Blank message or session id is rejected.
    pub fn new(
        session_id: impl Into<String>,
        message: impl Into<String>,
        identity: Option<Identity>,
    ) -> Result<Self, ValidationError> {
        let session_id = session_id.into();
        let message = message.into();

        if message.trim().is_empty() {
            return Err(ValidationError::MissingMessage);
        }
        if session_id.trim().is_empty() {
            return Err(ValidationError::MissingSessionId);
        }

        Ok(Self {
            session_id,
            message,
            identity,
        })
    }
}
