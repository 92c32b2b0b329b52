//! Persistent per-session conversation state.

use serde::{Deserialize, Serialize};

use super::Message;

/// State stored for one session: the full conversation history.
///
/// History is append-only; insertion order is conversation order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub history: Vec<Message>,
}

impl SessionState {
    /// Append one completed turn (user message, then assistant reply).
    pub fn record_turn(&mut self, user: Message, assistant: Message) {
        self.history.push(user);
        self.history.push(assistant);
    }
}
