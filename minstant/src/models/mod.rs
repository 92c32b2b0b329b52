//! Data models for conversations and turn requests.

mod chat;
mod message;
mod session;

pub use chat::{ChatInput, Identity, ValidationError};
pub use message::{Message, Role};
pub use session::SessionState;
