//! Model client: the streaming generation contract and its OpenAI-compatible
//! implementation.
//!
//! A [`Model`] turns a composed request into a finite, non-restartable stream
//! of text chunks ending in one final event. [`Generator`] implements it on
//! top of a [`CompletionProvider`], running tool calls between rounds.

mod generate;
mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::models::{Message, Role};
use crate::tools::{ToolDefinition, ToolSet};

pub use generate::Generator;
pub use openai::OpenAiProvider;

/// Generation failure. Always fatal to the turn.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("model stream failed: {0}")]
    Stream(String),

    #[error("model error: {0}")]
    Provider(String),

    #[error("malformed model stream payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("model exceeded the limit of {0} tool rounds")]
    ToolRoundsExceeded(usize),
}

/// One event of a generation stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateEvent {
    /// Partial text, in emission order.
    Chunk(String),
    /// Terminal event carrying the full text of the reply.
    Done(String),
}

/// A composed generation request.
#[derive(Clone)]
pub struct GenerateRequest {
    pub system: String,
    /// Prior history followed by the new user message.
    pub messages: Vec<Message>,
    pub tools: Arc<ToolSet>,
}

/// The streaming contract of the generation engine.
pub trait Model: Send + Sync {
    /// Start a generation. The stream ends after the first `Done` or error;
    /// dropping it abandons the generation.
    fn generate(&self, request: GenerateRequest)
        -> BoxStream<'static, Result<GenerateEvent, ModelError>>;
}

/// A tool call as echoed back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    pub fn function(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: "function",
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Chat message in the provider's wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        match message.role {
            Role::User => Self::User {
                content: message.text(),
            },
            Role::Assistant => Self::Assistant {
                content: Some(message.text()),
                tool_calls: Vec::new(),
            },
        }
    }
}

/// One completion round as sent to a provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<WireMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Incremental output of one completion round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    Text(String),
    /// Fragment of a tool call. Fragments sharing an index belong together;
    /// `arguments` pieces concatenate into a JSON document.
    ToolCall {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },
}

pub type DeltaStream = BoxStream<'static, Result<Delta, ModelError>>;

/// A backend able to stream one completion round.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn open(&self, request: &CompletionRequest) -> Result<DeltaStream, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_messages_serialize_by_role() {
        let assistant = WireMessage::Assistant {
            content: None,
            tool_calls: vec![ToolCall::function("call_1", "getDbTables", "{}")],
        };
        assert_eq!(
            serde_json::to_value(&assistant).unwrap(),
            json!({
                "role": "assistant",
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "getDbTables", "arguments": "{}"}
                }]
            })
        );

        let tool = WireMessage::Tool {
            tool_call_id: "call_1".into(),
            content: "[]".into(),
        };
        assert_eq!(
            serde_json::to_value(&tool).unwrap(),
            json!({"role": "tool", "tool_call_id": "call_1", "content": "[]"})
        );
    }

    #[test]
    fn history_maps_to_wire_roles() {
        let user = WireMessage::from(&Message::user("hi"));
        let reply = WireMessage::from(&Message::assistant("hello"));
        assert_eq!(serde_json::to_value(&user).unwrap()["role"], "user");
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"role": "assistant", "content": "hello"})
        );
    }
}
