//! Callable capabilities offered to the model during a turn.
//!
//! Every tool takes a JSON object and returns JSON. Failures are ordinary
//! values here: the generation loop hands them back to the model as tool
//! results instead of failing the turn.

mod query;
mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::db::{Catalog, StorageError};
use crate::guard::GuardRejection;

pub use query::ExecuteQueryTool;
pub use schema::{DescribeTableTool, ListProceduresTool, ListTablesTool};

/// Tool failure, reported back to the model.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error(transparent)]
    Rejected(#[from] GuardRejection),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("query execution failed: {0}")]
    Execution(#[source] StorageError),

    #[error("invalid input for {tool}: {source}")]
    InvalidInput {
        tool: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("unknown tool '{0}'")]
    Unknown(String),
}

/// Name, description and JSON schema of a tool's input.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// A capability the model may invoke mid-turn.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, input: Value) -> Result<Value, ToolError>;
}

/// The fixed set of tools offered on every turn.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Schema lookups and guarded query execution over one catalog.
    pub fn database(catalog: Arc<dyn Catalog>) -> Self {
        Self::new(vec![
            Arc::new(ListTablesTool::new(catalog.clone())),
            Arc::new(DescribeTableTool::new(catalog.clone())),
            Arc::new(ListProceduresTool::new(catalog.clone())),
            Arc::new(ExecuteQueryTool::new(catalog)),
        ])
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    /// Invoke a tool by name with raw JSON arguments as sent by the model.
    ///
    /// Empty arguments are treated as `{}`.
    pub async fn invoke(&self, name: &str, raw_args: &str) -> Result<Value, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.definition().name == name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;

        let input = if raw_args.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(raw_args).map_err(|source| ToolError::InvalidInput {
                tool: tool.definition().name,
                source,
            })?
        };

        tool.call(input).await
    }
}

/// Decode a tool input object.
fn parse_input<T: DeserializeOwned>(tool: &'static str, input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(|source| ToolError::InvalidInput { tool, source })
}

/// Encode a tool result.
fn to_output<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(ToolError::Encode)
}

/// Input schema for tools that take no arguments.
fn no_parameters() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}
