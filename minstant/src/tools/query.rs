//! Guarded execution of model-written SQL.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{parse_input, to_output, Tool, ToolDefinition, ToolError};
use crate::db::{Catalog, QueryRow};
use crate::guard;

/// Hard cap on rows returned to the model.
pub const MAX_ROWS: usize = 100;

pub struct ExecuteQueryTool {
    catalog: Arc<dyn Catalog>,
}

#[derive(Debug, Deserialize)]
struct ExecuteQueryInput {
    query: String,
}

impl ExecuteQueryTool {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }

    /// Validate and run a statement, returning at most [`MAX_ROWS`] rows.
    ///
    /// Rejected statements never reach the catalog. Rows past the cap are
    /// dropped without notice to the caller.
    pub async fn execute(&self, raw: &str) -> Result<Vec<QueryRow>, ToolError> {
        guard::validate(raw)?;

        let mut rows = self.catalog.query_rows(raw);
        let mut out = Vec::new();

        while let Some(row) = rows.next().await {
            if out.len() == MAX_ROWS {
                debug!(rows = MAX_ROWS, "query result truncated");
                break;
            }
            out.push(row.map_err(ToolError::Execution)?);
        }

        Ok(out)
    }
}

#[async_trait]
impl Tool for ExecuteQueryTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "executeQuery",
            description: "Execute a read-only SQL SELECT query against the database and return \
                the results as rows. Only SELECT statements are allowed; INSERT, UPDATE, DELETE, \
                DROP, ALTER, etc. are rejected. Results are capped at 100 rows. Cast uncommon \
                column types (geometry, intervals, enums) to text. Use getDbTables and \
                getTableDefinition first to understand the schema.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "SQL SELECT query to execute against the database"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: ExecuteQueryInput = parse_input("executeQuery", input)?;
        let rows = self.execute(&input.query).await?;
        to_output(&rows)
    }
}
