//! Read-only schema lookups.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{no_parameters, parse_input, to_output, Tool, ToolDefinition, ToolError};
use crate::db::Catalog;

pub struct ListTablesTool {
    catalog: Arc<dyn Catalog>,
}

impl ListTablesTool {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListTablesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getDbTables",
            description: "List all base tables in the database. Returns schema and table names. \
                Use this tool first to discover available tables before querying them.",
            parameters: no_parameters(),
        }
    }

    async fn call(&self, _input: Value) -> Result<Value, ToolError> {
        let tables = self.catalog.list_tables().await?;
        to_output(&tables)
    }
}

pub struct DescribeTableTool {
    catalog: Arc<dyn Catalog>,
}

impl DescribeTableTool {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescribeTableInput {
    table_name: String,
    #[serde(default = "default_schema")]
    schema_name: String,
}

fn default_schema() -> String {
    "public".to_string()
}

#[async_trait]
impl Tool for DescribeTableTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getTableDefinition",
            description: "Get the column definitions of a specific table, including data types, \
                nullability, defaults, and foreign key references. \
                Use this to understand a table's structure before writing queries.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "tableName": {
                        "type": "string",
                        "description": "Name of the table to inspect"
                    },
                    "schemaName": {
                        "type": "string",
                        "description": "Schema of the table (e.g. public)"
                    }
                },
                "required": ["tableName", "schemaName"]
            }),
        }
    }

    async fn call(&self, input: Value) -> Result<Value, ToolError> {
        let input: DescribeTableInput = parse_input("getTableDefinition", input)?;
        let columns = self
            .catalog
            .describe_table(&input.table_name, &input.schema_name)
            .await?;
        to_output(&columns)
    }
}

pub struct ListProceduresTool {
    catalog: Arc<dyn Catalog>,
}

impl ListProceduresTool {
    pub fn new(catalog: Arc<dyn Catalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl Tool for ListProceduresTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "getDbProcedures",
            description: "List all stored functions in the public schema whose names start \
                with 'get_'. Returns function name, return type, and arguments. \
                Use these functions via executeQuery with SELECT function_name(args).",
            parameters: no_parameters(),
        }
    }

    async fn call(&self, _input: Value) -> Result<Value, ToolError> {
        let procedures = self.catalog.list_read_procedures().await?;
        to_output(&procedures)
    }
}
