//! Database access: connection pools, catalog introspection and read queries.

mod connection;
mod queries;
mod sessions;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

pub use connection::{connect, PoolOptions};
pub use queries::PgCatalog;
pub use sessions::PgSessionStore;

/// One result row as a column name to value mapping.
pub type QueryRow = serde_json::Map<String, serde_json::Value>;

/// Failure talking to the query database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("failed to read column '{column}': {source}")]
    Decode {
        column: String,
        #[source]
        source: sqlx::Error,
    },
}

/// A base table visible to the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableInfo {
    pub schema: String,
    pub table: String,
}

/// Column definition of a table, in physical column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: String,
    pub column_default: Option<String>,
    pub constraint_type: Option<String>,
    pub referenced_table: Option<String>,
    pub referenced_column: Option<String>,
}

/// A stored read function (`get_*`) in the public schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureInfo {
    pub schema_name: String,
    pub function_name: String,
    pub return_type: String,
    pub arguments: String,
}

/// Read-only access to the query database.
///
/// Errors are surfaced unchanged; nothing here retries.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// All base tables outside system schemas, ordered by schema then name.
    async fn list_tables(&self) -> Result<Vec<TableInfo>, StorageError>;

    /// Columns of `schema.table` ordered by position.
    async fn describe_table(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<Vec<ColumnInfo>, StorageError>;

    /// Public `get_*` functions ordered by name.
    async fn list_read_procedures(&self) -> Result<Vec<ProcedureInfo>, StorageError>;

    /// Run a statement and stream its rows lazily.
    ///
    /// Dropping the stream stops fetching.
    fn query_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<QueryRow, StorageError>>;
}
