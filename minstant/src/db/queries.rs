//! Catalog introspection and arbitrary read queries against Postgres.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{Column, Row, TypeInfo};

use super::{Catalog, ColumnInfo, ProcedureInfo, QueryRow, StorageError, TableInfo};

const LIST_TABLES_SQL: &str = r"
SELECT table_schema::text, table_name::text
FROM information_schema.tables
WHERE table_type = 'BASE TABLE'
  AND table_schema NOT IN ('pg_catalog', 'information_schema')
ORDER BY table_schema, table_name
";

const DESCRIBE_TABLE_SQL: &str = r"
SELECT
    c.column_name::text,
    c.data_type::text,
    c.is_nullable::text,
    c.column_default::text,
    tc.constraint_type::text,
    ccu.table_name::text  AS referenced_table,
    ccu.column_name::text AS referenced_column
FROM information_schema.columns c
LEFT JOIN information_schema.key_column_usage kcu
    ON  kcu.table_schema = c.table_schema
    AND kcu.table_name   = c.table_name
    AND kcu.column_name  = c.column_name
LEFT JOIN information_schema.table_constraints tc
    ON  tc.constraint_name   = kcu.constraint_name
    AND tc.constraint_schema = kcu.constraint_schema
    AND tc.constraint_type   = 'FOREIGN KEY'
LEFT JOIN information_schema.constraint_column_usage ccu
    ON  ccu.constraint_name   = tc.constraint_name
    AND ccu.constraint_schema = tc.constraint_schema
WHERE c.table_name = $1
  AND c.table_schema = $2
ORDER BY c.ordinal_position
";

const LIST_PROCEDURES_SQL: &str = r"
SELECT
    n.nspname::text                   AS schema_name,
    p.proname::text                   AS function_name,
    pg_get_function_result(p.oid)     AS return_type,
    pg_get_function_arguments(p.oid)  AS arguments
FROM pg_proc p
JOIN pg_namespace n ON n.oid = p.pronamespace
WHERE n.nspname = 'public'
  AND p.prokind = 'f'
  AND p.proname LIKE 'get\_%' ESCAPE '\'
ORDER BY p.proname
";

type ColumnRow = (
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Postgres-backed catalog over the shared query pool.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn list_tables(&self) -> Result<Vec<TableInfo>, StorageError> {
        let rows: Vec<(String, String)> = sqlx::query_as(LIST_TABLES_SQL)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(schema, table)| TableInfo { schema, table })
            .collect())
    }

    async fn describe_table(
        &self,
        table: &str,
        schema: &str,
    ) -> Result<Vec<ColumnInfo>, StorageError> {
        let rows: Vec<ColumnRow> = sqlx::query_as(DESCRIBE_TABLE_SQL)
            .bind(table)
            .bind(schema)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    column_name,
                    data_type,
                    is_nullable,
                    column_default,
                    constraint_type,
                    referenced_table,
                    referenced_column,
                )| ColumnInfo {
                    column_name,
                    data_type,
                    is_nullable,
                    column_default,
                    constraint_type,
                    referenced_table,
                    referenced_column,
                },
            )
            .collect())
    }

    async fn list_read_procedures(&self) -> Result<Vec<ProcedureInfo>, StorageError> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(LIST_PROCEDURES_SQL)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(schema_name, function_name, return_type, arguments)| ProcedureInfo {
                    schema_name,
                    function_name,
                    return_type,
                    arguments,
                },
            )
            .collect())
    }

    fn query_rows<'a>(&'a self, sql: &'a str) -> BoxStream<'a, Result<QueryRow, StorageError>> {
        sqlx::query(sql)
            .fetch(&self.pool)
            .map(|row| row_to_json(&row?))
            .boxed()
    }
}

/// Map a row to JSON using its column names.
fn row_to_json(row: &PgRow) -> Result<QueryRow, StorageError> {
    let mut out = QueryRow::new();

    for column in row.columns() {
        let idx = column.ordinal();
        let value = column_value(row, idx, column.type_info().name()).map_err(|source| {
            StorageError::Decode {
                column: column.name().to_string(),
                source,
            }
        })?;
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}

/// Decode one column by its Postgres type name.
fn column_value(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => json!(row.try_get::<Option<bool>, _>(idx)?),
        "INT2" => json!(row.try_get::<Option<i16>, _>(idx)?),
        "INT4" => json!(row.try_get::<Option<i32>, _>(idx)?),
        "INT8" => json!(row.try_get::<Option<i64>, _>(idx)?),
        "FLOAT4" => json!(row.try_get::<Option<f32>, _>(idx)?),
        "FLOAT8" => json!(row.try_get::<Option<f64>, _>(idx)?),
        "NUMERIC" => row
            .try_get::<Option<Decimal>, _>(idx)?
            .map_or(Value::Null, decimal_to_json),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?.unwrap_or(Value::Null),
        "UUID" => json!(row.try_get::<Option<uuid::Uuid>, _>(idx)?),
        "TIMESTAMPTZ" => json!(row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)?),
        "TIMESTAMP" => json!(row.try_get::<Option<chrono::NaiveDateTime>, _>(idx)?),
        "DATE" => json!(row.try_get::<Option<chrono::NaiveDate>, _>(idx)?),
        "TIME" => json!(row.try_get::<Option<chrono::NaiveTime>, _>(idx)?),
        "TEXT[]" | "VARCHAR[]" => json!(row.try_get::<Option<Vec<String>>, _>(idx)?),
        "INT4[]" => json!(row.try_get::<Option<Vec<i32>>, _>(idx)?),
        "INT8[]" => json!(row.try_get::<Option<Vec<i64>>, _>(idx)?),
        "BOOL[]" => json!(row.try_get::<Option<Vec<bool>>, _>(idx)?),
        "VOID" => Value::Null,
        // Text-like types decode as strings; anything the driver cannot
        // represent as text becomes null.
        _ => row
            .try_get::<Option<String>, _>(idx)
            .ok()
            .flatten()
            .map_or(Value::Null, Value::String),
    };

    Ok(value)
}

/// NUMERIC as a JSON number, falling back to a string when it does not parse.
fn decimal_to_json(d: Decimal) -> Value {
    let text = d.normalize().to_string();
    text.parse::<serde_json::Number>()
        .map_or(Value::String(text), Value::Number)
}
