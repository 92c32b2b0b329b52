//! Postgres connection pool setup.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

/// Pool sizing shared by the query and chat databases.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Connect a pool and verify it with a ping.
///
/// `label` only names the pool in logs and errors.
pub async fn connect(label: &str, database_url: &str, options: PoolOptions) -> Result<PgPool> {
    if database_url.trim().is_empty() {
        bail!("{label} database URL is required");
    }

    let pool = PgPoolOptions::new()
        .max_connections(options.max_connections.max(1))
        .acquire_timeout(options.acquire_timeout)
        .connect(database_url)
        .await
        .with_context(|| format!("Failed to create {label} connection pool"))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .with_context(|| format!("Failed to ping {label} database"))?;

    info!(
        pool = label,
        max_connections = options.max_connections,
        "database pool ready"
    );

    Ok(pool)
}
