//! Minstant - a conversational assistant over a read-only Postgres catalog.
//!
//! Architecture:
//! - The HTTP server accepts a turn and streams the reply back as SSE
//! - Each turn runs on its own task, bridged to the response by a bounded channel
//! - The model may call read-only database tools between text rounds
//! - Conversation history is persisted per session as a JSONB document

mod bridge;
mod cli;
mod db;
mod flow;
mod guard;
mod llm;
mod models;
mod server;
mod session;
mod tools;

use anyhow::Result;
use clap::Parser;

use cli::{execute, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    execute(cli).await
}
