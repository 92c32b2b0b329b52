//! CLI command execution.

use std::future::pending;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::bridge::TurnPool;
use crate::db::{self, PgCatalog, PgSessionStore, PoolOptions};
use crate::flow::{ChatFlow, SystemPrompt};
use crate::llm::{Generator, OpenAiProvider};
use crate::server::{self, AppState, DONE_EVENT, ERROR_EVENT, USER_ID_HEADER};
use crate::session::{MemorySessionStore, SessionStore};
use crate::tools::ToolSet;

use super::args::{ChatArgs, Cli, Commands, LogFormat, ServeArgs};

/// Generate a UUIDv7 (time-ordered, globally unique).
fn generate_uuid() -> String {
    Uuid::now_v7().to_string()
}

pub async fn execute(cli: Cli) -> Result<()> {
    init_tracing(cli.log_format);

    match cli.command {
        Commands::Serve(args) => serve(args).await,
        Commands::Chat(args) => chat(args).await,
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

// === Server ===

async fn serve(args: ServeArgs) -> Result<()> {
    if args.openai_api_key.trim().is_empty() {
        bail!("OPENAI_API_KEY is required");
    }

    let pool_options = PoolOptions {
        max_connections: args.db_max_connections,
        ..PoolOptions::default()
    };

    let query_pool = db::connect("query", &args.query_database_url, pool_options).await?;

    let store: Arc<dyn SessionStore> = match args
        .chat_database_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
    {
        Some(url) => {
            let pool = db::connect("chat", url, pool_options).await?;
            let store = PgSessionStore::new(pool);
            store
                .initialize()
                .await
                .context("Failed to prepare chat_sessions table")?;
            Arc::new(store)
        }
        None => {
            warn!("CHAT_DATABASE_URL is not set; sessions are kept in memory and lost on restart");
            Arc::new(MemorySessionStore::new())
        }
    };

    let tools = Arc::new(ToolSet::database(Arc::new(PgCatalog::new(query_pool))));

    info!(
        model = %args.ai_model,
        base_url = %args.openai_base_url,
        max_tool_rounds = args.max_tool_rounds,
        max_concurrent_turns = args.max_concurrent_turns,
        "model configured"
    );
    let provider = Arc::new(OpenAiProvider::new(
        args.openai_api_key,
        args.openai_base_url,
        args.ai_model,
    ));
    let model = Arc::new(Generator::new(provider, args.max_tool_rounds));

    let prompt = SystemPrompt::new().context("Failed to compile system prompt")?;
    let flow = Arc::new(ChatFlow::new(store, model, tools, prompt));
    let turns = Arc::new(TurnPool::new(flow, args.max_concurrent_turns));

    let addr = SocketAddr::new(args.host, args.port);
    server::serve(addr, AppState { turns }, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C; shutdown only by termination");
        pending::<()>().await;
    }
    info!("shutdown requested");
}

// === Client ===

async fn chat(args: ChatArgs) -> Result<()> {
    let message = args.message.join(" ");
    if message.trim().is_empty() {
        bail!("Message is required for chat command");
    }

    let session_id = args.session.unwrap_or_else(|| {
        let id = generate_uuid();
        eprintln!("Session: {id}");
        id
    });

    let url = format!("{}/chat", args.server.trim_end_matches('/'));
    let body = serde_json::json!({
        "chatInput": message,
        "sessionId": session_id,
        "fullName": args.full_name,
        "lat": args.lat,
        "long": args.long,
    });

    let resp = reqwest::Client::new()
        .post(&url)
        .header(USER_ID_HEADER, &args.user_id)
        .json(&body)
        .send()
        .await
        .with_context(|| format!("Failed to reach {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        bail!("Server returned {status}: {text}");
    }

    let bytes = resp
        .bytes_stream()
        .map(|chunk| chunk.map_err(std::io::Error::other))
        .boxed();
    let mut lines = StreamReader::new(bytes).lines();
    let mut buffer = EventBuffer::default();
    let mut stdout = std::io::stdout();

    while let Some(line) = lines.next_line().await.context("Failed to read stream")? {
        let Some(event) = buffer.push(&line) else {
            continue;
        };
        match Frame::classify(&event) {
            Frame::Chunk(text) => {
                print!("{text}");
                stdout.flush()?;
            }
            Frame::Done => {
                println!();
                return Ok(());
            }
            Frame::Error(message) => {
                println!();
                bail!("Turn failed: {message}");
            }
        }
    }

    bail!("Stream ended without a terminal frame")
}

/// One assembled server-sent event.
#[derive(Debug, Default, PartialEq, Eq)]
struct SseEvent {
    name: Option<String>,
    data: String,
}

/// Accumulates `event:` and `data:` lines until a blank line ends the event.
#[derive(Debug, Default)]
struct EventBuffer {
    name: Option<String>,
    data: Vec<String>,
}

impl EventBuffer {
    /// Feed one line; returns the event when it is complete.
    fn push(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data.is_empty() {
                self.name = None;
                return None;
            }
            return Some(SseEvent {
                name: self.name.take(),
                data: std::mem::take(&mut self.data).join("\n"),
            });
        }

        // Comments (keep-alives) and other fields are ignored.
        if let Some(value) = line.strip_prefix("data:") {
            self.data.push(field_value(value).to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            self.name = Some(field_value(value).to_string());
        }
        None
    }
}

fn field_value(raw: &str) -> &str {
    raw.strip_prefix(' ').unwrap_or(raw)
}

/// Meaning of one event, decided by its name.
#[derive(Debug, PartialEq, Eq)]
enum Frame<'a> {
    Chunk(&'a str),
    Done,
    Error(&'a str),
}

impl<'a> Frame<'a> {
    fn classify(event: &'a SseEvent) -> Self {
        match event.name.as_deref() {
            Some(DONE_EVENT) => Self::Done,
            Some(ERROR_EVENT) => Self::Error(
                event
                    .data
                    .strip_prefix("[ERROR]")
                    .map_or(event.data.as_str(), str::trim_start),
            ),
            _ => Self::Chunk(&event.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(lines: &[&str]) -> Vec<SseEvent> {
        let mut buffer = EventBuffer::default();
        lines.iter().filter_map(|l| buffer.push(l)).collect()
    }

    fn unnamed(data: &str) -> SseEvent {
        SseEvent {
            name: None,
            data: data.to_string(),
        }
    }

    fn named(name: &str, data: &str) -> SseEvent {
        SseEvent {
            name: Some(name.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn buffer_splits_events_on_blank_lines() {
        assert_eq!(
            events(&["data: Hi ", "", "data: there", "", "event: done", "data: [DONE]", ""]),
            [unnamed("Hi "), unnamed("there"), named("done", "[DONE]")]
        );
    }

    #[test]
    fn buffer_joins_multiline_data_and_skips_comments() {
        assert_eq!(
            events(&[":", "", "data: line one", "data:line two", "", "data: ", "data: ", ""]),
            [unnamed("line one\nline two"), unnamed("\n")]
        );
    }

    #[test]
    fn frames_are_classified_by_name() {
        assert_eq!(Frame::classify(&named("done", "[DONE]")), Frame::Done);
        assert_eq!(
            Frame::classify(&named("error", "[ERROR] turn cancelled")),
            Frame::Error("turn cancelled")
        );
        assert_eq!(Frame::classify(&unnamed("[DONE]")), Frame::Chunk("[DONE]"));
        assert_eq!(
            Frame::classify(&unnamed("[ERROR] not really")),
            Frame::Chunk("[ERROR] not really")
        );
    }

    #[test]
    fn generated_sessions_are_uuids() {
        let id = generate_uuid();
        assert_eq!(Uuid::parse_str(&id).unwrap().get_version_num(), 7);
    }
}
