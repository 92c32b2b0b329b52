//! CLI argument definitions.

use std::net::IpAddr;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Minstant - streaming chat assistant with read-only database tools
#[derive(Parser, Debug)]
#[command(name = "minstant")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the chat server
    Serve(ServeArgs),

    /// Send one message to a running server and print the streamed reply
    Chat(ChatArgs),
}

/// Server configuration. Every flag can also be set through its environment
/// variable.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Database the assistant's tools read from
    #[arg(long, env = "QUERY_DATABASE_URL", hide_env_values = true)]
    pub query_database_url: String,

    /// Database holding chat sessions (in-memory sessions when unset)
    #[arg(long, env = "CHAT_DATABASE_URL", hide_env_values = true)]
    pub chat_database_url: Option<String>,

    /// API key of the model provider
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: String,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    /// Model name
    #[arg(short, long = "model", env = "AI_MODEL", default_value = "gpt-4o-mini")]
    pub ai_model: String,

    /// Tool-calling rounds allowed per turn
    #[arg(long, env = "MAX_TOOL_ROUNDS", default_value_t = 5)]
    pub max_tool_rounds: usize,

    /// Turns generating at the same time; further turns wait
    #[arg(long, env = "MAX_CONCURRENT_TURNS", default_value_t = 64)]
    pub max_concurrent_turns: usize,

    /// Connections per database pool
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub db_max_connections: u32,
}

/// Client options for `chat`.
#[derive(Args, Debug)]
pub struct ChatArgs {
    /// Server base URL
    #[arg(long, env = "MINSTANT_URL", default_value = "http://127.0.0.1:8080")]
    pub server: String,

    /// Caller id sent in the X-User-Id header
    #[arg(long, env = "MINSTANT_USER_ID")]
    pub user_id: String,

    /// Session to continue (a new one is created when omitted)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Display name passed to the assistant
    #[arg(long)]
    pub full_name: Option<String>,

    /// Latitude of the caller
    #[arg(long, requires = "long", allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Longitude of the caller
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    pub long: Option<f64>,

    /// Message to send
    #[arg(trailing_var_arg = true, required = true)]
    pub message: Vec<String>,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Pretty,
    /// One JSON object per line
    Json,
}
