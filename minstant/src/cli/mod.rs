//! Command-line entry points: the server and a thin streaming client.

mod args;
mod commands;

pub use args::Cli;
pub use commands::execute;
