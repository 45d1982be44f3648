use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Konvo: presence tracking and unread bookkeeping for a realtime chat
/// backend.
#[derive(Parser, Debug)]
#[command(name = "konvo", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log filter directive override (e.g. "konvo=debug").
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the presence and unread scenarios against the in-memory backend
    /// and print the resulting documents.
    Demo {
        /// Stay online after the scenarios until Ctrl-C.
        #[arg(long)]
        hold: bool,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
