use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Parser)]
#[command(name = "cacheproxy", about = "Forwarding HTTP proxy with an in-memory response cache")]
pub struct Cli {
    /// TCP port to accept client connections on.
    pub port: u16,

    /// Optional TOML file with tuning settings (limits, timeouts, cache sizes).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured log format.
    #[arg(long, value_enum)]
    pub log: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
