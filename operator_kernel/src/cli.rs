//! Command-line interface definitions using clap derive API.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Operator kernel CLI
#[derive(Debug, Parser)]
#[command(name = "operator-kernel")]
#[command(about = "Orchestration kernel for scheduled, access-controlled agents")]
#[command(version)]
pub struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server and worker pool
    Serve {
        /// Address to bind to (overrides server.host and server.port)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Print the status snapshot of a freshly configured kernel as JSON
    Status,
    /// Run one prompt through an agent and print the outcome as JSON
    Run {
        prompt: String,
        #[arg(short, long, default_value = "assistant")]
        agent: String,
    },
}
