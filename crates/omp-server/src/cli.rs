//! Clap CLI definitions for omp-server.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use uuid::Uuid;

/// OMP region server: hosts region endpoints and negotiates capabilities
/// with connecting clients.
#[derive(Parser)]
#[command(name = "omp-server", version)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host every configured region until interrupted.
    Serve {
        /// Path to config file (default: ~/.omp/config.toml).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Connect to a region as a client and print its handshake.
    Probe {
        /// Region endpoint, e.g. ws://127.0.0.1:9000/region/1000x1000.
        #[arg(long)]
        url: String,
        /// Circuit code issued for this client.
        #[arg(long)]
        code: u32,
        #[arg(long)]
        agent_id: Uuid,
        #[arg(long)]
        session_id: Uuid,
        /// Seconds to wait for the region handshake.
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}
