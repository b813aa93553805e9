//! omp-server — region server and probe client for the OMP region link.

mod cli;
mod cmd;

use crate::cli::{Cli, Commands};
use anyhow::Result;
use clap::Parser;
use omp_region::config::load_config;
use omp_wire::CircuitCredentials;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, listen } => {
            let mut config = load_config(config.as_deref());
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            init_tracing(&config.log_level, cli.log_json);
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd::serve::cmd_serve(config))
        }
        Commands::Probe {
            url,
            code,
            agent_id,
            session_id,
            timeout_secs,
        } => {
            init_tracing("warn", cli.log_json);
            let credentials = CircuitCredentials {
                circuit_code: code,
                agent_id,
                session_id,
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cmd::probe::cmd_probe(
                &url,
                credentials,
                Duration::from_secs(timeout_secs),
            ))
        }
    }
}
