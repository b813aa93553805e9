//! `serve`: host every configured region.

use anyhow::{Context, Result};
use omp_region::config::validate_config;
use omp_region::module::schema_resolver;
use omp_region::{CircuitManager, RegionModule, WebSocketHost};
use omp_types::config::ServerConfig;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Host every configured region until Ctrl+C.
pub async fn cmd_serve(config: ServerConfig) -> Result<()> {
    validate_config(&config)?;
    let resolver = schema_resolver(&config.schema)?;
    let circuits = Arc::new(CircuitManager::from_config(&config.circuits));
    let host = WebSocketHost::new();
    let module = RegionModule::new(&config, Arc::new(host.clone()), resolver, circuits);

    for region in &config.regions {
        module
            .add_region(region.clone())
            .with_context(|| format!("cannot host region '{}'", region.name))?;
    }
    if module.is_empty() {
        warn!("No regions configured; the server will accept no clients");
    }

    let (stop, stopped) = oneshot::channel::<()>();
    let (addr, server) = host
        .serve(config.listen_addr, async move {
            let _ = stopped.await;
        })
        .await?;
    info!(addr = %addr, regions = module.len(), "Region server running");

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for Ctrl+C")?;
    info!("Shutting down");
    module.close();
    let _ = stop.send(());
    let _ = server.await;
    Ok(())
}
