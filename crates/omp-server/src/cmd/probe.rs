//! `probe`: connect to a region as a client and print its handshake.

use anyhow::{Context, Result};
use omp_types::interface::FunctionName;
use omp_wire::{
    CallError, CircuitCredentials, ClientConfig, ClientConnector, LocalFunction,
    StaticSchemaResolver,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub async fn cmd_probe(url: &str, credentials: CircuitCredentials, timeout: Duration) -> Result<()> {
    let (tx, mut handshakes) = mpsc::unbounded_channel::<Value>();
    let config = ClientConfig::new(credentials).with_handler(
        FunctionName::RegionHandshake.as_str(),
        LocalFunction::handler(move |mut args| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(args.pop().unwrap_or(Value::Null));
                Ok::<_, CallError>(Value::Null)
            }
        }),
    );

    let client = ClientConnector::connect_url(
        url,
        Arc::new(StaticSchemaResolver::with_defaults()),
        config,
    )
    .await
    .with_context(|| format!("cannot connect to {url}"))?;

    let payload = tokio::time::timeout(timeout, handshakes.recv())
        .await
        .context("timed out waiting for the region handshake")?
        .context("connection closed before the region handshake")?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    client.close();
    Ok(())
}
