//! Interface schema resolution.
//!
//! Loading an interface into a channel requires resolving its identifier to a
//! schema document. The schema language is not interpreted here; a schema is
//! the identifier plus the opaque document text.

use async_trait::async_trait;
use omp_types::error::OmpError;
use omp_types::interface::{InterfaceId, CONNECT_CLIENT_IDL, CONNECT_SERVER_IDL, INTERFACE_IDL};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A resolved interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSchema {
    pub id: InterfaceId,
    /// Raw schema document.
    pub document: String,
}

/// Resolves interface identifiers to schemas.
#[async_trait]
pub trait SchemaResolver: Send + Sync + 'static {
    /// Resolve `id`, failing with [`OmpError::SchemaError`].
    async fn resolve(&self, id: &InterfaceId) -> Result<InterfaceSchema, OmpError>;
}

/// Resolver backed by an in-process catalogue.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaResolver {
    documents: HashMap<InterfaceId, String>,
}

impl StaticSchemaResolver {
    /// An empty catalogue: every identifier fails to resolve.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalogue preloaded with the standard interfaces.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(
                INTERFACE_IDL,
                "service omp.interface { boolean implements(string interfaceURI); }",
            )
            .with(
                CONNECT_SERVER_IDL,
                "service omp.connect { void useCircuitCode(u32 code, string agentID, string sessionID); }",
            )
            .with(
                CONNECT_CLIENT_IDL,
                "service omp.connect { void regionHandshake(RegionHandshake handshake); }",
            )
    }

    /// Add (or replace) a catalogue entry.
    pub fn with(mut self, id: impl Into<InterfaceId>, document: impl Into<String>) -> Self {
        self.documents.insert(id.into(), document.into());
        self
    }
}

#[async_trait]
impl SchemaResolver for StaticSchemaResolver {
    async fn resolve(&self, id: &InterfaceId) -> Result<InterfaceSchema, OmpError> {
        self.documents
            .get(id)
            .map(|document| InterfaceSchema {
                id: id.clone(),
                document: document.clone(),
            })
            .ok_or_else(|| OmpError::SchemaError {
                interface: id.to_string(),
                reason: "unknown interface".to_string(),
            })
    }
}

/// Resolver that fetches each identifier as a URL.
#[derive(Debug, Clone)]
pub struct HttpSchemaResolver {
    client: reqwest::Client,
}

impl HttpSchemaResolver {
    pub fn new(timeout: Duration) -> Result<Self, OmpError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OmpError::Config(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SchemaResolver for HttpSchemaResolver {
    async fn resolve(&self, id: &InterfaceId) -> Result<InterfaceSchema, OmpError> {
        let schema_err = |reason: String| OmpError::SchemaError {
            interface: id.to_string(),
            reason,
        };

        debug!(interface = %id, "Fetching interface schema");
        let resp = self
            .client
            .get(id.as_str())
            .send()
            .await
            .map_err(|e| schema_err(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(schema_err(format!("HTTP {status}")));
        }
        let document = resp.text().await.map_err(|e| schema_err(e.to_string()))?;
        Ok(InterfaceSchema {
            id: id.clone(),
            document,
        })
    }
}
