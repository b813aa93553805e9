//! Server configuration types.
//!
//! Every section has defaults, so an empty `config.toml` is a valid
//! configuration that serves no regions.

use crate::interface::{
    FunctionName, CONNECT_CLIENT_IDL, CONNECT_SERVER_IDL, INTERFACE_IDL,
};
use crate::region::{RegionCoords, DEFAULT_PATH_PREFIX};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket host binds.
    pub listen_addr: SocketAddr,
    /// Prefix prepended to every region service path.
    pub path_prefix: String,
    /// Fallback log filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Regions hosted by this server.
    pub regions: Vec<RegionConfig>,
    /// Interfaces and functions negotiated with each client.
    pub negotiation: NegotiationConfig,
    /// How interface identifiers are resolved.
    pub schema: SchemaConfig,
    /// Pre-authorised circuits.
    pub circuits: Vec<CircuitConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
            log_level: "info".to_string(),
            regions: Vec::new(),
            negotiation: NegotiationConfig::default(),
            schema: SchemaConfig::default(),
            circuits: Vec::new(),
        }
    }
}

/// One hosted region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Region name, sent to clients in the welcome payload.
    pub name: String,
    /// Grid X location.
    pub loc_x: u32,
    /// Grid Y location.
    pub loc_y: u32,
    /// Stable region UUID.
    #[serde(default = "Uuid::new_v4")]
    pub region_id: Uuid,
    /// Product name advertised to clients.
    #[serde(default = "default_region_type")]
    pub region_type: String,
}

fn default_region_type() -> String {
    "Mainland".to_string()
}

impl RegionConfig {
    pub fn coords(&self) -> RegionCoords {
        RegionCoords::new(self.loc_x, self.loc_y)
    }
}

/// Interfaces served locally, interfaces required from the peer, and the
/// remote functions bound once negotiation succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Interfaces this side advertises.
    pub local_interfaces: Vec<String>,
    /// Interfaces the peer must confirm.
    pub remote_interfaces: Vec<String>,
    /// Remote functions bound after negotiation.
    pub remote_functions: Vec<FunctionName>,
    /// Upper bound on a single capability check, in seconds. 0 waits forever.
    pub check_timeout_secs: u64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            local_interfaces: vec![INTERFACE_IDL.to_string(), CONNECT_SERVER_IDL.to_string()],
            remote_interfaces: vec![INTERFACE_IDL.to_string(), CONNECT_CLIENT_IDL.to_string()],
            remote_functions: vec![FunctionName::RegionHandshake],
            check_timeout_secs: 30,
        }
    }
}

impl NegotiationConfig {
    /// The per-check timeout, or `None` when checks are unbounded.
    pub fn check_timeout(&self) -> Option<Duration> {
        (self.check_timeout_secs > 0).then(|| Duration::from_secs(self.check_timeout_secs))
    }
}

/// Where interface schemas come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaMode {
    /// Built-in catalogue of known identifiers.
    Static,
    /// Fetch each identifier over HTTP.
    Http,
}

/// Schema resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub mode: SchemaMode,
    /// Timeout for a single HTTP fetch, in seconds.
    pub fetch_timeout_secs: u64,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            mode: SchemaMode::Static,
            fetch_timeout_secs: 10,
        }
    }
}

/// A circuit the region expects a client to present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    pub code: u32,
    pub agent_id: Uuid,
    pub session_id: Uuid,
}
