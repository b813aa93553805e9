//! Region host for the OMP region link.
//!
//! Wires the protocol layer into a running region server: configuration
//! loading, the WebSocket endpoint host, the circuit table used to
//! authenticate clients, per-region session events and the region lifecycle.

pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod handshake;
pub mod host;
pub mod module;

pub use auth::CircuitManager;
pub use error::{RegionError, RegionResult};
pub use events::{RegionEvent, RegionEvents, SessionEvent};
pub use handshake::RegionHandshake;
pub use host::WebSocketHost;
pub use module::{RegionHandle, RegionModule};
