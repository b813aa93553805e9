//! OMP region link wire protocol.
//!
//! Lets a region server and a connecting client confirm, over an RPC channel
//! on a persistent text transport, which interfaces each side supports before
//! any application call is permitted.
//!
//! ## Architecture
//!
//! - **RpcChannel**: one transport connection; local functions, remote proxies, pending calls
//! - **InterfaceRegistry**: interfaces served locally and interfaces required from the peer
//! - **Negotiator**: first-failure-wins state machine over concurrent capability checks
//! - **Session**: one negotiated peer; binds remote functions once every check passes
//! - **Listener**: authenticates new connections on a region endpoint and owns live sessions
//! - **ClientConnector**: the peer role, for probing a region

pub mod channel;
pub mod connector;
pub mod error;
pub mod listener;
pub mod message;
pub mod negotiation;
pub mod registry;
pub mod schema;
pub mod session;
pub mod transport;

pub use channel::{LocalFunction, PendingCall, RemoteProxy, RpcChannel};
pub use connector::{ClientConfig, ClientConnector};
pub use error::{CallError, WireError, WireResult};
pub use listener::{
    Authenticator, CircuitCredentials, ConnectionHandler, EndpointHost, Listener, MemoryHost,
};
pub use message::{RpcMessage, RpcMessageKind};
pub use negotiation::{FailureReason, NegotiationEvent, NegotiationState, Negotiator, Verdict};
pub use registry::InterfaceRegistry;
pub use schema::{HttpSchemaResolver, InterfaceSchema, SchemaResolver, StaticSchemaResolver};
pub use session::{Session, SessionConfig, SessionId, SessionObserver, SessionOwner, SessionPhase};
pub use transport::{Transport, TransportEvent};
