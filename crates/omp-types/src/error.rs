//! Shared error types for the region link.

use thiserror::Error;

/// Top-level error type for the region link.
#[derive(Error, Debug)]
pub enum OmpError {
    /// The connecting peer failed the circuit check.
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// An interface identifier could not be resolved to a schema.
    #[error("Schema error for '{interface}': {reason}")]
    SchemaError {
        /// The interface identifier that failed to resolve.
        interface: String,
        /// Why resolution failed.
        reason: String,
    },

    /// The remote peer explicitly lacks a required interface.
    #[error("Capability not supported by peer: {0}")]
    CapabilityUnsupported(String),

    /// The remote peer reported a failure or crashed while serving a call.
    #[error("Remote fault {code}: {message}")]
    RemoteFault {
        /// Error code reported by (or synthesised for) the remote side.
        code: i32,
        /// Human-readable description.
        message: String,
    },

    /// A call was attempted for a name that is not bound.
    #[error("Function {0} is not registered")]
    NotRegistered(String),

    /// A local function name was bound twice on the same channel.
    #[error("Function {0} is already registered")]
    DuplicateRegistration(String),

    /// The channel was closed before or during the operation.
    #[error("Channel closed")]
    ChannelClosed,

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with OmpError.
pub type OmpResult<T> = Result<T, OmpError>;
