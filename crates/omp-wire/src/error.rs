//! Errors from the wire protocol layer.

use omp_types::error::OmpError;
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    /// A protocol-level error from the shared taxonomy.
    #[error(transparent)]
    Omp(#[from] OmpError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
}

impl WireError {
    /// Shorthand for the `ChannelClosed` taxonomy entry.
    pub fn closed() -> Self {
        WireError::Omp(OmpError::ChannelClosed)
    }

    pub fn not_registered(name: impl Into<String>) -> Self {
        WireError::Omp(OmpError::NotRegistered(name.into()))
    }

    pub fn is_channel_closed(&self) -> bool {
        matches!(self, WireError::Omp(OmpError::ChannelClosed))
    }
}

/// Alias for wire results.
pub type WireResult<T> = Result<T, WireError>;

/// Failure outcome of one remote call.
///
/// A pending call resolves to exactly one of: a value, [`CallError::Remote`]
/// (the remote function reported failure), or one of the transport-level
/// variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The remote function ran and reported an error.
    #[error("remote error {code}: {message}")]
    Remote { code: i32, message: String },
    /// The call could not be carried out: the peer crashed, a frame could not
    /// be (de)serialised, or the remote side failed to execute it.
    #[error("exception: {0}")]
    Exception(String),
    /// The channel closed before a reply arrived.
    #[error("channel closed")]
    ChannelClosed,
}

impl From<CallError> for WireError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Remote { code, message } => {
                WireError::Omp(OmpError::RemoteFault { code, message })
            }
            CallError::Exception(message) => WireError::Omp(OmpError::RemoteFault {
                code: crate::message::ERR_INTERNAL,
                message,
            }),
            CallError::ChannelClosed => WireError::closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_error_maps_to_taxonomy() {
        let e: WireError = CallError::Remote {
            code: 5,
            message: "nope".into(),
        }
        .into();
        assert!(matches!(e, WireError::Omp(OmpError::RemoteFault { code: 5, .. })));

        let e: WireError = CallError::ChannelClosed.into();
        assert!(e.is_channel_closed());
    }
}
