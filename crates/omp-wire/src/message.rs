//! RPC frame types.
//!
//! Every frame is one JSON object carried in one text message of the
//! transport. Calls and their replies share a numeric `id` chosen by the
//! caller.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An RPC frame (envelope).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcMessage {
    /// Call identifier, echoed by the reply.
    pub id: u64,
    /// Frame variant.
    #[serde(flatten)]
    pub kind: RpcMessageKind,
}

/// The different kinds of frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RpcMessageKind {
    /// Invoke a function registered on the receiving side.
    #[serde(rename = "call")]
    Call {
        /// Function name.
        method: String,
        /// Positional arguments.
        #[serde(default)]
        args: Vec<Value>,
    },
    /// Successful return value.
    #[serde(rename = "result")]
    Result {
        #[serde(default)]
        value: Value,
    },
    /// The remote function ran and reported a failure.
    #[serde(rename = "error")]
    Error {
        /// Error code.
        code: i32,
        /// Error message.
        message: String,
    },
    /// The remote side could not execute the call at all.
    #[serde(rename = "exception")]
    Exception {
        /// Description of the fault.
        message: String,
    },
}

impl RpcMessage {
    pub fn call(id: u64, method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            id,
            kind: RpcMessageKind::Call {
                method: method.into(),
                args,
            },
        }
    }

    pub fn result(id: u64, value: Value) -> Self {
        Self {
            id,
            kind: RpcMessageKind::Result { value },
        }
    }

    pub fn error(id: u64, code: i32, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: RpcMessageKind::Error {
                code,
                message: message.into(),
            },
        }
    }

    pub fn exception(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            kind: RpcMessageKind::Exception {
                message: message.into(),
            },
        }
    }
}

/// Method is not registered on the receiving side.
pub const ERR_NOT_REGISTERED: i32 = -32601;
/// Arguments do not match the function.
pub const ERR_INVALID_ARGS: i32 = -32602;
/// The function failed internally.
pub const ERR_INTERNAL: i32 = -32603;

/// Maximum single frame size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encode a frame to JSON text.
pub fn encode_message(msg: &RpcMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Parse JSON text into a frame.
pub fn decode_message(text: &str) -> Result<RpcMessage, serde_json::Error> {
    serde_json::from_str(text)
}
