//! Interface identifiers and the well-known function names of the protocol.
//!
//! An interface is a named set of remote functions a peer may or may not
//! support. Identifiers are flat opaque tokens: they happen to be URLs, but
//! nothing here parses them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Interface describing the capability-check function itself.
pub const INTERFACE_IDL: &str = "http://yellow.cg.uni-saarland.de/home/kiara/idl/interface.kiara";

/// Interface served by a region server (authentication entry point).
pub const CONNECT_SERVER_IDL: &str =
    "http://yellow.cg.uni-saarland.de/home/kiara/idl/connectServer.kiara";

/// Interface a connecting client must serve (region welcome receiver).
pub const CONNECT_CLIENT_IDL: &str =
    "http://yellow.cg.uni-saarland.de/home/kiara/idl/connectClient.kiara";

/// Opaque capability identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceId(String);

impl InterfaceId {
    /// Wrap an identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterfaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for InterfaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Closed set of function names this protocol binds.
///
/// The string form is the wire contract; the enum exists so configuration
/// and registration can be checked against the names the protocol expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionName {
    /// "Does this side implement interface X".
    #[serde(rename = "omp.interface.implements")]
    InterfaceImplements,
    /// Authentication entry point on the region server.
    #[serde(rename = "omp.connect.useCircuitCode")]
    UseCircuitCode,
    /// Region welcome payload pushed to a ready client.
    #[serde(rename = "omp.connect.regionHandshake")]
    RegionHandshake,
}

impl FunctionName {
    /// Every known name, in declaration order.
    pub const ALL: [FunctionName; 3] = [
        FunctionName::InterfaceImplements,
        FunctionName::UseCircuitCode,
        FunctionName::RegionHandshake,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionName::InterfaceImplements => "omp.interface.implements",
            FunctionName::UseCircuitCode => "omp.connect.useCircuitCode",
            FunctionName::RegionHandshake => "omp.connect.regionHandshake",
        }
    }

    /// Signature hint sent along with registrations and proxies.
    pub fn signature(&self) -> &'static str {
        match self {
            FunctionName::InterfaceImplements => "boolean(string)",
            FunctionName::UseCircuitCode => "void(u32,string,string)",
            FunctionName::RegionHandshake => "void(RegionHandshake)",
        }
    }

    /// Signature hint for an arbitrary function name; unknown names get `...`.
    pub fn signature_of(name: &str) -> &'static str {
        name.parse::<FunctionName>()
            .map(|f| f.signature())
            .unwrap_or("...")
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FunctionName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FunctionName::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown function name: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_name_roundtrip() {
        for f in FunctionName::ALL {
            assert_eq!(f.as_str().parse::<FunctionName>().unwrap(), f);
        }
        assert!("omp.nope".parse::<FunctionName>().is_err());
    }

    #[test]
    fn test_function_name_serde_uses_wire_name() {
        let json = serde_json::to_string(&FunctionName::RegionHandshake).unwrap();
        assert_eq!(json, "\"omp.connect.regionHandshake\"");
        let bad: Result<FunctionName, _> = serde_json::from_str("\"omp.connect.other\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_signature_hints() {
        assert_eq!(FunctionName::InterfaceImplements.signature(), "boolean(string)");
        assert_eq!(
            FunctionName::signature_of("omp.connect.useCircuitCode"),
            "void(u32,string,string)"
        );
        assert_eq!(FunctionName::signature_of("app.custom"), "...");
    }

    #[test]
    fn test_interface_id_is_transparent() {
        let id = InterfaceId::from("urn:a");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"urn:a\"");
        assert_eq!(id.to_string(), "urn:a");
    }
}
