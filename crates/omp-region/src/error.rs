//! Region-host error types.

use omp_types::error::OmpError;
use omp_wire::WireError;
use std::net::SocketAddr;
use thiserror::Error;
use uuid::Uuid;

/// Region-host error type wrapping the wire and shared errors.
#[derive(Error, Debug)]
pub enum RegionError {
    /// A wrapped wire-layer error.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A wrapped shared error.
    #[error(transparent)]
    Omp(#[from] OmpError),

    /// The endpoint host could not bind its address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A region with this id is already hosted.
    #[error("Region {0} is already hosted")]
    DuplicateRegion(Uuid),
}

/// Alias for region-host results.
pub type RegionResult<T> = Result<T, RegionError>;
