//! Region coordinates and endpoint addressing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default prefix for region service paths.
pub const DEFAULT_PATH_PREFIX: &str = "/region/";

/// Grid location of a region. Stable for the lifetime of the region, which
/// makes it a collision-free key for per-region endpoints on one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegionCoords {
    /// Grid X location.
    pub x: u32,
    /// Grid Y location.
    pub y: u32,
}

impl RegionCoords {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Service path for this region: `<prefix><x>x<y>`.
    pub fn service_path(&self, prefix: &str) -> String {
        format!("{prefix}{}x{}", self.x, self.y)
    }
}

impl fmt::Display for RegionCoords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}
