//! Region handshake payload.
//!
//! Sent to a client through `omp.connect.regionHandshake` once its session is
//! ready. The fields describe the region the client has just entered.

use omp_types::config::RegionConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CPU class advertised to every client.
pub const CPU_CLASS_ID: i32 = 9;
/// CPU ratio advertised to every client.
pub const CPU_RATIO: i32 = 1;

/// Default terrain textures, lowest to highest elevation.
pub const DEFAULT_TERRAIN_TEXTURES: [Uuid; 4] = [
    Uuid::from_u128(0xb8d3965a_ad78_bf43_699b_bff8eca6c975),
    Uuid::from_u128(0xabb783e6_3e93_26c0_248a_247666855da3),
    Uuid::from_u128(0x179cdabd_398a_9b6b_1391_4dc333ba321f),
    Uuid::from_u128(0xbeb169c7_11ea_fff2_efe5_0f24dc881df2),
];

/// Maturity rating of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimAccess {
    Pg,
    Mature,
    Adult,
}

impl SimAccess {
    /// Wire value of the rating.
    pub fn code(self) -> u8 {
        match self {
            SimAccess::Pg => 13,
            SimAccess::Mature => 21,
            SimAccess::Adult => 42,
        }
    }
}

/// Welcome payload describing a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionHandshake {
    pub region_flags: u64,
    pub sim_access: u8,
    pub sim_name: String,
    pub sim_owner: Uuid,
    pub is_estate_manager: bool,
    pub water_height: f32,
    pub billable_factor: f32,
    pub terrain_base: [Uuid; 4],
    pub terrain_detail: [Uuid; 4],
    pub terrain_start_height: [f32; 4],
    pub terrain_height_range: [f32; 4],
    pub region_id: Uuid,
    /// Fresh for every handshake.
    pub cache_id: Uuid,
    pub cpu_class_id: i32,
    pub cpu_ratio: i32,
    pub colo_name: String,
    pub product_name: String,
    pub product_sku: String,
}

impl RegionHandshake {
    /// Handshake for a configured region with default estate settings.
    pub fn for_region(region: &RegionConfig) -> Self {
        Self {
            region_flags: 0,
            sim_access: SimAccess::Pg.code(),
            sim_name: region.name.clone(),
            sim_owner: Uuid::nil(),
            is_estate_manager: false,
            water_height: 20.0,
            billable_factor: 0.0,
            terrain_base: DEFAULT_TERRAIN_TEXTURES,
            terrain_detail: DEFAULT_TERRAIN_TEXTURES,
            terrain_start_height: [10.0; 4],
            terrain_height_range: [60.0; 4],
            region_id: region.region_id,
            cache_id: Uuid::new_v4(),
            cpu_class_id: CPU_CLASS_ID,
            cpu_ratio: CPU_RATIO,
            colo_name: String::new(),
            product_name: region.region_type.clone(),
            product_sku: String::new(),
        }
    }

    /// A copy with a new cache id, for sending to one client.
    pub fn fresh(&self) -> Self {
        Self {
            cache_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn with_owner(mut self, owner: Uuid, is_estate_manager: bool) -> Self {
        self.sim_owner = owner;
        self.is_estate_manager = is_estate_manager;
        self
    }

    pub fn with_access(mut self, access: SimAccess) -> Self {
        self.sim_access = access.code();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> RegionConfig {
        toml::from_str("name = \"Sandbox\"\nloc_x = 1000\nloc_y = 1001\nregion_type = \"Estate\"")
            .unwrap()
    }

    #[test]
    fn test_for_region() {
        let region = region();
        let hs = RegionHandshake::for_region(&region);
        assert_eq!(hs.sim_name, "Sandbox");
        assert_eq!(hs.region_id, region.region_id);
        assert_eq!(hs.product_name, "Estate");
        assert_eq!(hs.cpu_class_id, 9);
        assert_eq!(hs.cpu_ratio, 1);
        assert!(hs.colo_name.is_empty() && hs.product_sku.is_empty());
    }

    #[test]
    fn test_fresh_changes_only_cache_id() {
        let hs = RegionHandshake::for_region(&region())
            .with_owner(Uuid::new_v4(), true)
            .with_access(SimAccess::Adult);
        let next = hs.fresh();
        assert_ne!(hs.cache_id, next.cache_id);
        assert_eq!(
            RegionHandshake {
                cache_id: hs.cache_id,
                ..next.clone()
            },
            hs
        );
        assert_eq!(next.sim_access, 42);
        assert!(next.is_estate_manager);
    }

    #[test]
    fn test_serialises_as_object() {
        let value = serde_json::to_value(RegionHandshake::for_region(&region())).unwrap();
        assert_eq!(value["sim_name"], "Sandbox");
        assert_eq!(value["terrain_base"].as_array().unwrap().len(), 4);
        assert_eq!(value["terrain_height_range"][3], 60.0);
    }
}
