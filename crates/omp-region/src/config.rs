//! Configuration loading from `~/.omp/config.toml` with defaults.

use omp_types::config::ServerConfig;
use omp_types::error::{OmpError, OmpResult};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Load server configuration from a TOML file, with defaults.
///
/// A missing, unreadable or unparsable file is not fatal: it is logged and
/// the defaults are used.
pub fn load_config(path: Option<&Path>) -> ServerConfig {
    let config_path = path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(default_config_path);

    if !config_path.exists() {
        info!(
            path = %config_path.display(),
            "Config file not found, using defaults"
        );
        return ServerConfig::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(contents) => match toml::from_str::<ServerConfig>(&contents) {
            Ok(config) => {
                info!(
                    path = %config_path.display(),
                    regions = config.regions.len(),
                    "Loaded configuration"
                );
                config
            }
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to parse config, using defaults"
                );
                ServerConfig::default()
            }
        },
        Err(e) => {
            warn!(
                error = %e,
                path = %config_path.display(),
                "Failed to read config file, using defaults"
            );
            ServerConfig::default()
        }
    }
}

/// Default config location: `~/.omp/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".omp")
        .join("config.toml")
}

/// Reject configurations that cannot be hosted.
///
/// Two regions on the same grid location would share a service path, and a
/// prefix without a leading slash cannot be routed.
pub fn validate_config(config: &ServerConfig) -> OmpResult<()> {
    if !config.path_prefix.starts_with('/') {
        return Err(OmpError::Config(format!(
            "path_prefix must start with '/': {:?}",
            config.path_prefix
        )));
    }

    let mut coords = HashSet::new();
    let mut ids = HashSet::new();
    for region in &config.regions {
        if !coords.insert(region.coords()) {
            return Err(OmpError::Config(format!(
                "region '{}' shares grid location {} with another region",
                region.name,
                region.coords()
            )));
        }
        if !ids.insert(region.region_id) {
            return Err(OmpError::Config(format!(
                "region '{}' reuses region id {}",
                region.name, region.region_id
            )));
        }
    }

    let mut codes = HashSet::new();
    for circuit in &config.circuits {
        if !codes.insert(circuit.code) {
            warn!(code = circuit.code, "Duplicate circuit code, the last entry wins");
        }
    }
    Ok(())
}
