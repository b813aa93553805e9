//! Region module — hosts one listener per region.
//!
//! The embedding server calls [`RegionModule::add_region`] and
//! [`RegionModule::remove_region`] as regions come and go, and
//! [`RegionModule::close`] on shutdown.

use crate::auth::CircuitManager;
use crate::error::{RegionError, RegionResult};
use crate::events::RegionEvents;
use crate::handshake::RegionHandshake;

use dashmap::DashMap;
use omp_types::config::{RegionConfig, SchemaConfig, SchemaMode, ServerConfig};
use omp_types::error::OmpResult;
use omp_wire::{
    EndpointHost, HttpSchemaResolver, Listener, SchemaResolver, SessionConfig,
    StaticSchemaResolver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Build the schema resolver selected by `config`.
pub fn schema_resolver(config: &SchemaConfig) -> OmpResult<Arc<dyn SchemaResolver>> {
    let resolver: Arc<dyn SchemaResolver> = match config.mode {
        SchemaMode::Static => Arc::new(StaticSchemaResolver::with_defaults()),
        SchemaMode::Http => Arc::new(HttpSchemaResolver::new(Duration::from_secs(
            config.fetch_timeout_secs,
        ))?),
    };
    Ok(resolver)
}

/// A hosted region.
#[derive(Debug)]
pub struct RegionHandle {
    config: RegionConfig,
    listener: Arc<Listener>,
    events: Arc<RegionEvents>,
}

impl RegionHandle {
    pub fn config(&self) -> &RegionConfig {
        &self.config
    }

    /// Service path clients connect to.
    pub fn path(&self) -> &str {
        self.listener.path()
    }

    pub fn listener(&self) -> &Arc<Listener> {
        &self.listener
    }

    pub fn events(&self) -> &Arc<RegionEvents> {
        &self.events
    }
}

/// Region lifecycle adapter.
pub struct RegionModule {
    path_prefix: String,
    session_config: SessionConfig,
    host: Arc<dyn EndpointHost>,
    resolver: Arc<dyn SchemaResolver>,
    circuits: Arc<CircuitManager>,
    regions: DashMap<Uuid, Arc<RegionHandle>>,
}

impl RegionModule {
    pub fn new(
        config: &ServerConfig,
        host: Arc<dyn EndpointHost>,
        resolver: Arc<dyn SchemaResolver>,
        circuits: Arc<CircuitManager>,
    ) -> Self {
        Self {
            path_prefix: config.path_prefix.clone(),
            session_config: SessionConfig::from_negotiation(&config.negotiation),
            host,
            resolver,
            circuits,
            regions: DashMap::new(),
        }
    }

    pub fn circuits(&self) -> &Arc<CircuitManager> {
        &self.circuits
    }

    /// Start serving a region on its coordinate-derived path.
    pub fn add_region(&self, region: RegionConfig) -> RegionResult<Arc<RegionHandle>> {
        if self.regions.contains_key(&region.region_id) {
            return Err(RegionError::DuplicateRegion(region.region_id));
        }

        let path = region.coords().service_path(&self.path_prefix);
        let events = Arc::new(RegionEvents::new(RegionHandshake::for_region(&region)));
        let listener = Listener::new(
            path,
            Arc::clone(&self.host),
            Arc::clone(&self.resolver),
            self.circuits.clone(),
            events.clone(),
            self.session_config.clone(),
        );
        listener.start()?;

        info!(
            region = %region.name,
            region_id = %region.region_id,
            path = %listener.path(),
            "Region added"
        );
        let handle = Arc::new(RegionHandle {
            config: region,
            listener,
            events,
        });
        self.regions
            .insert(handle.config.region_id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Stop accepting clients for a region. Connected clients stay.
    pub fn remove_region(&self, region_id: Uuid) -> Option<Arc<RegionHandle>> {
        let (_, handle) = self.regions.remove(&region_id)?;
        handle.listener.stop();
        info!(region = %handle.config.name, region_id = %region_id, "Region removed");
        Some(handle)
    }

    pub fn region(&self, region_id: Uuid) -> Option<Arc<RegionHandle>> {
        self.regions.get(&region_id).map(|r| Arc::clone(r.value()))
    }

    /// Hosted regions, ordered by path.
    pub fn regions(&self) -> Vec<Arc<RegionHandle>> {
        let mut regions: Vec<Arc<RegionHandle>> =
            self.regions.iter().map(|r| Arc::clone(r.value())).collect();
        regions.sort_by(|a, b| a.path().cmp(b.path()));
        regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Remove every region and disconnect every client.
    pub fn close(&self) {
        let ids: Vec<Uuid> = self.regions.iter().map(|r| *r.key()).collect();
        for id in ids {
            if let Some(handle) = self.remove_region(id) {
                handle.listener.close_sessions();
            }
        }
    }
}

impl std::fmt::Debug for RegionModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionModule")
            .field("path_prefix", &self.path_prefix)
            .field("regions", &self.regions.len())
            .finish()
    }
}
