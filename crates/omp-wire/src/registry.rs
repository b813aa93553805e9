//! Interface registry — which interfaces a channel knows about.
//!
//! Every interface referenced by a channel must be loaded first. A loaded
//! interface is "local" when this side serves it (and answers `true` to the
//! capability check) and "required" when the peer must confirm it.

use crate::schema::InterfaceSchema;
use chrono::{DateTime, Utc};
use omp_types::interface::InterfaceId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Role of a loaded interface on this side of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceRole {
    /// Served by this side.
    Local,
    /// Must be confirmed by the peer.
    Required,
}

/// An entry for one loaded interface.
#[derive(Debug, Clone)]
pub struct InterfaceEntry {
    pub schema: InterfaceSchema,
    /// Served by this side.
    pub local: bool,
    /// Required from the peer.
    pub required: bool,
    pub loaded_at: DateTime<Utc>,
}

/// Thread-safe registry of loaded interfaces.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRegistry {
    entries: Arc<RwLock<HashMap<InterfaceId, InterfaceEntry>>>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `id` has been loaded in any role.
    pub fn is_loaded(&self, id: &InterfaceId) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.contains_key(id)
    }

    /// Record a resolved schema. Loading twice keeps the first schema.
    pub fn insert(&self, schema: InterfaceSchema) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries
            .entry(schema.id.clone())
            .or_insert_with(|| InterfaceEntry {
                schema,
                local: false,
                required: false,
                loaded_at: Utc::now(),
            });
    }

    /// Add a role to a loaded interface. Returns false if `id` is not loaded.
    pub fn mark(&self, id: &InterfaceId, role: InterfaceRole) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(id) {
            Some(entry) => {
                match role {
                    InterfaceRole::Local => entry.local = true,
                    InterfaceRole::Required => entry.required = true,
                }
                true
            }
            None => false,
        }
    }

    /// Capability-check lookup: does this side serve `id`?
    pub fn implements(&self, id: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(&InterfaceId::from(id))
            .map(|e| e.local)
            .unwrap_or(false)
    }

    /// Get a snapshot of one entry.
    pub fn get(&self, id: &InterfaceId) -> Option<InterfaceEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(id).cloned()
    }

    /// All interfaces served locally, sorted.
    pub fn local_interfaces(&self) -> Vec<InterfaceId> {
        self.with_role(|e| e.local)
    }

    /// All interfaces required from the peer, sorted.
    pub fn required_interfaces(&self) -> Vec<InterfaceId> {
        self.with_role(|e| e.required)
    }

    fn with_role(&self, pred: impl Fn(&InterfaceEntry) -> bool) -> Vec<InterfaceId> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<InterfaceId> = entries
            .values()
            .filter(|e| pred(e))
            .map(|e| e.schema.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of loaded interfaces.
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(id: &str) -> InterfaceSchema {
        InterfaceSchema {
            id: InterfaceId::from(id),
            document: format!("doc for {id}"),
        }
    }

    #[test]
    fn test_insert_is_idempotent() {
        let registry = InterfaceRegistry::new();
        registry.insert(schema("urn:a"));
        registry.mark(&InterfaceId::from("urn:a"), InterfaceRole::Local);
        registry.insert(schema("urn:a"));

        assert_eq!(registry.len(), 1);
        // Reloading must not drop the role.
        assert!(registry.implements("urn:a"));
    }

    #[test]
    fn test_required_is_not_implemented() {
        let registry = InterfaceRegistry::new();
        registry.insert(schema("urn:remote"));
        registry.mark(&InterfaceId::from("urn:remote"), InterfaceRole::Required);

        assert!(!registry.implements("urn:remote"));
        assert_eq!(
            registry.required_interfaces(),
            vec![InterfaceId::from("urn:remote")]
        );
        assert!(registry.local_interfaces().is_empty());
    }

    #[test]
    fn test_mark_unloaded_fails() {
        let registry = InterfaceRegistry::new();
        assert!(!registry.mark(&InterfaceId::from("urn:x"), InterfaceRole::Local));
        assert!(!registry.implements("urn:x"));
        assert!(!registry.implements(""));
    }

    #[test]
    fn test_both_roles() {
        let registry = InterfaceRegistry::new();
        registry.insert(schema("urn:both"));
        let id = InterfaceId::from("urn:both");
        registry.mark(&id, InterfaceRole::Local);
        registry.mark(&id, InterfaceRole::Required);

        let entry = registry.get(&id).unwrap();
        assert!(entry.local && entry.required);
    }
}
