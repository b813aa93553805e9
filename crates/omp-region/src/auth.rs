//! Circuit table: which clients a region expects.
//!
//! Each expected circuit is keyed by its code and bound to one agent and one
//! session id. A client authenticates by presenting all three.

use async_trait::async_trait;
use dashmap::DashMap;
use omp_types::config::CircuitConfig;
use omp_wire::{Authenticator, CircuitCredentials};
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use uuid::Uuid;

/// An expected circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Circuit {
    pub agent_id: Uuid,
    pub session_id: Uuid,
}

/// Table of expected circuits, shared by every hosted region.
#[derive(Debug, Default)]
pub struct CircuitManager {
    circuits: DashMap<u32, Circuit>,
}

impl CircuitManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from configured circuits.
    pub fn from_config(circuits: &[CircuitConfig]) -> Self {
        let manager = Self::new();
        for c in circuits {
            manager.add_circuit(c.code, c.agent_id, c.session_id);
        }
        info!(circuits = manager.len(), "Circuit table loaded");
        manager
    }

    /// Expect a circuit. Replaces any previous entry for `code`.
    pub fn add_circuit(&self, code: u32, agent_id: Uuid, session_id: Uuid) {
        self.circuits.insert(
            code,
            Circuit {
                agent_id,
                session_id,
            },
        );
        debug!(code, agent_id = %agent_id, "Circuit expected");
    }

    /// Forget a circuit. Returns false if it was not expected.
    pub fn remove_circuit(&self, code: u32) -> bool {
        self.circuits.remove(&code).is_some()
    }

    pub fn get(&self, code: u32) -> Option<Circuit> {
        self.circuits.get(&code).map(|c| *c)
    }

    pub fn len(&self) -> usize {
        self.circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.is_empty()
    }

    /// Check presented credentials against the table.
    pub fn authenticate_session(&self, session_id: Uuid, agent_id: Uuid, code: u32) -> bool {
        let Some(expected) = self.get(code) else {
            debug!(code, "Unknown circuit code");
            return false;
        };
        let agent_ok = expected.agent_id.as_bytes()[..].ct_eq(&agent_id.as_bytes()[..]);
        let session_ok = expected.session_id.as_bytes()[..].ct_eq(&session_id.as_bytes()[..]);
        bool::from(agent_ok & session_ok)
    }
}

#[async_trait]
impl Authenticator for CircuitManager {
    async fn authenticate(&self, credentials: &CircuitCredentials) -> bool {
        self.authenticate_session(
            credentials.session_id,
            credentials.agent_id,
            credentials.circuit_code,
        )
    }
}
