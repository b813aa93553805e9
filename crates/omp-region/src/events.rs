//! Region events — session lifecycle hand-off for one region.
//!
//! [`RegionEvents`] is the [`SessionObserver`] of a region's listener. Every
//! lifecycle change is broadcast to subscribers and kept in a bounded
//! history. When a session becomes ready, the region handshake is pushed to
//! the client.

use crate::handshake::RegionHandshake;

use chrono::{DateTime, Utc};
use omp_types::interface::{FunctionName, InterfaceId};
use omp_wire::{FailureReason, Session, SessionId, SessionObserver};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum events retained in the history ring buffer.
const HISTORY_SIZE: usize = 256;

/// A session lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Established {
        session_id: SessionId,
        agent_id: Option<Uuid>,
    },
    Failed {
        session_id: SessionId,
        interface: String,
        reason: String,
    },
    Closed {
        session_id: SessionId,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            SessionEvent::Established { session_id, .. }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::Closed { session_id } => *session_id,
        }
    }
}

/// A [`SessionEvent`] stamped with its region and time.
#[derive(Debug, Clone, Serialize)]
pub struct RegionEvent {
    pub region_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Session observer and event hub for one region.
pub struct RegionEvents {
    region_id: Uuid,
    handshake: RegionHandshake,
    sender: broadcast::Sender<RegionEvent>,
    history: Mutex<VecDeque<RegionEvent>>,
}

impl RegionEvents {
    pub fn new(handshake: RegionHandshake) -> Self {
        let (sender, _) = broadcast::channel(256);
        Self {
            region_id: handshake.region_id,
            handshake,
            sender,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)),
        }
    }

    pub fn region_id(&self) -> Uuid {
        self.region_id
    }

    /// Subscribe to this region's events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegionEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub fn history(&self, limit: usize) -> Vec<RegionEvent> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    fn publish(&self, event: SessionEvent) {
        debug!(region_id = %self.region_id, session_id = %event.session_id(), "Publishing session event");
        let event = RegionEvent {
            region_id: self.region_id,
            timestamp: Utc::now(),
            event,
        };
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        let _ = self.sender.send(event);
    }

    fn send_handshake(&self, session: Arc<Session>) {
        let payload = match serde_json::to_value(self.handshake.fresh()) {
            Ok(v) => v,
            Err(e) => {
                warn!(session_id = %session.id(), "Cannot encode region handshake: {e}");
                return;
            }
        };
        let call = session.call(FunctionName::RegionHandshake.as_str(), vec![payload]);
        tokio::spawn(async move {
            let outcome = match call {
                Ok(pending) => pending.await.map_err(omp_wire::WireError::from),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(_) => debug!(session_id = %session.id(), "Region handshake delivered"),
                Err(e) => warn!(session_id = %session.id(), "Region handshake failed: {e}"),
            }
        });
    }
}

impl SessionObserver for RegionEvents {
    fn session_established(&self, session: Arc<Session>) {
        self.publish(SessionEvent::Established {
            session_id: session.id(),
            agent_id: session.credentials().map(|c| c.agent_id),
        });
        self.send_handshake(session);
    }

    fn session_failed(&self, id: SessionId, interface: &InterfaceId, reason: &FailureReason) {
        self.publish(SessionEvent::Failed {
            session_id: id,
            interface: interface.to_string(),
            reason: reason.to_string(),
        });
    }

    fn session_closed(&self, id: SessionId) {
        self.publish(SessionEvent::Closed { session_id: id });
    }
}

impl std::fmt::Debug for RegionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionEvents")
            .field("region_id", &self.region_id)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omp_types::config::RegionConfig;

    fn events() -> RegionEvents {
        let region: RegionConfig = toml::from_str("name = \"r\"\nloc_x = 1\nloc_y = 1").unwrap();
        RegionEvents::new(RegionHandshake::for_region(&region))
    }

    #[tokio::test]
    async fn test_failed_and_closed_are_broadcast() {
        let events = events();
        let mut rx = events.subscribe();
        let id = Uuid::new_v4();

        events.session_failed(id, &InterfaceId::from("urn:x"), &FailureReason::Unsupported);
        events.session_closed(id);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.region_id, events.region_id());
        assert_eq!(
            first.event,
            SessionEvent::Failed {
                session_id: id,
                interface: "urn:x".into(),
                reason: "not supported by peer".into(),
            }
        );
        assert_eq!(rx.recv().await.unwrap().event, SessionEvent::Closed { session_id: id });
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let events = events();
        let ids: Vec<Uuid> = (0..HISTORY_SIZE + 5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            events.session_closed(*id);
        }
        let history = events.history(usize::MAX);
        assert_eq!(history.len(), HISTORY_SIZE);
        assert_eq!(history[0].event.session_id(), *ids.last().unwrap());
        assert_eq!(events.history(3).len(), 3);
    }

    #[test]
    fn test_event_serialises_flat() {
        let events = events();
        let id = Uuid::new_v4();
        events.session_closed(id);
        let value = serde_json::to_value(&events.history(1)[0]).unwrap();
        assert_eq!(value["event"], "closed");
        assert_eq!(value["session_id"], id.to_string());
        assert!(value["timestamp"].is_string());
    }
}
