//! Capability negotiation — decides session viability from concurrent checks.
//!
//! [`NegotiationState`] is a pure state machine: `(state, event) -> state'`.
//! [`Negotiator`] wraps it in a single critical section so that completions
//! arriving from independent tasks are applied one at a time, and reports the
//! terminal transition ([`Verdict`]) exactly once.
//!
//! Rules:
//! - the required set is deduplicated before it is fixed;
//! - an empty required set is ready as soon as negotiation starts;
//! - the first failure wins, and nothing moves a terminal state.

use crate::error::CallError;
use omp_types::interface::InterfaceId;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Mutex;

/// Why a capability check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The peer answered `false`.
    Unsupported,
    /// The check could not be carried out (transport or serialisation fault).
    Exception(String),
    /// The peer's responder reported an error.
    RemoteError { code: i32, message: String },
    /// No answer within the configured bound.
    TimedOut,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unsupported => f.write_str("not supported by peer"),
            FailureReason::Exception(_) => f.write_str("exception returned by peer"),
            FailureReason::RemoteError { code, message } => {
                write!(f, "error returned by peer ({code}): {message}")
            }
            FailureReason::TimedOut => f.write_str("timed out waiting for peer"),
        }
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationEvent {
    /// All checks have been issued.
    Started,
    /// The peer implements the interface.
    Confirmed(InterfaceId),
    /// The check for the interface failed.
    Rejected(InterfaceId, FailureReason),
}

impl NegotiationEvent {
    /// Classify the outcome of one `implements` call.
    pub fn from_outcome(interface: InterfaceId, outcome: Result<Value, CallError>) -> Self {
        match outcome {
            Ok(Value::Bool(true)) => NegotiationEvent::Confirmed(interface),
            Ok(Value::Bool(false)) => {
                NegotiationEvent::Rejected(interface, FailureReason::Unsupported)
            }
            Ok(other) => NegotiationEvent::Rejected(
                interface,
                FailureReason::Exception(format!("non-boolean reply: {other}")),
            ),
            Err(CallError::Remote { code, message }) => {
                NegotiationEvent::Rejected(interface, FailureReason::RemoteError { code, message })
            }
            Err(e) => NegotiationEvent::Rejected(interface, FailureReason::Exception(e.to_string())),
        }
    }

    fn interface(&self) -> Option<&InterfaceId> {
        match self {
            NegotiationEvent::Started => None,
            NegotiationEvent::Confirmed(id) | NegotiationEvent::Rejected(id, _) => Some(id),
        }
    }
}

/// Negotiation state for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationState {
    /// Waiting on checks.
    Negotiating {
        required: BTreeSet<InterfaceId>,
        confirmed: BTreeSet<InterfaceId>,
    },
    /// Every required interface was confirmed.
    Ready { confirmed: usize },
    /// A check failed. Terminal.
    Failed {
        interface: InterfaceId,
        reason: FailureReason,
    },
}

impl NegotiationState {
    /// Initial state for a required set; duplicates collapse.
    pub fn start<I>(required: I) -> Self
    where
        I: IntoIterator<Item = InterfaceId>,
    {
        NegotiationState::Negotiating {
            required: required.into_iter().collect(),
            confirmed: BTreeSet::new(),
        }
    }

    /// Apply one event. Terminal states absorb every event, and events for
    /// interfaces outside the required set are ignored.
    pub fn apply(self, event: &NegotiationEvent) -> NegotiationState {
        let (required, mut confirmed) = match self {
            NegotiationState::Negotiating {
                required,
                confirmed,
            } => (required, confirmed),
            terminal => return terminal,
        };
        if let Some(id) = event.interface() {
            if !required.contains(id) {
                return NegotiationState::Negotiating {
                    required,
                    confirmed,
                };
            }
        }

        match event {
            NegotiationEvent::Rejected(interface, reason) => NegotiationState::Failed {
                interface: interface.clone(),
                reason: reason.clone(),
            },
            NegotiationEvent::Confirmed(id) => {
                confirmed.insert(id.clone());
                Self::settle(required, confirmed)
            }
            NegotiationEvent::Started => Self::settle(required, confirmed),
        }
    }

    fn settle(required: BTreeSet<InterfaceId>, confirmed: BTreeSet<InterfaceId>) -> Self {
        if confirmed.len() == required.len() {
            NegotiationState::Ready {
                confirmed: confirmed.len(),
            }
        } else {
            NegotiationState::Negotiating {
                required,
                confirmed,
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NegotiationState::Negotiating { .. })
    }

    /// The verdict this state represents, if terminal.
    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            NegotiationState::Negotiating { .. } => None,
            NegotiationState::Ready { .. } => Some(Verdict::Ready),
            NegotiationState::Failed { interface, reason } => Some(Verdict::Failed {
                interface: interface.clone(),
                reason: reason.clone(),
            }),
        }
    }
}

/// Terminal outcome of a negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Ready,
    Failed {
        interface: InterfaceId,
        reason: FailureReason,
    },
}

/// Serialised driver of a [`NegotiationState`].
#[derive(Debug)]
pub struct Negotiator {
    required: Vec<InterfaceId>,
    state: Mutex<NegotiationState>,
}

impl Negotiator {
    pub fn new<I>(required: I) -> Self
    where
        I: IntoIterator<Item = InterfaceId>,
    {
        let set: BTreeSet<InterfaceId> = required.into_iter().collect();
        Self {
            required: set.iter().cloned().collect(),
            state: Mutex::new(NegotiationState::start(set)),
        }
    }

    /// The deduplicated required set, sorted.
    pub fn required(&self) -> &[InterfaceId] {
        &self.required
    }

    /// Apply an event under the lock. Returns the verdict on the one call
    /// that moved the state from negotiating to terminal.
    pub fn apply(&self, event: NegotiationEvent) -> Option<Verdict> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.is_terminal() {
            return None;
        }
        let current = std::mem::replace(&mut *state, NegotiationState::Ready { confirmed: 0 });
        *state = current.apply(&event);
        state.verdict()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> NegotiationState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn id(s: &str) -> InterfaceId {
        InterfaceId::from(s)
    }

    fn ids(list: &[&str]) -> Vec<InterfaceId> {
        list.iter().map(|s| id(s)).collect()
    }

    #[test]
    fn test_empty_required_is_ready_on_start() {
        let n = Negotiator::new(Vec::new());
        assert_eq!(n.apply(NegotiationEvent::Started), Some(Verdict::Ready));
        assert_eq!(n.apply(NegotiationEvent::Started), None);
        assert_eq!(n.state(), NegotiationState::Ready { confirmed: 0 });
    }

    #[test]
    fn test_started_does_not_complete_nonempty() {
        let n = Negotiator::new(ids(&["A"]));
        assert_eq!(n.apply(NegotiationEvent::Started), None);
        assert!(!n.state().is_terminal());
    }

    #[test]
    fn test_reverse_order_confirmations() {
        let n = Negotiator::new(ids(&["A", "B"]));
        n.apply(NegotiationEvent::Started);
        assert_eq!(n.apply(NegotiationEvent::Confirmed(id("B"))), None);
        assert_eq!(
            n.apply(NegotiationEvent::Confirmed(id("A"))),
            Some(Verdict::Ready)
        );
        assert_eq!(n.state(), NegotiationState::Ready { confirmed: 2 });
    }

    #[test]
    fn test_duplicates_do_not_inflate_required() {
        let n = Negotiator::new(ids(&["A", "A", "B", "A"]));
        assert_eq!(n.required(), &ids(&["A", "B"])[..]);
        n.apply(NegotiationEvent::Confirmed(id("A")));
        // A second confirmation of A must not count as B.
        assert_eq!(n.apply(NegotiationEvent::Confirmed(id("A"))), None);
        assert_eq!(
            n.apply(NegotiationEvent::Confirmed(id("B"))),
            Some(Verdict::Ready)
        );
    }

    #[test]
    fn test_first_failure_wins_and_late_success_ignored() {
        let n = Negotiator::new(ids(&["A", "B"]));
        let verdict = n.apply(NegotiationEvent::Rejected(id("A"), FailureReason::Unsupported));
        assert_eq!(
            verdict,
            Some(Verdict::Failed {
                interface: id("A"),
                reason: FailureReason::Unsupported
            })
        );
        assert_eq!(n.apply(NegotiationEvent::Confirmed(id("B"))), None);
        assert_eq!(
            n.apply(NegotiationEvent::Rejected(id("B"), FailureReason::TimedOut)),
            None
        );
        match n.state() {
            NegotiationState::Failed { interface, .. } => assert_eq!(interface, id("A")),
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn test_ready_absorbs_failure() {
        let state = NegotiationState::start(ids(&["A"]))
            .apply(&NegotiationEvent::Confirmed(id("A")))
            .apply(&NegotiationEvent::Rejected(id("A"), FailureReason::Unsupported));
        assert_eq!(state, NegotiationState::Ready { confirmed: 1 });
    }

    #[test]
    fn test_unknown_interface_events_ignored() {
        let state = NegotiationState::start(ids(&["A"]))
            .apply(&NegotiationEvent::Rejected(id("Z"), FailureReason::Unsupported))
            .apply(&NegotiationEvent::Confirmed(id("Z")));
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            NegotiationEvent::from_outcome(id("A"), Ok(json!(true))),
            NegotiationEvent::Confirmed(id("A"))
        );
        assert_eq!(
            NegotiationEvent::from_outcome(id("A"), Ok(json!(false))),
            NegotiationEvent::Rejected(id("A"), FailureReason::Unsupported)
        );
        assert!(matches!(
            NegotiationEvent::from_outcome(id("A"), Err(CallError::ChannelClosed)),
            NegotiationEvent::Rejected(_, FailureReason::Exception(_))
        ));
        assert!(matches!(
            NegotiationEvent::from_outcome(id("A"), Ok(json!("yes"))),
            NegotiationEvent::Rejected(_, FailureReason::Exception(_))
        ));
        assert!(matches!(
            NegotiationEvent::from_outcome(
                id("A"),
                Err(CallError::Remote {
                    code: 1,
                    message: "x".into()
                })
            ),
            NegotiationEvent::Rejected(_, FailureReason::RemoteError { code: 1, .. })
        ));
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(FailureReason::Unsupported.to_string(), "not supported by peer");
        assert_eq!(
            FailureReason::Exception("boom".into()).to_string(),
            "exception returned by peer"
        );
    }

    #[test]
    fn test_all_orderings_of_three_reach_ready_once() {
        let perms = [
            ["A", "B", "C"],
            ["A", "C", "B"],
            ["B", "A", "C"],
            ["B", "C", "A"],
            ["C", "A", "B"],
            ["C", "B", "A"],
        ];
        for order in perms {
            let n = Negotiator::new(ids(&["A", "B", "C"]));
            let verdicts: Vec<_> = order
                .iter()
                .filter_map(|s| n.apply(NegotiationEvent::Confirmed(id(s))))
                .collect();
            assert_eq!(verdicts, vec![Verdict::Ready], "order {order:?}");
        }
    }

    #[test]
    fn test_concurrent_mixed_completions_fail_once() {
        for _ in 0..50 {
            let names: Vec<String> = (0..16).map(|i| format!("urn:{i}")).collect();
            let n = Arc::new(Negotiator::new(
                names.iter().map(|s| InterfaceId::from(s.as_str())),
            ));
            let failures = Arc::new(AtomicUsize::new(0));
            let readies = Arc::new(AtomicUsize::new(0));

            let handles: Vec<_> = names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let n = Arc::clone(&n);
                    let failures = Arc::clone(&failures);
                    let readies = Arc::clone(&readies);
                    let iface = InterfaceId::from(name.as_str());
                    std::thread::spawn(move || {
                        let event = if i % 5 == 0 {
                            NegotiationEvent::Rejected(iface, FailureReason::Unsupported)
                        } else {
                            NegotiationEvent::Confirmed(iface)
                        };
                        match n.apply(event) {
                            Some(Verdict::Ready) => readies.fetch_add(1, Ordering::SeqCst),
                            Some(Verdict::Failed { .. }) => failures.fetch_add(1, Ordering::SeqCst),
                            None => 0,
                        };
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            assert_eq!(failures.load(Ordering::SeqCst), 1);
            assert_eq!(readies.load(Ordering::SeqCst), 0);
        }
    }
}
