//! Session — one negotiated peer on one channel.
//!
//! A session starts in `Negotiating`: it advertises and serves its local
//! interfaces, then asks the peer about every required interface at once.
//! The [`Negotiator`] turns the completions into exactly one verdict:
//!
//! - `Ready`: the remote proxies prepared at setup become callable and the
//!   [`SessionObserver`] is handed the session. A channel that closes after
//!   the last confirmation leaves a ready session that is already closed.
//! - `Failed`: the session asks its owner to drop it and closes the channel.

use crate::channel::{LocalFunction, PendingCall, RemoteProxy, RpcChannel};
use crate::error::{WireError, WireResult};
use crate::listener::CircuitCredentials;
use crate::negotiation::{FailureReason, NegotiationEvent, NegotiationState, Negotiator, Verdict};

use chrono::{DateTime, Utc};
use omp_types::config::NegotiationConfig;
use omp_types::interface::{FunctionName, InterfaceId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Identity of a session inside its listener.
pub type SessionId = Uuid;

/// Lifecycle phase of a session's negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Negotiating,
    Ready,
    Failed,
}

/// What a session serves and what it needs from the peer.
#[derive(Clone)]
pub struct SessionConfig {
    /// Interfaces advertised to the peer.
    pub local_interfaces: Vec<InterfaceId>,
    /// Interfaces the peer must confirm.
    pub remote_interfaces: Vec<InterfaceId>,
    /// Remote functions bound once negotiation succeeds.
    pub remote_functions: Vec<FunctionName>,
    /// Extra local functions served to the peer.
    pub local_functions: Vec<(String, LocalFunction)>,
    /// Upper bound on a single capability check.
    pub check_timeout: Option<Duration>,
}

impl SessionConfig {
    pub fn from_negotiation(config: &NegotiationConfig) -> Self {
        Self {
            local_interfaces: config
                .local_interfaces
                .iter()
                .map(|s| InterfaceId::from(s.as_str()))
                .collect(),
            remote_interfaces: config
                .remote_interfaces
                .iter()
                .map(|s| InterfaceId::from(s.as_str()))
                .collect(),
            remote_functions: config.remote_functions.clone(),
            local_functions: Vec::new(),
            check_timeout: config.check_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_negotiation(&NegotiationConfig::default())
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("local_interfaces", &self.local_interfaces)
            .field("remote_interfaces", &self.remote_interfaces)
            .field("remote_functions", &self.remote_functions)
            .field(
                "local_functions",
                &self.local_functions.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .field("check_timeout", &self.check_timeout)
            .finish()
    }
}

/// Owner of a set of live sessions (the listener).
pub trait SessionOwner: Send + Sync {
    /// Drop a session by identity. Returns false if it was already gone.
    fn remove_session(&self, id: SessionId) -> bool;
}

/// Region-layer hand-off for session lifecycle events.
pub trait SessionObserver: Send + Sync + 'static {
    /// Negotiation succeeded; the session accepts calls.
    fn session_established(&self, session: Arc<Session>);

    /// Negotiation failed. Called once per session.
    fn session_failed(&self, _id: SessionId, _interface: &InterfaceId, _reason: &FailureReason) {}

    /// The session's channel closed.
    fn session_closed(&self, _id: SessionId) {}
}

/// One negotiated peer.
pub struct Session {
    id: SessionId,
    channel: Arc<RpcChannel>,
    negotiator: Negotiator,
    proxies: HashMap<String, RemoteProxy>,
    ready_at: OnceLock<DateTime<Utc>>,
    config: Arc<SessionConfig>,
    owner: Weak<dyn SessionOwner>,
    observer: Arc<dyn SessionObserver>,
    credentials: Option<CircuitCredentials>,
    created_at: DateTime<Utc>,
    self_ref: Weak<Session>,
}

impl Session {
    /// Set up the session on `channel` and start negotiating.
    ///
    /// Returns once the local side is configured and every check is in
    /// flight; the verdict arrives later through the observer. A schema or
    /// registration error aborts setup before any check is sent.
    pub async fn start(
        channel: Arc<RpcChannel>,
        config: Arc<SessionConfig>,
        credentials: Option<CircuitCredentials>,
        owner: Weak<dyn SessionOwner>,
        observer: Arc<dyn SessionObserver>,
    ) -> WireResult<Arc<Session>> {
        for iface in &config.local_interfaces {
            channel.load_interface(iface).await?;
        }
        channel.serve_capability_check()?;
        for (name, function) in &config.local_functions {
            channel.register_local_function(
                name.clone(),
                FunctionName::signature_of(name),
                function.clone(),
            )?;
        }
        for iface in &config.remote_interfaces {
            channel.require_interface(iface).await?;
        }
        // Bound before any check is sent; a Ready verdict must not depend on
        // the channel still being open.
        let mut proxies = HashMap::new();
        for function in &config.remote_functions {
            let proxy = channel.generate_remote_proxy(function.as_str(), function.signature())?;
            proxies.insert(function.as_str().to_string(), proxy);
        }

        let session = Arc::new_cyclic(|self_ref| Session {
            id: Uuid::new_v4(),
            negotiator: Negotiator::new(config.remote_interfaces.iter().cloned()),
            channel,
            proxies,
            ready_at: OnceLock::new(),
            config,
            owner,
            observer,
            credentials,
            created_at: Utc::now(),
            self_ref: self_ref.clone(),
        });

        debug!(
            session_id = %session.id,
            required = session.negotiator.required().len(),
            "Session negotiating"
        );
        session.begin_negotiation()?;
        Ok(session)
    }

    fn begin_negotiation(self: &Arc<Self>) -> WireResult<()> {
        let implements = self
            .channel
            .generate_remote_proxy(
                FunctionName::InterfaceImplements.as_str(),
                FunctionName::InterfaceImplements.signature(),
            )?;

        for iface in self.negotiator.required() {
            let call = implements.call(vec![Value::String(iface.to_string())]);
            let session = Arc::clone(self);
            let iface = iface.clone();
            let bound = self.config.check_timeout;
            tokio::spawn(async move {
                let event = match await_check(call, bound).await {
                    Some(outcome) => NegotiationEvent::from_outcome(iface, outcome),
                    None => NegotiationEvent::Rejected(iface, FailureReason::TimedOut),
                };
                session.on_event(event);
            });
        }

        self.on_event(NegotiationEvent::Started);
        Ok(())
    }

    fn on_event(&self, event: NegotiationEvent) {
        match self.negotiator.apply(event) {
            Some(Verdict::Ready) => self.establish(),
            Some(Verdict::Failed { interface, reason }) => self.fail(&interface, &reason),
            None => {}
        }
    }

    fn establish(&self) {
        let now = Utc::now();
        if self.ready_at.set(now).is_err() {
            return;
        }
        info!(
            session_id = %self.id,
            channel_id = %self.channel.id(),
            required = ?self.channel.interfaces().required_interfaces(),
            negotiation_ms = (now - self.created_at).num_milliseconds(),
            "Session ready"
        );
        if let Some(session) = self.self_ref.upgrade() {
            self.observer.session_established(session);
        }
    }

    fn fail(&self, interface: &InterfaceId, reason: &FailureReason) {
        error!(
            session_id = %self.id,
            interface = %interface,
            "Failed to acquire interface - {reason}"
        );
        if let FailureReason::Exception(detail) = reason {
            debug!(session_id = %self.id, "Check exception: {detail}");
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_session(self.id);
        }
        self.channel.close();
        self.observer.session_failed(self.id, interface, reason);
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }

    pub fn credentials(&self) -> Option<&CircuitCredentials> {
        self.credentials.as_ref()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.ready_at.get().is_some() {
            return SessionPhase::Ready;
        }
        match self.negotiator.state() {
            NegotiationState::Failed { .. } => SessionPhase::Failed,
            _ => SessionPhase::Negotiating,
        }
    }

    /// Snapshot of the negotiation state.
    pub fn negotiation(&self) -> NegotiationState {
        self.negotiator.state()
    }

    /// Names of the bound remote functions (empty until ready).
    pub fn bound_functions(&self) -> Vec<String> {
        if self.ready_at.get().is_none() {
            return Vec::new();
        }
        let mut names: Vec<String> = self.proxies.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a bound remote function.
    ///
    /// Fails with `NotRegistered` for names that are not bound, which
    /// includes every name while the session is still negotiating.
    pub fn call(&self, name: &str, args: Vec<Value>) -> WireResult<PendingCall> {
        self.ready_at
            .get()
            .and_then(|_| self.proxies.get(name))
            .map(|proxy| proxy.call(args))
            .ok_or_else(|| WireError::not_registered(name))
    }

    /// Call and await the result, folding call failures into [`WireError`].
    pub async fn call_value(&self, name: &str, args: Vec<Value>) -> WireResult<Value> {
        Ok(self.call(name, args)?.await?)
    }

    /// Close the underlying channel.
    pub fn close(&self) {
        self.channel.close();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("phase", &self.phase())
            .field("channel", &self.channel.id())
            .finish()
    }
}

async fn await_check(
    call: PendingCall,
    bound: Option<Duration>,
) -> Option<Result<Value, crate::error::CallError>> {
    match bound {
        Some(limit) => tokio::time::timeout(limit, call).await.ok(),
        None => Some(call.await),
    }
}
