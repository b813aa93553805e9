//! Connection listener for one region endpoint.
//!
//! The listener registers itself with an [`EndpointHost`] under a fixed path.
//! Every accepted connection gets its own [`RpcChannel`], which serves the
//! capability check and `omp.connect.useCircuitCode`. A session is created
//! only after the peer presents credentials the [`Authenticator`] accepts;
//! otherwise the connection is dropped without a reply.

use crate::channel::{LocalFunction, RpcChannel};
use crate::error::{CallError, WireError, WireResult};
use crate::message::ERR_INVALID_ARGS;
use crate::schema::SchemaResolver;
use crate::session::{Session, SessionConfig, SessionId, SessionObserver, SessionOwner, SessionPhase};
use crate::transport::Transport;

use async_trait::async_trait;
use dashmap::DashMap;
use omp_types::error::OmpError;
use omp_types::interface::FunctionName;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Credentials presented through `omp.connect.useCircuitCode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CircuitCredentials {
    pub circuit_code: u32,
    pub agent_id: Uuid,
    pub session_id: Uuid,
}

impl CircuitCredentials {
    /// Parse the positional arguments `[code, agent_id, session_id]`.
    pub fn from_args(args: &[Value]) -> Result<Self, OmpError> {
        let bad = |what: &str| OmpError::AuthenticationFailure(format!("invalid {what}"));
        let circuit_code = args
            .first()
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .ok_or_else(|| bad("circuit code"))?;
        let uuid_at = |i: usize, what: &str| {
            args.get(i)
                .and_then(Value::as_str)
                .and_then(|s| Uuid::parse_str(s).ok())
                .ok_or_else(|| bad(what))
        };
        Ok(Self {
            circuit_code,
            agent_id: uuid_at(1, "agent id")?,
            session_id: uuid_at(2, "session id")?,
        })
    }

    /// Encode as the positional arguments of `omp.connect.useCircuitCode`.
    pub fn to_args(&self) -> Vec<Value> {
        vec![
            Value::from(self.circuit_code),
            Value::String(self.agent_id.to_string()),
            Value::String(self.session_id.to_string()),
        ]
    }
}

/// External authentication capability.
#[async_trait]
pub trait Authenticator: Send + Sync + 'static {
    /// Whether the circuit may connect.
    async fn authenticate(&self, credentials: &CircuitCredentials) -> bool;
}

/// Receives each accepted connection on a path.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// Take ownership of a new connection. Called inside a Tokio runtime.
    fn handle_connection(&self, transport: Transport);
}

/// A server that routes incoming connections to handlers by exact path.
pub trait EndpointHost: Send + Sync + 'static {
    /// Bind `handler` to `path`. Fails if the path is taken.
    fn add_handler(&self, path: &str, handler: Arc<dyn ConnectionHandler>) -> WireResult<()>;

    /// Unbind `path`. Returns false if nothing was bound.
    fn remove_handler(&self, path: &str) -> bool;
}

/// In-process [`EndpointHost`]: connections are opened with
/// [`MemoryHost::connect`] over [`Transport::pair`].
#[derive(Default)]
pub struct MemoryHost {
    handlers: Mutex<HashMap<String, Arc<dyn ConnectionHandler>>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection to `path`, returning the client end. `None` when no
    /// handler is bound there.
    pub fn connect(&self, path: &str) -> Option<Transport> {
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()?;
        let (client, server) = Transport::pair();
        handler.handle_connection(server);
        Some(client)
    }

    pub fn paths(&self) -> Vec<String> {
        let handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = handlers.keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl EndpointHost for MemoryHost {
    fn add_handler(&self, path: &str, handler: Arc<dyn ConnectionHandler>) -> WireResult<()> {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(path) {
            return Err(OmpError::DuplicateRegistration(path.to_string()).into());
        }
        handlers.insert(path.to_string(), handler);
        Ok(())
    }

    fn remove_handler(&self, path: &str) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(|e| e.into_inner());
        handlers.remove(path).is_some()
    }
}

/// Accepts connections for one region endpoint and owns its live sessions.
pub struct Listener {
    path: String,
    host: Arc<dyn EndpointHost>,
    resolver: Arc<dyn SchemaResolver>,
    authenticator: Arc<dyn Authenticator>,
    observer: Arc<dyn SessionObserver>,
    config: Arc<SessionConfig>,
    sessions: DashMap<SessionId, Arc<Session>>,
    running: AtomicBool,
    self_ref: Weak<Listener>,
}

/// Handler registered with the host; does not keep the listener alive.
struct AcceptHandler {
    listener: Weak<Listener>,
}

impl ConnectionHandler for AcceptHandler {
    fn handle_connection(&self, transport: Transport) {
        match self.listener.upgrade() {
            Some(listener) => listener.accept(transport),
            None => debug!("Connection for a dropped listener"),
        }
    }
}

impl Listener {
    pub fn new(
        path: impl Into<String>,
        host: Arc<dyn EndpointHost>,
        resolver: Arc<dyn SchemaResolver>,
        authenticator: Arc<dyn Authenticator>,
        observer: Arc<dyn SessionObserver>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            path: path.into(),
            host,
            resolver,
            authenticator,
            observer,
            config: Arc::new(config),
            sessions: DashMap::new(),
            running: AtomicBool::new(false),
            self_ref: self_ref.clone(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin accepting connections on this listener's path.
    pub fn start(&self) -> WireResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let handler = Arc::new(AcceptHandler {
            listener: self.self_ref.clone(),
        });
        if let Err(e) = self.host.add_handler(&self.path, handler) {
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(path = %self.path, "Listener started");
        Ok(())
    }

    /// Stop accepting connections. Live sessions are left alone.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.host.remove_handler(&self.path);
        info!(path = %self.path, sessions = self.sessions.len(), "Listener stopped");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|s| Arc::clone(s.value()))
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| Arc::clone(s.value())).collect()
    }

    /// Close every live session's channel.
    pub fn close_sessions(&self) {
        for session in self.sessions() {
            session.close();
        }
    }

    fn accept(&self, transport: Transport) {
        let Some(listener) = self.self_ref.upgrade() else {
            return;
        };
        let channel = RpcChannel::new(transport, Arc::clone(&self.resolver));
        debug!(path = %self.path, channel_id = %channel.id(), "Connection accepted");
        tokio::spawn(async move {
            if let Err(e) = listener.prepare(&channel).await {
                warn!(path = %listener.path, "Dropping connection: {e}");
                channel.close();
            }
        });
    }

    /// Make a fresh channel ready to receive `useCircuitCode`.
    async fn prepare(&self, channel: &Arc<RpcChannel>) -> WireResult<()> {
        for iface in &self.config.local_interfaces {
            channel.load_interface(iface).await?;
        }
        channel.serve_capability_check()?;

        let listener = self.self_ref.clone();
        let weak_channel = Arc::downgrade(channel);
        let claimed = Arc::new(AtomicBool::new(false));
        channel.register_local_function(
            FunctionName::UseCircuitCode.as_str(),
            FunctionName::UseCircuitCode.signature(),
            LocalFunction::handler(move |args| {
                let listener = listener.clone();
                let channel = weak_channel.clone();
                let claimed = Arc::clone(&claimed);
                async move {
                    let (Some(listener), Some(channel)) = (listener.upgrade(), channel.upgrade())
                    else {
                        return Err(CallError::ChannelClosed);
                    };
                    listener.use_circuit_code(channel, &claimed, args).await
                }
            }),
        )?;
        channel.listen()?;
        Ok(())
    }

    async fn use_circuit_code(
        &self,
        channel: Arc<RpcChannel>,
        claimed: &AtomicBool,
        args: Vec<Value>,
    ) -> Result<Value, CallError> {
        if claimed.swap(true, Ordering::SeqCst) {
            return Err(CallError::Remote {
                code: ERR_INVALID_ARGS,
                message: "circuit code already used on this connection".into(),
            });
        }

        let credentials = match CircuitCredentials::from_args(&args) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %self.path, channel_id = %channel.id(), "Authentication rejected: {e}");
                channel.close();
                return Err(CallError::ChannelClosed);
            }
        };
        if !self.authenticator.authenticate(&credentials).await {
            warn!(
                path = %self.path,
                agent_id = %credentials.agent_id,
                circuit_code = credentials.circuit_code,
                "Authentication rejected"
            );
            channel.close();
            return Err(CallError::ChannelClosed);
        }

        let owner: Weak<dyn SessionOwner> = self.self_ref.clone();
        let started = Session::start(
            Arc::clone(&channel),
            Arc::clone(&self.config),
            Some(credentials),
            owner,
            Arc::clone(&self.observer),
        )
        .await;
        match started {
            Ok(session) => {
                info!(
                    path = %self.path,
                    session_id = %session.id(),
                    agent_id = %credentials.agent_id,
                    "Session created"
                );
                self.track(session);
                Ok(Value::Bool(true))
            }
            Err(e) => {
                error!(path = %self.path, "Session setup failed: {e}");
                channel.close();
                Err(CallError::Exception(e.to_string()))
            }
        }
    }

    fn track(&self, session: Arc<Session>) {
        let id = session.id();
        self.sessions.insert(id, Arc::clone(&session));
        // Negotiation may have failed before the insert; its removal was then a no-op.
        if session.phase() == SessionPhase::Failed {
            self.remove_session(id);
            return;
        }

        let listener = self.self_ref.clone();
        tokio::spawn(async move {
            session.channel().closed().await;
            if let Some(listener) = listener.upgrade() {
                if listener.remove_session(id) {
                    listener.observer.session_closed(id);
                }
            }
        });
    }
}

impl SessionOwner for Listener {
    fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.remove(&id).is_some();
        if removed {
            debug!(path = %self.path, session_id = %id, "Session removed");
        }
        removed
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("path", &self.path)
            .field("running", &self.is_running())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

/// A channel the server closed mid-handshake means the credentials were refused.
pub(crate) fn refused(err: WireError) -> WireError {
    if err.is_channel_closed() {
        OmpError::AuthenticationFailure("connection refused by server".into()).into()
    } else {
        err
    }
}
