//! RpcChannel — RPC over one transport connection.
//!
//! The channel owns the transport exclusively: it frames outbound calls and
//! replies, routes inbound replies to their pending callers and dispatches
//! inbound calls to registered local functions.
//!
//! Local functions are registered before [`RpcChannel::listen`] starts the
//! read loop. Remote proxies are created lazily and cached by name; creating
//! one does not check that the peer supports it.

use crate::error::{CallError, WireError, WireResult};
use crate::message::*;
use crate::registry::{InterfaceRegistry, InterfaceRole};
use crate::schema::SchemaResolver;
use crate::transport::{Transport, TransportEvent};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use omp_types::error::OmpError;
use omp_types::interface::{FunctionName, InterfaceId};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

type HandlerFn = dyn Fn(Vec<Value>) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync;

/// Implementation behind a local function name.
#[derive(Clone)]
pub enum LocalFunction {
    /// Capability-check responder: answers from this channel's own
    /// interface registry. Never fails; a malformed identifier is `false`.
    InterfaceQuery,
    /// Asynchronous handler over positional arguments.
    Handler(Arc<HandlerFn>),
}

impl LocalFunction {
    /// Wrap an async closure as a handler.
    pub fn handler<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        LocalFunction::Handler(Arc::new(move |args| Box::pin(f(args))))
    }
}

impl fmt::Debug for LocalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalFunction::InterfaceQuery => f.write_str("InterfaceQuery"),
            LocalFunction::Handler(_) => f.write_str("Handler(..)"),
        }
    }
}

#[derive(Debug, Clone)]
struct RegisteredFunction {
    signature: String,
    function: LocalFunction,
}

/// A call in flight. Resolves to exactly one of: the result value, a remote
/// application error, or a transport-level failure.
#[derive(Debug)]
pub struct PendingCall {
    rx: oneshot::Receiver<Result<Value, CallError>>,
}

impl PendingCall {
    /// A call that has already failed.
    pub fn failed(err: CallError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }
}

impl Future for PendingCall {
    type Output = Result<Value, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(CallError::ChannelClosed)))
    }
}

/// A local callable bound to a remote function name on one channel.
#[derive(Debug, Clone)]
pub struct RemoteProxy {
    name: Arc<str>,
    signature: Arc<str>,
    channel: Weak<RpcChannel>,
}

impl RemoteProxy {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the remote function.
    pub fn call(&self, args: Vec<Value>) -> PendingCall {
        debug!(function = %self.name, signature = %self.signature, "Remote call");
        match self.channel.upgrade() {
            Some(channel) => channel.invoke(&self.name, args),
            None => PendingCall::failed(CallError::ChannelClosed),
        }
    }

    /// Whether this proxy belongs to `channel`.
    pub fn is_bound_to(&self, channel: &RpcChannel) -> bool {
        std::ptr::eq(self.channel.as_ptr(), channel)
    }
}

/// RPC endpoint over one transport connection.
pub struct RpcChannel {
    id: Uuid,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    interfaces: InterfaceRegistry,
    resolver: Arc<dyn SchemaResolver>,
    functions: DashMap<String, RegisteredFunction>,
    proxies: DashMap<String, RemoteProxy>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, CallError>>>>,
    next_id: AtomicU64,
    closed: watch::Sender<bool>,
    self_ref: Weak<RpcChannel>,
}

impl RpcChannel {
    /// Wrap a transport. Nothing is read until [`listen`](Self::listen).
    pub fn new(transport: Transport, resolver: Arc<dyn SchemaResolver>) -> Arc<Self> {
        let (outbound, inbound) = transport.into_parts();
        let (closed, _) = watch::channel(false);
        Arc::new_cyclic(|self_ref| Self {
            id: Uuid::new_v4(),
            outbound: Mutex::new(Some(outbound)),
            inbound: Mutex::new(Some(inbound)),
            interfaces: InterfaceRegistry::new(),
            resolver,
            functions: DashMap::new(),
            proxies: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed,
            self_ref: self_ref.clone(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The interfaces loaded into this channel.
    pub fn interfaces(&self) -> &InterfaceRegistry {
        &self.interfaces
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> WireResult<()> {
        if self.is_closed() {
            Err(WireError::closed())
        } else {
            Ok(())
        }
    }

    /// Load an interface and advertise it as served by this side.
    pub async fn load_interface(&self, id: &InterfaceId) -> WireResult<()> {
        self.load_as(id, InterfaceRole::Local).await
    }

    /// Load an interface this side needs the peer to support.
    pub async fn require_interface(&self, id: &InterfaceId) -> WireResult<()> {
        self.load_as(id, InterfaceRole::Required).await
    }

    async fn load_as(&self, id: &InterfaceId, role: InterfaceRole) -> WireResult<()> {
        self.ensure_open()?;
        if !self.interfaces.is_loaded(id) {
            let schema = self.resolver.resolve(id).await?;
            debug!(channel_id = %self.id, interface = %id, "Loaded interface");
            self.interfaces.insert(schema);
        }
        self.interfaces.mark(id, role);
        Ok(())
    }

    /// Bind a local function the peer may invoke.
    pub fn register_local_function(
        &self,
        name: impl Into<String>,
        signature: &str,
        function: LocalFunction,
    ) -> WireResult<()> {
        self.ensure_open()?;
        let name = name.into();
        match self.functions.entry(name) {
            Entry::Occupied(e) => Err(OmpError::DuplicateRegistration(e.key().clone()).into()),
            Entry::Vacant(e) => {
                e.insert(RegisteredFunction {
                    signature: signature.to_string(),
                    function,
                });
                Ok(())
            }
        }
    }

    /// Register the capability-check responder unless it is already bound.
    pub fn serve_capability_check(&self) -> WireResult<()> {
        if self.is_registered(FunctionName::InterfaceImplements.as_str()) {
            return Ok(());
        }
        self.register_local_function(
            FunctionName::InterfaceImplements.as_str(),
            FunctionName::InterfaceImplements.signature(),
            LocalFunction::InterfaceQuery,
        )
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Get (or create) the proxy for a remote function.
    pub fn generate_remote_proxy(&self, name: &str, signature: &str) -> WireResult<RemoteProxy> {
        self.ensure_open()?;
        let proxy = self
            .proxies
            .entry(name.to_string())
            .or_insert_with(|| RemoteProxy {
                name: Arc::from(name),
                signature: Arc::from(signature),
                channel: self.self_ref.clone(),
            });
        Ok(proxy.clone())
    }

    /// Send a call to the peer.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> PendingCall {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            if self.is_closed() {
                return PendingCall::failed(CallError::ChannelClosed);
            }
            pending.insert(id, tx);
        }

        if let Err(e) = self.send_frame(&RpcMessage::call(id, name, args)) {
            let err = match e {
                WireError::Json(e) => CallError::Exception(format!("cannot encode call: {e}")),
                _ => CallError::ChannelClosed,
            };
            self.complete(id, Err(err));
        }
        PendingCall { rx }
    }

    /// Start the read loop. Can be called once.
    ///
    /// The loop keeps the channel alive until the transport closes or
    /// [`close`](Self::close) is called.
    pub fn listen(&self) -> WireResult<JoinHandle<()>> {
        let inbound = self
            .inbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or_else(|| WireError::Transport("channel is already listening".into()))?;
        let channel = self.self_ref.upgrade().ok_or_else(WireError::closed)?;
        Ok(tokio::spawn(read_loop(channel, inbound)))
    }

    /// Release the transport. Returns `true` for the call that actually
    /// closed the channel; later calls are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.send_replace(true) {
            return false;
        }
        self.outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().map(|(_, tx)| tx).collect()
        };
        for tx in drained {
            let _ = tx.send(Err(CallError::ChannelClosed));
        }
        debug!(channel_id = %self.id, "Channel closed");
        true
    }

    /// Wait until the channel is closed.
    pub async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    fn send_frame(&self, msg: &RpcMessage) -> WireResult<()> {
        let text = encode_message(msg)?;
        let outbound = self.outbound.lock().unwrap_or_else(|e| e.into_inner());
        match outbound.as_ref() {
            Some(tx) => tx.send(text).map_err(|_| WireError::closed()),
            None => Err(WireError::closed()),
        }
    }

    fn complete(&self, id: u64, outcome: Result<Value, CallError>) {
        let waiter = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!(channel_id = %self.id, call_id = id, "Reply for unknown call"),
        }
    }

    fn handle_text(&self, text: &str) -> WireResult<()> {
        if text.len() > MAX_MESSAGE_SIZE {
            return Err(WireError::MessageTooLarge {
                size: text.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        let msg = match decode_message(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(channel_id = %self.id, "Dropping malformed frame: {e}");
                return Ok(());
            }
        };

        match msg.kind {
            RpcMessageKind::Call { method, args } => self.dispatch_call(msg.id, method, args),
            RpcMessageKind::Result { value } => self.complete(msg.id, Ok(value)),
            RpcMessageKind::Error { code, message } => {
                self.complete(msg.id, Err(CallError::Remote { code, message }))
            }
            RpcMessageKind::Exception { message } => {
                self.complete(msg.id, Err(CallError::Exception(message)))
            }
        }
        Ok(())
    }

    fn dispatch_call(&self, id: u64, method: String, args: Vec<Value>) {
        let function = self.functions.get(&method).map(|f| {
            debug!(channel_id = %self.id, method = %method, signature = %f.signature, "Inbound call");
            f.function.clone()
        });
        let reply = match function {
            None => RpcMessage::error(
                id,
                ERR_NOT_REGISTERED,
                format!("Function {method} is not registered"),
            ),
            Some(LocalFunction::InterfaceQuery) => {
                let implements = args
                    .first()
                    .and_then(Value::as_str)
                    .map(|iface| self.interfaces.implements(iface))
                    .unwrap_or(false);
                RpcMessage::result(id, Value::Bool(implements))
            }
            Some(LocalFunction::Handler(handler)) => {
                let fut = handler(args);
                let channel = self.self_ref.clone();
                tokio::spawn(async move {
                    let reply = match tokio::spawn(fut).await {
                        Ok(Ok(value)) => RpcMessage::result(id, value),
                        Ok(Err(CallError::Remote { code, message })) => {
                            RpcMessage::error(id, code, message)
                        }
                        Ok(Err(other)) => RpcMessage::exception(id, other.to_string()),
                        Err(e) => {
                            warn!(method = %method, "Local function failed: {e}");
                            RpcMessage::exception(id, format!("{method} failed"))
                        }
                    };
                    if let Some(channel) = channel.upgrade() {
                        if let Err(e) = channel.send_frame(&reply) {
                            debug!(channel_id = %channel.id, "Reply not sent: {e}");
                        }
                    }
                });
                return;
            }
        };
        if let Err(e) = self.send_frame(&reply) {
            debug!(channel_id = %self.id, "Reply not sent: {e}");
        }
    }
}

impl fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("functions", &self.functions.len())
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

async fn wait_closed(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn read_loop(channel: Arc<RpcChannel>, mut inbound: mpsc::UnboundedReceiver<TransportEvent>) {
    let mut closed = channel.closed.subscribe();
    loop {
        let event = tokio::select! {
            event = inbound.recv() => event,
            _ = wait_closed(&mut closed) => return,
        };
        match event {
            Some(TransportEvent::Message(text)) => {
                if let Err(e) = channel.handle_text(&text) {
                    warn!(channel_id = %channel.id, "Closing channel: {e}");
                    break;
                }
            }
            Some(TransportEvent::Error(reason)) => {
                warn!(channel_id = %channel.id, "Transport error: {reason}");
                break;
            }
            Some(TransportEvent::Closed) | None => {
                debug!(channel_id = %channel.id, "Transport closed by peer");
                break;
            }
        }
    }
    channel.close();
}
