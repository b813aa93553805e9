//! HTTP/WebSocket endpoint host.
//!
//! One axum server carries every region endpoint. Listeners bind exact
//! paths at runtime; a WebSocket upgrade on a bound path is handed to its
//! [`ConnectionHandler`] as a [`Transport`]. Unbound paths answer 404.

use crate::error::{RegionError, RegionResult};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use omp_types::error::OmpError;
use omp_wire::transport::SocketFrame;
use omp_wire::{ConnectionHandler, EndpointHost, Transport, WireResult};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Path-routed WebSocket host.
#[derive(Clone, Default)]
pub struct WebSocketHost {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn ConnectionHandler>>>>,
}

impl WebSocketHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn handler(&self, path: &str) -> Option<Arc<dyn ConnectionHandler>> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.get(path).cloned()
    }

    /// Bound paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut paths: Vec<String> = handlers.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Router serving `/health` and every bound path.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/health", get(health))
            .fallback(upgrade)
            .with_state(self.clone())
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn serve<F>(
        &self,
        addr: SocketAddr,
        shutdown: F,
    ) -> RegionResult<(SocketAddr, JoinHandle<()>)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RegionError::Bind { addr, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| RegionError::Bind { addr, source })?;
        let app = self.router();

        info!(addr = %local, "Region host listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!("Region host failed: {e}");
            }
        });
        Ok((local, handle))
    }
}

impl EndpointHost for WebSocketHost {
    fn add_handler(&self, path: &str, handler: Arc<dyn ConnectionHandler>) -> WireResult<()> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(path) {
            return Err(OmpError::DuplicateRegistration(path.to_string()).into());
        }
        handlers.insert(path.to_string(), handler);
        debug!(path, "Endpoint bound");
        Ok(())
    }

    fn remove_handler(&self, path: &str) -> bool {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        let removed = handlers.remove(path).is_some();
        if removed {
            debug!(path, "Endpoint unbound");
        }
        removed
    }
}

impl std::fmt::Debug for WebSocketHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketHost")
            .field("paths", &self.paths())
            .finish()
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn upgrade(
    State(host): State<WebSocketHost>,
    uri: Uri,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(handler) = host.handler(uri.path()) else {
        return (StatusCode::NOT_FOUND, "no region at this path").into_response();
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| async move {
            handler.handle_connection(socket_transport(socket));
        }),
        Err(rejection) => rejection.into_response(),
    }
}

fn socket_transport(socket: WebSocket) -> Transport {
    Transport::from_socket(
        socket,
        |text: String| Message::Text(text.into()),
        |m: Message| match m {
            Message::Text(t) => SocketFrame::Text(t.as_str().to_owned()),
            Message::Close(_) => SocketFrame::Close,
            _ => SocketFrame::Ignored,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use omp_wire::transport::connect_websocket;
    use omp_wire::TransportEvent;
    use tokio::sync::{mpsc, oneshot};

    /// Echoes every message back on the same connection.
    struct Echo(mpsc::UnboundedSender<()>);

    impl ConnectionHandler for Echo {
        fn handle_connection(&self, transport: Transport) {
            let _ = self.0.send(());
            tokio::spawn(async move {
                let (out, mut inbound) = transport.into_parts();
                while let Some(TransportEvent::Message(text)) = inbound.recv().await {
                    if out.send(text).is_err() {
                        return;
                    }
                }
            });
        }
    }

    async fn start(host: &WebSocketHost) -> (SocketAddr, oneshot::Sender<()>) {
        let (stop, stopped) = oneshot::channel::<()>();
        let (addr, _task) = host
            .serve("127.0.0.1:0".parse().unwrap(), async move {
                let _ = stopped.await;
            })
            .await
            .unwrap();
        (addr, stop)
    }

    #[tokio::test]
    async fn test_bound_path_round_trip() {
        let host = WebSocketHost::new();
        let (tx, mut accepted) = mpsc::unbounded_channel();
        host.add_handler("/region/1x1", Arc::new(Echo(tx))).unwrap();
        let (addr, _stop) = start(&host).await;

        let transport = connect_websocket(&format!("ws://{addr}/region/1x1"))
            .await
            .unwrap();
        accepted.recv().await.unwrap();

        let (out, mut inbound) = transport.into_parts();
        out.send("hello".to_string()).unwrap();
        assert_eq!(
            inbound.recv().await,
            Some(TransportEvent::Message("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unbound_path_is_refused() {
        let host = WebSocketHost::new();
        let (tx, _accepted) = mpsc::unbounded_channel();
        host.add_handler("/region/1x1", Arc::new(Echo(tx))).unwrap();
        let (addr, _stop) = start(&host).await;

        assert!(connect_websocket(&format!("ws://{addr}/region/2x2"))
            .await
            .is_err());

        let status = reqwest::get(format!("http://{addr}/region/2x2"))
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

        let health = reqwest::get(format!("http://{addr}/health")).await.unwrap();
        assert!(health.status().is_success());
    }

    #[tokio::test]
    async fn test_remove_handler_unbinds() {
        let host = WebSocketHost::new();
        let (tx, _accepted) = mpsc::unbounded_channel();
        host.add_handler("/a", Arc::new(Echo(tx.clone()))).unwrap();
        assert!(host.add_handler("/a", Arc::new(Echo(tx))).is_err());
        assert_eq!(host.paths(), vec!["/a".to_string()]);

        assert!(host.remove_handler("/a"));
        assert!(!host.remove_handler("/a"));
        assert!(host.paths().is_empty());
    }
}
