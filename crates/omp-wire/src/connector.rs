//! Client side of a region link.
//!
//! The connector advertises the client interfaces, answers the server's
//! capability checks and presents circuit credentials. Functions the server
//! calls on the client (such as the region handshake) are supplied as
//! handlers in [`ClientConfig`].

use crate::channel::{LocalFunction, PendingCall, RpcChannel};
use crate::error::{WireError, WireResult};
use crate::listener::{refused, CircuitCredentials};
use crate::schema::SchemaResolver;
use crate::transport::{connect_websocket, Transport};

use omp_types::error::OmpError;
use omp_types::interface::{FunctionName, InterfaceId, CONNECT_CLIENT_IDL, INTERFACE_IDL};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for [`ClientConnector`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credentials: CircuitCredentials,
    /// Interfaces this client serves.
    pub local_interfaces: Vec<InterfaceId>,
    /// Functions the server may call on this client.
    pub handlers: Vec<(String, LocalFunction)>,
    /// How long to wait for the server to accept the circuit code.
    pub auth_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(credentials: CircuitCredentials) -> Self {
        Self {
            credentials,
            local_interfaces: vec![
                InterfaceId::from(INTERFACE_IDL),
                InterfaceId::from(CONNECT_CLIENT_IDL),
            ],
            handlers: Vec::new(),
            auth_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Serve `function` under `name`.
    pub fn with_handler(mut self, name: impl Into<String>, function: LocalFunction) -> Self {
        self.handlers.push((name.into(), function));
        self
    }
}

/// An authenticated connection to a region.
#[derive(Debug)]
pub struct ClientConnector {
    channel: Arc<RpcChannel>,
    credentials: CircuitCredentials,
}

impl ClientConnector {
    /// Set up the client channel on `transport` and present the circuit code.
    ///
    /// Fails with `AuthenticationFailure` when the server drops the
    /// connection instead of accepting the code.
    pub async fn connect(
        transport: Transport,
        resolver: Arc<dyn SchemaResolver>,
        config: ClientConfig,
    ) -> WireResult<Self> {
        let channel = RpcChannel::new(transport, resolver);
        match Self::handshake(&channel, &config).await {
            Ok(()) => {
                info!(
                    channel_id = %channel.id(),
                    agent_id = %config.credentials.agent_id,
                    "Circuit accepted"
                );
                Ok(Self {
                    channel,
                    credentials: config.credentials,
                })
            }
            Err(e) => {
                channel.close();
                Err(e)
            }
        }
    }

    /// Open a WebSocket to `url` and [`connect`](Self::connect) over it.
    pub async fn connect_url(
        url: &str,
        resolver: Arc<dyn SchemaResolver>,
        config: ClientConfig,
    ) -> WireResult<Self> {
        debug!(url, "Connecting to region");
        let transport = connect_websocket(url).await?;
        Self::connect(transport, resolver, config).await
    }

    async fn handshake(channel: &Arc<RpcChannel>, config: &ClientConfig) -> WireResult<()> {
        for iface in &config.local_interfaces {
            channel.load_interface(iface).await?;
        }
        channel.serve_capability_check()?;
        for (name, function) in &config.handlers {
            channel.register_local_function(
                name.clone(),
                FunctionName::signature_of(name),
                function.clone(),
            )?;
        }
        channel.listen()?;

        let call = channel.invoke(
            FunctionName::UseCircuitCode.as_str(),
            config.credentials.to_args(),
        );
        let outcome = match config.auth_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                WireError::Omp(OmpError::AuthenticationFailure(
                    "timed out waiting for circuit acceptance".into(),
                ))
            })?,
            None => call.await,
        };
        match outcome.map_err(WireError::from).map_err(refused)? {
            Value::Bool(true) => Ok(()),
            other => Err(OmpError::AuthenticationFailure(format!(
                "unexpected reply to circuit code: {other}"
            ))
            .into()),
        }
    }

    pub fn channel(&self) -> &Arc<RpcChannel> {
        &self.channel
    }

    pub fn credentials(&self) -> &CircuitCredentials {
        &self.credentials
    }

    /// Call a function the server serves.
    pub fn call(&self, name: &str, args: Vec<Value>) -> WireResult<PendingCall> {
        Ok(self
            .channel
            .generate_remote_proxy(name, FunctionName::signature_of(name))?
            .call(args))
    }

    pub fn close(&self) {
        self.channel.close();
    }

    /// Wait until the server or this side closes the connection.
    pub async fn closed(&self) {
        self.channel.closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use crate::schema::StaticSchemaResolver;
    use crate::transport::TransportEvent;
    use crate::message::{decode_message, encode_message, RpcMessage, RpcMessageKind};
    use serde_json::json;
    use uuid::Uuid;

    fn creds() -> CircuitCredentials {
        CircuitCredentials {
            circuit_code: 7,
            agent_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
        }
    }

    fn resolver() -> Arc<dyn SchemaResolver> {
        Arc::new(StaticSchemaResolver::with_defaults())
    }

    /// Drive the server end by hand: answer the first `useCircuitCode` with
    /// `reply`, or hang up when `reply` is `None`.
    fn scripted_server(server: Transport, reply: Option<Value>) -> tokio::task::JoinHandle<Vec<Value>> {
        tokio::spawn(async move {
            let (out, mut inbound) = server.into_parts();
            while let Some(TransportEvent::Message(text)) = inbound.recv().await {
                let msg = decode_message(&text).unwrap();
                if let RpcMessageKind::Call { method, args } = msg.kind {
                    if method == FunctionName::UseCircuitCode.as_str() {
                        if let Some(value) = reply {
                            out.send(encode_message(&RpcMessage::result(msg.id, value)).unwrap())
                                .unwrap();
                        }
                        return args;
                    }
                }
            }
            Vec::new()
        })
    }

    #[tokio::test]
    async fn test_connect_presents_credentials() {
        let (client, server) = Transport::pair();
        let server = scripted_server(server, Some(json!(true)));
        let c = creds();

        let connector = ClientConnector::connect(client, resolver(), ClientConfig::new(c))
            .await
            .unwrap();
        let args = server.await.unwrap();
        assert_eq!(CircuitCredentials::from_args(&args).unwrap(), c);
        assert_eq!(connector.credentials(), &c);
        assert!(connector
            .channel()
            .interfaces()
            .implements(CONNECT_CLIENT_IDL));
    }

    #[tokio::test]
    async fn test_hang_up_is_authentication_failure() {
        let (client, server) = Transport::pair();
        let _server = scripted_server(server, None);

        let err = ClientConnector::connect(client, resolver(), ClientConfig::new(creds()))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Omp(OmpError::AuthenticationFailure(_))));
    }

    #[tokio::test]
    async fn test_false_reply_is_authentication_failure() {
        let (client, server) = Transport::pair();
        let _server = scripted_server(server, Some(json!(false)));

        let err = ClientConnector::connect(client, resolver(), ClientConfig::new(creds()))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Omp(OmpError::AuthenticationFailure(_))));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let (client, _server) = Transport::pair();
        let mut config = ClientConfig::new(creds());
        config.auth_timeout = Some(Duration::from_millis(50));

        let err = ClientConnector::connect(client, resolver(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Omp(OmpError::AuthenticationFailure(_))));
    }

    #[tokio::test]
    async fn test_duplicate_handler_is_rejected() {
        let (client, _server) = Transport::pair();
        let config = ClientConfig::new(creds()).with_handler(
            FunctionName::InterfaceImplements.as_str(),
            LocalFunction::handler(|_| async { Ok::<_, CallError>(json!(true)) }),
        );
        let err = ClientConnector::connect(client, resolver(), config)
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::Omp(OmpError::DuplicateRegistration(_))));
    }
}
