//! End-to-end: a hosted region and a connecting client.

use omp_region::{CircuitManager, RegionModule, SessionEvent, WebSocketHost};
use omp_types::config::{RegionConfig, ServerConfig};
use omp_types::error::OmpError;
use omp_types::interface::{FunctionName, InterfaceId, INTERFACE_IDL};
use omp_wire::{
    CallError, CircuitCredentials, ClientConfig, ClientConnector, LocalFunction, MemoryHost,
    SessionPhase, StaticSchemaResolver, WireError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

fn region() -> RegionConfig {
    toml::from_str("name = \"Sandbox\"\nloc_x = 1000\nloc_y = 1000").unwrap()
}

fn credentials() -> CircuitCredentials {
    CircuitCredentials {
        circuit_code: 4242,
        agent_id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
    }
}

fn resolver() -> Arc<StaticSchemaResolver> {
    Arc::new(StaticSchemaResolver::with_defaults())
}

/// Client config whose handshake handler forwards the payload to a channel.
fn client_config(creds: CircuitCredentials) -> (ClientConfig, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let config = ClientConfig::new(creds).with_handler(
        FunctionName::RegionHandshake.as_str(),
        LocalFunction::handler(move |mut args| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(args.pop().unwrap_or(Value::Null));
                Ok::<_, CallError>(Value::Null)
            }
        }),
    );
    (config, rx)
}

async fn next_event(rx: &mut broadcast::Receiver<omp_region::RegionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("region event")
        .expect("event stream open")
        .event
}

#[tokio::test]
async fn test_client_receives_region_handshake() {
    let host = Arc::new(MemoryHost::new());
    let circuits = Arc::new(CircuitManager::new());
    let module = RegionModule::new(&ServerConfig::default(), host.clone(), resolver(), circuits.clone());
    let handle = module.add_region(region()).unwrap();
    let mut events = handle.events().subscribe();

    let creds = credentials();
    circuits.add_circuit(creds.circuit_code, creds.agent_id, creds.session_id);
    let (config, mut handshakes) = client_config(creds);

    let transport = host.connect("/region/1000x1000").unwrap();
    let client = ClientConnector::connect(transport, resolver(), config)
        .await
        .unwrap();

    let session_id = match next_event(&mut events).await {
        SessionEvent::Established {
            session_id,
            agent_id,
        } => {
            assert_eq!(agent_id, Some(creds.agent_id));
            session_id
        }
        other => panic!("Expected Established, got {other:?}"),
    };
    let session = handle.listener().session(session_id).unwrap();
    assert_eq!(session.phase(), SessionPhase::Ready);

    let payload = tokio::time::timeout(Duration::from_secs(2), handshakes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["sim_name"], "Sandbox");
    assert_eq!(payload["region_id"], handle.config().region_id.to_string());
    assert_eq!(payload["cpu_class_id"], 9);

    // The server advertises its own interfaces to the client.
    let implements = client
        .call(FunctionName::InterfaceImplements.as_str(), vec![Value::from(INTERFACE_IDL)])
        .unwrap()
        .await;
    assert_eq!(implements, Ok(Value::Bool(true)));

    client.close();
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Closed { session_id }
    );
    assert_eq!(handle.listener().session_count(), 0);
}

#[tokio::test]
async fn test_unknown_circuit_is_refused() {
    let host = Arc::new(MemoryHost::new());
    let module = RegionModule::new(
        &ServerConfig::default(),
        host.clone(),
        resolver(),
        Arc::new(CircuitManager::new()),
    );
    let handle = module.add_region(region()).unwrap();

    let (config, _handshakes) = client_config(credentials());
    let err = ClientConnector::connect(host.connect("/region/1000x1000").unwrap(), resolver(), config)
        .await
        .unwrap_err();
    assert!(matches!(err, WireError::Omp(OmpError::AuthenticationFailure(_))));
    assert_eq!(handle.listener().session_count(), 0);
    assert!(handle.events().history(10).is_empty());
}

#[tokio::test]
async fn test_client_missing_interface_fails_negotiation() {
    let host = Arc::new(MemoryHost::new());
    let circuits = Arc::new(CircuitManager::new());
    let module = RegionModule::new(&ServerConfig::default(), host.clone(), resolver(), circuits.clone());
    let handle = module.add_region(region()).unwrap();
    let mut events = handle.events().subscribe();

    let creds = credentials();
    circuits.add_circuit(creds.circuit_code, creds.agent_id, creds.session_id);
    let (mut config, _handshakes) = client_config(creds);
    // Serve only the base interface, not connectClient.
    config.local_interfaces = vec![InterfaceId::from(INTERFACE_IDL)];

    let client = ClientConnector::connect(host.connect("/region/1000x1000").unwrap(), resolver(), config)
        .await;
    match next_event(&mut events).await {
        SessionEvent::Failed {
            interface, reason, ..
        } => {
            assert!(interface.ends_with("connectClient.kiara"));
            assert_eq!(reason, "not supported by peer");
        }
        other => panic!("Expected Failed, got {other:?}"),
    }
    if let Ok(client) = client {
        tokio::time::timeout(Duration::from_secs(2), client.closed())
            .await
            .unwrap();
    }
    assert_eq!(handle.listener().session_count(), 0);
}

#[tokio::test]
async fn test_removed_region_refuses_new_clients() {
    let host = Arc::new(MemoryHost::new());
    let module = RegionModule::new(
        &ServerConfig::default(),
        host.clone(),
        resolver(),
        Arc::new(CircuitManager::new()),
    );
    let handle = module.add_region(region()).unwrap();
    module.remove_region(handle.config().region_id).unwrap();
    assert!(host.connect("/region/1000x1000").is_none());
}

#[tokio::test]
async fn test_websocket_end_to_end() {
    let host = WebSocketHost::new();
    let circuits = Arc::new(CircuitManager::new());
    let module = RegionModule::new(
        &ServerConfig::default(),
        Arc::new(host.clone()),
        resolver(),
        circuits.clone(),
    );
    let handle = module.add_region(region()).unwrap();
    let mut events = handle.events().subscribe();
    let (addr, _server) = host
        .serve("127.0.0.1:0".parse().unwrap(), std::future::pending())
        .await
        .unwrap();

    let creds = credentials();
    circuits.add_circuit(creds.circuit_code, creds.agent_id, creds.session_id);
    let (config, mut handshakes) = client_config(creds);
    let client = ClientConnector::connect_url(
        &format!("ws://{addr}/region/1000x1000"),
        resolver(),
        config,
    )
    .await
    .unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Established { .. }
    ));
    let payload = tokio::time::timeout(Duration::from_secs(2), handshakes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload["product_name"], "Mainland");

    module.close();
    tokio::time::timeout(Duration::from_secs(2), client.closed())
        .await
        .unwrap();
}
