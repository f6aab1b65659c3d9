//! Common utilities for integration tests
//!
//! Provides a scripted stand-in for the backend service, WebSocket client
//! helpers and a broker bound to an ephemeral port.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use speaker_broker::backend::{BackendLink, LinkState};
use speaker_broker::broker::{Broker, RunningBroker};
use speaker_broker::config::BrokerConfig;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, connect_async, MaybeTlsStream, WebSocketStream};

pub const TIMEOUT: Duration = Duration::from_secs(5);
/// How long a "nothing arrives" assertion waits
pub const QUIET_PERIOD: Duration = Duration::from_millis(300);

pub type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type BackendConn = WebSocketStream<TcpStream>;

/// Backend stand-in: every accepted WebSocket connection is handed to the test
pub struct FakeBackend {
    pub url: String,
    connections: mpsc::UnboundedReceiver<BackendConn>,
    accept_task: JoinHandle<()>,
}

impl FakeBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (tx, connections) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if let Ok(ws) = accept_async(stream).await {
                    if tx.send(ws).is_err() {
                        break;
                    }
                }
            }
        });

        Self {
            url,
            connections,
            accept_task,
        }
    }

    /// Wait for the broker to (re)connect
    pub async fn next_connection(&mut self) -> BackendConn {
        tokio::time::timeout(TIMEOUT, self.connections.recv())
            .await
            .expect("broker did not connect to backend in time")
            .expect("backend listener stopped")
    }

    /// Assert that no new connection arrives within `period`
    pub async fn expect_no_connection(&mut self, period: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(period, self.connections.recv()).await {
            panic!("unexpected extra backend connection");
        }
    }
}

impl Drop for FakeBackend {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// URL of a port with nothing listening on it
pub async fn unreachable_backend_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Bind a broker on an ephemeral loopback port
pub async fn start_broker(backend_url: &str, reconnect_delay: Duration) -> RunningBroker {
    start_broker_with(BrokerConfig::local(backend_url).with_reconnect_delay(reconnect_delay)).await
}

pub async fn start_broker_with(config: BrokerConfig) -> RunningBroker {
    Broker::new(config)
        .expect("valid config")
        .bind()
        .await
        .expect("broker should bind")
}

pub async fn wait_for_state(link: &BackendLink, expected: LinkState) {
    let mut states = link.watch_state();
    tokio::time::timeout(TIMEOUT, states.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("backend link never reached {}", expected))
        .unwrap();
}

pub async fn wait_for_clients(broker: &RunningBroker, expected: usize) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while broker.clients().len().await != expected {
        if tokio::time::Instant::now() > deadline {
            panic!(
                "expected {} clients, registry has {}",
                expected,
                broker.clients().len().await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Open a client connection and wait until the broker has registered it
pub async fn connect_client(broker: &RunningBroker) -> ClientStream {
    let before = broker.clients().len().await;
    let (ws, _) = connect_async(broker.ws_url()).await.expect("client connect");
    wait_for_clients(broker, before + 1).await;
    ws
}

pub async fn send_json(ws: &mut ClientStream, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

/// Next text frame from the broker, parsed as JSON
pub async fn recv_json(ws: &mut ClientStream) -> Value {
    let text = tokio::time::timeout(TIMEOUT, next_text(ws))
        .await
        .expect("timed out waiting for a message")
        .expect("connection closed");
    serde_json::from_str(&text).unwrap()
}

/// Assert that the client receives no text frame for a while
pub async fn assert_silent(ws: &mut ClientStream) {
    if let Ok(Some(text)) = tokio::time::timeout(QUIET_PERIOD, next_text(ws)).await {
        panic!("expected no message, got {}", text);
    }
}

/// Assert that the broker closes the client connection
pub async fn expect_closed(ws: &mut ClientStream) {
    match tokio::time::timeout(TIMEOUT, next_text(ws)).await {
        Ok(None) => {},
        Ok(Some(text)) => panic!("expected the connection to close, got {}", text),
        Err(_) => panic!("connection was not closed in time"),
    }
}

/// Wait for a WebSocket ping from the broker
pub async fn expect_ping(ws: &mut ClientStream) {
    let ping = tokio::time::timeout(TIMEOUT, async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Ping(_) = msg {
                return true;
            }
        }
        false
    })
    .await
    .expect("no ping received in time");
    assert!(ping, "connection closed before a ping arrived");
}

async fn next_text(ws: &mut ClientStream) -> Option<String> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

/// Next text frame the backend received, parsed as JSON
pub async fn backend_recv_json(conn: &mut BackendConn) -> Value {
    let text = tokio::time::timeout(TIMEOUT, async {
        while let Some(Ok(msg)) = conn.next().await {
            if let Message::Text(text) = msg {
                return Some(text);
            }
        }
        None
    })
    .await
    .expect("timed out waiting for backend message")
    .expect("backend connection closed");
    serde_json::from_str(&text).unwrap()
}

pub async fn backend_send(conn: &mut BackendConn, text: &str) {
    conn.send(Message::Text(text.to_string())).await.unwrap();
}
