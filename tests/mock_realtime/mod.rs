//! Mock realtime endpoints
//!
//! - A credential mint endpoint served by `wiremock`
//! - A WebSocket endpoint that records what the client sends and lets the
//!   test push server events or close the socket
//! - An in-process peer answering offers posted to the calls endpoint

#![allow(dead_code)]

pub mod answerer;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use realtime_session::core::realtime::EndpointConfig;

pub const MINT_PATH: &str = "/v1/realtime/client_secrets";
pub const CALLS_PATH: &str = "/v1/realtime/calls";
pub const EPHEMERAL_KEY: &str = "ek_test_123";

/// What the test asks the server to do on the open connection.
pub enum ServerAction {
    Send(String),
    SendBinary(Vec<u8>),
    Close,
}

/// Realtime WebSocket endpoint bound to a random local port.
pub struct MockRealtimeServer {
    pub url: String,
    pub received: Arc<Mutex<Vec<Value>>>,
    pub protocols: Arc<Mutex<Vec<String>>>,
    pub uris: Arc<Mutex<Vec<String>>>,
    pub connections: Arc<AtomicU64>,
    pub closed_by_client: Arc<AtomicU64>,
    actions: mpsc::UnboundedSender<ServerAction>,
}

impl MockRealtimeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let protocols = Arc::new(Mutex::new(Vec::new()));
        let uris = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicU64::new(0));
        let closed_by_client = Arc::new(AtomicU64::new(0));
        let (actions, actions_rx) = mpsc::unbounded_channel();
        let actions_rx = Arc::new(tokio::sync::Mutex::new(actions_rx));

        let state = (
            received.clone(),
            protocols.clone(),
            uris.clone(),
            connections.clone(),
            closed_by_client.clone(),
        );
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (received, protocols, uris, connections, closed_by_client) = state.clone();
                let actions_rx = actions_rx.clone();
                tokio::spawn(async move {
                    let callback = |req: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                        uris.lock().unwrap().push(req.uri().to_string());
                        if let Some(value) = req.headers().get("sec-websocket-protocol") {
                            protocols
                                .lock()
                                .unwrap()
                                .push(value.to_str().unwrap_or_default().to_string());
                        }
                        response
                            .headers_mut()
                            .insert("sec-websocket-protocol", HeaderValue::from_static("realtime"));
                        Ok(response)
                    };

                    let Ok(ws_stream) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    let (mut write, mut read) = ws_stream.split();
                    let mut actions_rx = actions_rx.lock().await;

                    loop {
                        tokio::select! {
                            action = actions_rx.recv() => match action {
                                Some(ServerAction::Send(text)) => {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ServerAction::SendBinary(data)) => {
                                    if write.send(Message::Binary(data.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(ServerAction::Close) | None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break;
                                }
                            },
                            msg = read.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Ok(value) = serde_json::from_str::<Value>(&text) {
                                        received.lock().unwrap().push(value);
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    closed_by_client.fetch_add(1, Ordering::SeqCst);
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(_)) => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            url: format!("ws://{addr}/v1/realtime"),
            received,
            protocols,
            uris,
            connections,
            closed_by_client,
            actions,
        }
    }

    pub fn send(&self, event: Value) {
        let _ = self.actions.send(ServerAction::Send(event.to_string()));
    }

    pub fn send_raw(&self, raw: &str) {
        let _ = self.actions.send(ServerAction::Send(raw.to_string()));
    }

    pub fn send_binary(&self, data: &[u8]) {
        let _ = self.actions.send(ServerAction::SendBinary(data.to_vec()));
    }

    pub fn close(&self) {
        let _ = self.actions.send(ServerAction::Close);
    }

    /// Client messages of the given `type`.
    pub fn received_of_type(&self, event_type: &str) -> Vec<Value> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .filter(|value| value["type"] == event_type)
            .cloned()
            .collect()
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Mint endpoint answering with a fixed ephemeral key.
pub async fn mint_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MINT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": EPHEMERAL_KEY,
            "expires_at": 1_900_000_000u64,
        })))
        .mount(&server)
        .await;
    server
}

/// Mint endpoint answering with `status`.
pub async fn failing_mint_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MINT_PATH))
        .respond_with(ResponseTemplate::new(status).set_body_string("mint failed"))
        .mount(&server)
        .await;
    server
}

/// Mint endpoint that answers after `delay`.
pub async fn slow_mint_server(delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(MINT_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "value": EPHEMERAL_KEY }))
                .set_delay(delay),
        )
        .mount(&server)
        .await;
    server
}

pub fn endpoints(mint: &MockServer, socket_url: &str) -> EndpointConfig {
    EndpointConfig {
        mint_url: format!("{}{MINT_PATH}", mint.uri()),
        socket_url: socket_url.to_string(),
        calls_url: format!("{}{CALLS_PATH}", mint.uri()),
        request_timeout: Duration::from_secs(5),
        telemetry_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
