//! Mock chart server for integration tests.
//!
//! Each accepted connection plays the next script from a queue:
//! - Record the config request the client sends first
//! - Send the scripted frames
//! - Optionally close with a given code, otherwise stay open

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// One step of a connection script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a JSON frame.
    Send(Value),
    /// Send a raw text frame.
    Raw(String),
    /// Close with this code and end the connection.
    Close(u16),
}

/// A mock chart server for testing.
pub struct MockChartServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    scripts: Arc<Mutex<VecDeque<Vec<Step>>>>,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockChartServer {
    /// Start a server on an available port. `scripts[n]` is played on the
    /// n-th connection; later connections get an empty script.
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let scripts = Arc::new(Mutex::new(VecDeque::from(scripts)));
        let received: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let scripts_clone = scripts.clone();
        let received_clone = received.clone();
        let connections_clone = connections.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let script = scripts_clone.lock().await.pop_front().unwrap_or_default();
                        tokio::spawn(handle_connection(
                            stream,
                            script,
                            received_clone.clone(),
                            connections_clone.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            scripts,
            received,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Queue a script for the next connection.
    pub async fn push_script(&self, script: Vec<Step>) {
        self.scripts.lock().await.push_back(script);
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Config requests received, in order, parsed as JSON.
    pub async fn config_requests(&self) -> Vec<Value> {
        self.received
            .lock()
            .await
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|v| v.get("type") == Some(&Value::from("config")))
            .collect()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    script: Vec<Step>,
    received: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<u32>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let (mut write, mut read) = ws_stream.split();

    // The client speaks first: wait for its config request.
    match read.next().await {
        Some(Ok(Message::Text(text))) => received.lock().await.push(text),
        _ => return,
    }

    for step in script {
        match step {
            Step::Send(value) => {
                let _ = write.send(Message::Text(value.to_string())).await;
            }
            Step::Raw(text) => {
                let _ = write.send(Message::Text(text)).await;
            }
            Step::Close(code) => {
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: "scripted close".into(),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                return;
            }
        }
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => received.lock().await.push(text),
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) => break,
            Err(_) => break,
            _ => {}
        }
    }
}

/// `historical` frame with flat bars at `times`.
pub fn historical(symbol: &str, times: &[i64], close: &str) -> Value {
    let bars: Vec<Value> = times
        .iter()
        .map(|t| {
            serde_json::json!({
                "time": t,
                "open": close,
                "high": close,
                "low": close,
                "close": close,
                "volume": "1",
            })
        })
        .collect();
    serde_json::json!({"type": "historical", "symbol": symbol, "data": bars})
}

/// `live` frame.
pub fn live(symbol: &str, time: i64, price: &str) -> Value {
    serde_json::json!({
        "type": "live",
        "symbol": symbol,
        "data": {"time": time, "price": price},
    })
}
