//! Mock WebSocket server for integration tests.
//!
//! Provides a simple market data server that can:
//! - Accept or reject (HTTP 401) handshakes
//! - Acknowledge subscriptions and answer pings
//! - Push text frames to every connected client
//! - Drop every live connection on demand
//! - Record received messages

use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_async, accept_hdr_async, tungstenite::Message};

/// Instruction pushed to every live connection.
#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Disconnect,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    commands: broadcast::Sender<Command>,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
}

impl MockWsServer {
    /// Start a new mock WebSocket server on an available port.
    pub async fn start() -> Self {
        Self::spawn(false).await
    }

    /// Start a server that rejects every handshake with HTTP 401.
    pub async fn start_rejecting() -> Self {
        Self::spawn(true).await
    }

    async fn spawn(reject: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let messages: Arc<Mutex<VecDeque<String>>> = Arc::new(Mutex::new(VecDeque::new()));
        let connections: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let (commands, _) = broadcast::channel(256);

        let messages_clone = messages.clone();
        let connections_clone = connections.clone();
        let commands_clone = commands.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let messages = messages_clone.clone();
                        let connections = connections_clone.clone();
                        let commands = commands_clone.subscribe();
                        tokio::spawn(handle_connection(stream, reject, messages, connections, commands));
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
            commands,
            messages,
            connections,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Get the number of connections received.
    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Get all received messages.
    pub async fn received_messages(&self) -> Vec<String> {
        self.messages.lock().await.iter().cloned().collect()
    }

    /// Send a JSON frame to every connected client.
    pub fn broadcast_json(&self, value: serde_json::Value) {
        let _ = self.commands.send(Command::Send(value.to_string()));
    }

    /// Close every live connection without a close frame.
    pub fn drop_connections(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    reject: bool,
    messages: Arc<Mutex<VecDeque<String>>>,
    connections: Arc<Mutex<u32>>,
    mut commands: broadcast::Receiver<Command>,
) {
    // Increment connection count
    {
        let mut count = connections.lock().await;
        *count += 1;
    }

    let handshake = if reject {
        accept_hdr_async(stream, |_req: &Request, _resp: Response| -> Result<Response, ErrorResponse> {
            let mut response = ErrorResponse::new(Some("invalid credentials".to_string()));
            *response.status_mut() = StatusCode::UNAUTHORIZED;
            Err(response)
        })
        .await
    } else {
        accept_async(stream).await
    };

    let ws_stream = match handshake {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // Record the message
                    {
                        let mut msgs = messages.lock().await;
                        msgs.push_back(text.clone());
                    }

                    if let Some(reply) = control_reply(&text) {
                        let _ = write.send(Message::Text(reply.to_string())).await;
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },

            command = commands.recv() => match command {
                Ok(Command::Send(text)) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Command::Disconnect) | Err(_) => break,
            },
        }
    }
}

/// Acknowledge subscription changes and answer pings.
fn control_reply(text: &str) -> Option<serde_json::Value> {
    let parsed = serde_json::from_str::<serde_json::Value>(text).ok()?;
    match parsed.get("action")?.as_str()? {
        "subscribe" => Some(serde_json::json!({
            "type": "subscribed",
            "symbols": parsed.get("symbols")
        })),
        "unsubscribe" => Some(serde_json::json!({
            "type": "unsubscribed",
            "symbols": parsed.get("symbols")
        })),
        "ping" => Some(serde_json::json!({ "type": "pong" })),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_server_starts() {
        let server = MockWsServer::start().await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }

    #[test]
    fn test_control_reply() {
        let ack = control_reply(r#"{"action":"subscribe","symbols":["AAPL"]}"#).unwrap();
        assert_eq!(ack["type"], "subscribed");
        assert_eq!(ack["symbols"][0], "AAPL");
        assert_eq!(
            control_reply(r#"{"action":"ping"}"#).unwrap()["type"],
            "pong"
        );
        assert!(control_reply("not json").is_none());
    }
}
