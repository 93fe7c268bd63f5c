//! Transport abstraction.
//!
//! The connection manager drives a `Transport` that yields a sink/stream
//! pair of `Frame`s per session. `WebSocketTransport` is the production
//! implementation; tests substitute scripted in-memory transports.

use crate::error::{WsError, WsResult};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

/// Normal closure code sent on client-initiated disconnect.
pub const NORMAL_CLOSE_CODE: u16 = 1000;

/// Transport-level frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close { code: u16, reason: String },
}

impl Frame {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn normal_close() -> Self {
        Self::Close {
            code: NORMAL_CLOSE_CODE,
            reason: "client disconnect".to_string(),
        }
    }
}

/// Write half of a session.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> WsResult<()>;
}

/// Read half of a session. `None` means the stream ended.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_frame(&mut self) -> Option<WsResult<Frame>>;
}

/// Opens sessions against a URL.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// tokio-tungstenite transport (rustls TLS for `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        crate::init_crypto();
        info!(%url, "Opening WebSocket");

        // TCP_NODELAY for lower latency
        let (ws_stream, response) = connect_async_tls_with_config(url, None, true, None).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws_stream.split();
        Ok((Box::new(WsSink(write)), Box::new(WsSource(read))))
    }
}

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Frame) -> WsResult<()> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(data) => Message::Ping(data),
            Frame::Pong(data) => Message::Pong(data),
            Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.into(),
            })),
        };
        self.0
            .send(message)
            .await
            .map_err(|e| WsError::SendFailed(e.to_string()))
    }
}

struct WsSource(SplitStream<WsStream>);

#[async_trait]
impl FrameStream for WsSource {
    async fn next_frame(&mut self) -> Option<WsResult<Frame>> {
        loop {
            let message = match self.0.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => Frame::Text(text),
                    Err(_) => {
                        debug!("Dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Ping(data) => Frame::Ping(data),
                Message::Pong(data) => Frame::Pong(data),
                Message::Close(close) => {
                    let (code, reason) = close
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    Frame::Close { code, reason }
                }
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}
