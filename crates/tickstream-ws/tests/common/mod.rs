//! Scripted in-memory transport for connection manager tests.
//!
//! Each `connect` call consumes the next `Plan`. Accepted sessions hand a
//! `ServerSide` to the test so it can push frames to the client and read
//! what the client sent.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tickstream_core::ConnectionStatus;
use tickstream_ws::{
    ConnectionManager, Frame, FrameSink, FrameStream, StreamEvent, Transport, WsError, WsResult,
};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

pub const WAIT: Duration = Duration::from_secs(3);

/// What the next connect attempt does.
pub enum Plan {
    Accept,
    Fail(WsError),
    /// Never resolve.
    Hang,
}

/// Server end of an accepted session.
pub struct ServerSide {
    pub to_client: mpsc::UnboundedSender<WsResult<Frame>>,
    pub from_client: mpsc::UnboundedReceiver<Frame>,
}

impl ServerSide {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(Ok(Frame::Text(text.into())));
    }

    pub fn send_json(&self, value: serde_json::Value) {
        self.send_text(value.to_string());
    }

    /// Next frame sent by the client.
    pub async fn recv(&mut self) -> Frame {
        timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed")
    }

    /// Next client text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> serde_json::Value {
        match self.recv().await {
            Frame::Text(text) => serde_json::from_str(&text).expect("client sent invalid JSON"),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

pub struct ScriptedTransport {
    plans: Mutex<VecDeque<Plan>>,
    sessions: mpsc::UnboundedSender<ServerSide>,
    attempts: AtomicU32,
}

impl ScriptedTransport {
    pub fn new(plans: Vec<Plan>) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (sessions, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            plans: Mutex::new(plans.into()),
            sessions,
            attempts: AtomicU32::new(0),
        });
        (transport, rx)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn connect(&self, _url: &str) -> WsResult<(Box<dyn FrameSink>, Box<dyn FrameStream>)> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let plan = self.plans.lock().unwrap().pop_front();

        match plan {
            Some(Plan::Accept) => {
                let (to_client, client_rx) = mpsc::unbounded_channel();
                let (client_tx, from_client) = mpsc::unbounded_channel();
                let _ = self.sessions.send(ServerSide {
                    to_client,
                    from_client,
                });
                Ok((
                    Box::new(ChannelSink(client_tx)),
                    Box::new(ChannelStream(client_rx)),
                ))
            }
            Some(Plan::Fail(e)) => Err(e),
            Some(Plan::Hang) => std::future::pending().await,
            None => Err(WsError::ConnectionFailed("no more scripted attempts".into())),
        }
    }
}

struct ChannelSink(mpsc::UnboundedSender<Frame>);

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> WsResult<()> {
        self.0
            .send(frame)
            .map_err(|_| WsError::SendFailed("server side dropped".into()))
    }
}

struct ChannelStream(mpsc::UnboundedReceiver<WsResult<Frame>>);

#[async_trait]
impl FrameStream for ChannelStream {
    async fn next_frame(&mut self) -> Option<WsResult<Frame>> {
        self.0.recv().await
    }
}

/// Wait for the next accepted session.
pub async fn next_session(sessions: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    timeout(WAIT, sessions.recv())
        .await
        .expect("timed out waiting for session")
        .expect("transport dropped")
}

/// Receive events until one matches `pred`, returning everything seen.
pub async fn events_until<F>(
    rx: &mut broadcast::Receiver<StreamEvent>,
    pred: F,
) -> Vec<StreamEvent>
where
    F: Fn(&StreamEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

pub async fn wait_for_status(manager: &ConnectionManager, status: ConnectionStatus) {
    timeout(WAIT, async {
        while manager.status() != status {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("status never became {status}, stuck at {}", manager.status()));
}

/// Compact label for asserting event order.
pub fn label(event: &StreamEvent) -> String {
    match event {
        StreamEvent::Connected => "connected".to_string(),
        StreamEvent::Disconnected => "disconnected".to_string(),
        StreamEvent::StatusChange(status) => format!("status:{status}"),
        StreamEvent::Message(msg) => format!("message:{}", msg.symbol()),
        StreamEvent::Error(e) => format!("error:{}", e.reason()),
    }
}
