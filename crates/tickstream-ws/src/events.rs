//! Stream event fan-out.
//!
//! Events are queued in emission order onto an unbounded channel and
//! delivered by a single dispatcher task: first to registered handlers,
//! then to broadcast receivers. Handlers therefore run serialized and may
//! call back into the connection manager.

use crate::error::WsError;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tickstream_core::{ConnectionStatus, MarketDataMessage};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

/// Event emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Connected,
    Disconnected,
    StatusChange(ConnectionStatus),
    Message(MarketDataMessage),
    Error(WsError),
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::StatusChange(_) => EventKind::StatusChange,
            Self::Message(_) => EventKind::Message,
            Self::Error(_) => EventKind::Error,
        }
    }
}

/// Event discriminant used to register handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    StatusChange,
    Message,
    Error,
}

/// Handle returned by `on`, used to remove the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type EventHandler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

type HandlerList = Arc<RwLock<Vec<(ListenerId, EventKind, EventHandler)>>>;

/// Ordered event bus with handler registration and broadcast receivers.
pub struct EventBus {
    queue: mpsc::UnboundedSender<StreamEvent>,
    broadcast: broadcast::Sender<StreamEvent>,
    handlers: HandlerList,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create the bus and spawn its dispatcher.
    ///
    /// Must be called from within a tokio runtime. The dispatcher exits
    /// once the bus is dropped and the queue drains.
    pub fn new(broadcast_capacity: usize) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (broadcast, _) = broadcast::channel(broadcast_capacity.max(1));
        let handlers: HandlerList = Arc::new(RwLock::new(Vec::new()));

        tokio::spawn(dispatch(rx, broadcast.clone(), handlers.clone()));

        Self {
            queue,
            broadcast,
            handlers,
            next_id: AtomicU64::new(1),
        }
    }

    /// Queue an event for delivery.
    pub fn emit(&self, event: StreamEvent) {
        trace!(kind = ?event.kind(), "Queue event");
        if self.queue.send(event).is_err() {
            debug!("Event dispatcher stopped, dropping event");
        }
    }

    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, kind, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(listener, _, _)| *listener != id);
        handlers.len() != before
    }

    /// Receiver for every event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.broadcast.subscribe()
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
    broadcast: broadcast::Sender<StreamEvent>,
    handlers: HandlerList,
) {
    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        // Snapshot so handlers may register or remove listeners.
        let matching: Vec<EventHandler> = handlers
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| h.clone())
            .collect();

        for handler in matching {
            handler(&event);
        }

        // No receivers is fine
        let _ = broadcast.send(event);
    }
    debug!("Event dispatcher finished");
}
