//! Event fan-out to bridge listeners.

use std::sync::Mutex;

use caseta_protocol::AttributeDelta;
use tokio::sync::mpsc;
use tracing::{trace, warn};

/// Event published by a hub supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Connecting { hub_id: String },
    Connected { hub_id: String },
    Disconnected { hub_id: String },
    Error { hub_id: String, reason: String },
    AttributeUpdate { hub_id: String, delta: AttributeDelta },
}

impl BridgeEvent {
    pub fn hub_id(&self) -> &str {
        match self {
            BridgeEvent::Connecting { hub_id }
            | BridgeEvent::Connected { hub_id }
            | BridgeEvent::Disconnected { hub_id }
            | BridgeEvent::Error { hub_id, .. }
            | BridgeEvent::AttributeUpdate { hub_id, .. } => hub_id,
        }
    }
}

/// Publishes [`BridgeEvent`]s to any number of listeners.
///
/// Emission never blocks. Every listener sees events in emission order;
/// listeners whose receiver was dropped are pruned on the next emit.
pub struct EventEmitter {
    hub_id: String,
    listeners: Mutex<Vec<mpsc::UnboundedSender<BridgeEvent>>>,
}

impl EventEmitter {
    pub fn new(hub_id: impl Into<String>) -> Self {
        Self {
            hub_id: hub_id.into(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    /// Registers a new listener.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(tx),
            Err(e) => warn!(hub = %self.hub_id, "listener list poisoned: {e}"),
        }
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn emit(&self, event: BridgeEvent) {
        trace!(hub = %self.hub_id, event = ?event, "emitting");
        // Sends happen under the lock so concurrent emitters can't interleave.
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    pub(crate) fn connecting(&self) {
        self.emit(BridgeEvent::Connecting {
            hub_id: self.hub_id.clone(),
        });
    }

    pub(crate) fn connected(&self) {
        self.emit(BridgeEvent::Connected {
            hub_id: self.hub_id.clone(),
        });
    }

    pub(crate) fn disconnected(&self) {
        self.emit(BridgeEvent::Disconnected {
            hub_id: self.hub_id.clone(),
        });
    }

    pub(crate) fn error(&self, reason: impl Into<String>) {
        self.emit(BridgeEvent::Error {
            hub_id: self.hub_id.clone(),
            reason: reason.into(),
        });
    }

    pub(crate) fn update(&self, delta: AttributeDelta) {
        if delta.is_empty() {
            return;
        }
        self.emit(BridgeEvent::AttributeUpdate {
            hub_id: self.hub_id.clone(),
            delta,
        });
    }
}
