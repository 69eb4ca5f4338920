//! Per-hub connection supervisor.
//!
//! Owns the session lifecycle, reconnects with exponential backoff after
//! failures, watches the live session and keeps the device mirror in step
//! with the connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tracing::info;

use crate::commands::CommandTranslator;
use crate::config::SupervisorConfig;
use crate::error::BridgeError;
use crate::events::{BridgeEvent, EventEmitter};
use crate::mirror::DeviceMirror;
use crate::reconnection::{HubContext, cancel_retry, release, replace_link, schedule_retry, try_connect};
use crate::session::HubSession;
use crate::types::{ConnectionState, HubIdentity};

/// Supervises the connection to one hub.
pub struct HubSupervisor {
    pub(crate) ctx: HubContext,
    commands: CommandTranslator,
}

impl HubSupervisor {
    pub fn new(hub: HubIdentity, session: Arc<dyn HubSession>, config: SupervisorConfig) -> Self {
        let events = Arc::new(EventEmitter::new(hub.identifier.clone()));
        let mirror = Arc::new(DeviceMirror::new(events.clone()));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let commands = CommandTranslator::new(
            hub.identifier.clone(),
            session.clone(),
            mirror.clone(),
            state_rx,
        );

        Self {
            ctx: HubContext {
                hub: Arc::new(hub),
                session,
                mirror,
                events,
                state: Arc::new(state_tx),
                generation: Arc::new(AtomicU64::new(0)),
                want_connected: Arc::new(AtomicBool::new(false)),
                retry_cancel: Arc::new(std::sync::Mutex::new(None)),
                retry_seq: Arc::new(AtomicU64::new(0)),
                link_cancel: Arc::new(std::sync::Mutex::new(None)),
                config,
            },
            commands,
        }
    }

    pub fn hub(&self) -> &HubIdentity {
        &self.ctx.hub
    }

    pub fn state(&self) -> ConnectionState {
        *self.ctx.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state.subscribe()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.ctx.events
    }

    /// Shorthand for `events().subscribe()`.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<BridgeEvent> {
        self.ctx.events.subscribe()
    }

    pub fn mirror(&self) -> &DeviceMirror {
        &self.ctx.mirror
    }

    pub fn commands(&self) -> &CommandTranslator {
        &self.commands
    }

    /// Connects to the hub.
    ///
    /// A no-op while connected or connecting. A pending retry is replaced
    /// by this attempt. On a connection failure the state moves to Error,
    /// the error is returned and retries continue in the background.
    pub async fn connect(&self) -> Result<(), BridgeError> {
        self.ctx.want_connected.store(true, Ordering::SeqCst);
        cancel_retry(&self.ctx.retry_cancel);

        match try_connect(&self.ctx).await {
            Err(e) if e.is_retryable() => {
                schedule_retry(&self.ctx);
                Err(e)
            }
            other => other,
        }
    }

    /// Disconnects from the hub. Idempotent, and never triggers a reconnect.
    ///
    /// A connect attempt still in flight is superseded: its result is
    /// discarded when it completes.
    pub async fn disconnect(&self) {
        self.ctx.want_connected.store(false, Ordering::SeqCst);
        cancel_retry(&self.ctx.retry_cancel);

        let changed = self.ctx.state.send_if_modified(|state| {
            self.ctx.generation.fetch_add(1, Ordering::SeqCst);
            if *state == ConnectionState::Disconnected {
                return false;
            }
            *state = ConnectionState::Disconnected;
            self.ctx.events.disconnected();
            true
        });

        replace_link(&self.ctx.link_cancel, None);
        release(&self.ctx).await;
        self.ctx.mirror.mark_stale().await;
        if changed {
            info!(hub = %self.ctx.hub_id(), "disconnected");
        }
    }
}

impl Drop for HubSupervisor {
    fn drop(&mut self) {
        self.ctx.want_connected.store(false, Ordering::SeqCst);
        cancel_retry(&self.ctx.retry_cancel);
        replace_link(&self.ctx.link_cancel, None);
    }
}
