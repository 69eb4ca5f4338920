//! Connection attempts and the retry loop.
//!
//! Contains the shared [`HubContext`], cancellation helpers, the single
//! connect attempt used by both manual connects and retries, and the
//! backoff loop.
//!
//! State changes go through `watch::Sender::send_if_modified`, whose
//! closure is the atomic check-and-set. A connect attempt remembers the
//! generation it started in; `disconnect` bumps the generation, so an
//! attempt that finishes afterwards can tell it was superseded.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::BridgeError;
use crate::events::EventEmitter;
use crate::mirror::DeviceMirror;
use crate::pumps::push::push_pump;
use crate::pumps::watchdog::watchdog;
use crate::session::HubSession;
use crate::types::{ConnectionState, HubIdentity};

/// Shared supervisor state handed to spawned tasks.
#[derive(Clone)]
pub(crate) struct HubContext {
    pub(crate) hub: Arc<HubIdentity>,
    pub(crate) session: Arc<dyn HubSession>,
    pub(crate) mirror: Arc<DeviceMirror>,
    pub(crate) events: Arc<EventEmitter>,
    pub(crate) state: Arc<watch::Sender<ConnectionState>>,
    pub(crate) generation: Arc<AtomicU64>,
    /// Cleared by `disconnect`; no retry is scheduled while false.
    pub(crate) want_connected: Arc<AtomicBool>,
    /// Cancel token for the active retry loop, keyed by loop sequence.
    pub(crate) retry_cancel: Arc<std::sync::Mutex<Option<(u64, CancellationToken)>>>,
    pub(crate) retry_seq: Arc<AtomicU64>,
    /// Cancels the watchdog and push pump of the current connection.
    pub(crate) link_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) config: SupervisorConfig,
}

impl HubContext {
    pub(crate) fn hub_id(&self) -> &str {
        &self.hub.identifier
    }
}

/// Cancels the active retry loop, if any.
pub(crate) fn cancel_retry(retry_cancel: &std::sync::Mutex<Option<(u64, CancellationToken)>>) {
    if let Ok(mut guard) = retry_cancel.lock()
        && let Some((_, token)) = guard.take()
    {
        token.cancel();
    }
}

/// Installs `token` as the current link token, cancelling the old one.
pub(crate) fn replace_link(
    link_cancel: &std::sync::Mutex<Option<CancellationToken>>,
    token: Option<CancellationToken>,
) {
    if let Ok(mut guard) = link_cancel.lock()
        && let Some(old) = std::mem::replace(&mut *guard, token)
    {
        old.cancel();
    }
}

/// Runs one connect attempt. Never schedules a retry itself.
///
/// Returns `Ok` without doing anything if the hub is already connected or
/// connecting.
pub(crate) async fn try_connect(ctx: &HubContext) -> Result<(), BridgeError> {
    let mut generation = 0;
    let started = ctx.state.send_if_modified(|state| {
        if state.is_active() {
            return false;
        }
        *state = ConnectionState::Connecting;
        generation = ctx.generation.load(Ordering::SeqCst);
        ctx.events.connecting();
        true
    });
    if !started {
        debug!(hub = %ctx.hub_id(), "already connecting or connected");
        return Ok(());
    }
    info!(hub = %ctx.hub_id(), address = %ctx.hub.address, "connecting to hub");

    if let Err(e) = check_credentials(&ctx.hub) {
        return Err(fail(ctx, generation, e).await);
    }

    let timeout = ctx.config.connect_timeout();
    let result = match tokio::time::timeout(timeout, ctx.session.connect(&ctx.hub)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(BridgeError::Connection(e.to_string())),
        Err(_) => Err(BridgeError::Connection(format!(
            "no response within {}s",
            timeout.as_secs()
        ))),
    };
    if let Err(e) = result {
        release(ctx).await;
        return Err(fail(ctx, generation, e).await);
    }

    // Installed before committing so a disconnect racing the commit
    // always finds and cancels it.
    let link = CancellationToken::new();
    replace_link(&ctx.link_cancel, Some(link.clone()));

    let committed = ctx.state.send_if_modified(|state| {
        if ctx.generation.load(Ordering::SeqCst) != generation
            || *state != ConnectionState::Connecting
        {
            return false;
        }
        *state = ConnectionState::Connected;
        ctx.events.connected();
        true
    });
    if !committed {
        link.cancel();
        debug!(hub = %ctx.hub_id(), "connect superseded by disconnect, releasing session");
        release(ctx).await;
        return Err(BridgeError::Superseded);
    }
    info!(hub = %ctx.hub_id(), "connected");

    tokio::spawn(watchdog(ctx.clone(), generation, link.clone()));

    match ctx.mirror.refresh_devices(ctx.session.as_ref()).await {
        Ok(()) => start_pushes(ctx, link).await,
        Err(BridgeError::Superseded) => {}
        Err(e) => {
            warn!(hub = %ctx.hub_id(), error = %e, "device enumeration failed");
            ctx.events.error(e.to_string());
            tokio::spawn(retry_enumeration(ctx.clone(), link));
        }
    }
    Ok(())
}

/// Registers a subscriber per mirrored device and starts the push pump.
async fn start_pushes(ctx: &HubContext, link: CancellationToken) {
    if link.is_cancelled() {
        return;
    }
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let device_ids = ctx.mirror.device_ids().await;
    for device_id in &device_ids {
        let tx = push_tx.clone();
        let id = device_id.clone();
        ctx.session.add_subscriber(
            device_id,
            Arc::new(move || {
                // Fails only once the pump is gone, i.e. the link is closed.
                let _ = tx.send(id.clone());
            }),
        );
    }
    drop(push_tx);
    debug!(hub = %ctx.hub_id(), subscriptions = device_ids.len(), "subscriptions registered");

    tokio::spawn(push_pump(ctx.clone(), push_rx, link));
}

/// Re-enumerates with backoff after a failed listing on a live connection.
///
/// Runs until a refresh succeeds, the retry budget is spent or the link
/// closes. Pushes start once the mirror is populated.
async fn retry_enumeration(ctx: HubContext, link: CancellationToken) {
    let mut attempt: u32 = 0;
    loop {
        attempt = attempt.saturating_add(1);
        if let Some(max) = ctx.config.retry.max_attempts
            && attempt > max
        {
            warn!(hub = %ctx.hub_id(), attempts = max, "giving up on device enumeration");
            return;
        }

        let delay = ctx.config.retry.delay_for_attempt(attempt);
        tokio::select! {
            _ = link.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        match ctx.mirror.refresh_devices(ctx.session.as_ref()).await {
            Ok(()) => {
                info!(hub = %ctx.hub_id(), attempt, "device enumeration recovered");
                start_pushes(&ctx, link).await;
                return;
            }
            Err(BridgeError::Superseded) => return,
            Err(e) => {
                warn!(hub = %ctx.hub_id(), attempt, error = %e, "device enumeration retry failed");
            }
        }
    }
}

fn check_credentials(hub: &HubIdentity) -> Result<(), BridgeError> {
    match &hub.credentials {
        None => Err(BridgeError::Connection("hub has no credentials".into())),
        Some(credentials) => credentials
            .validate()
            .map_err(|what| BridgeError::Connection(format!("invalid {what} in credentials"))),
    }
}

/// Moves a still-current attempt from Connecting to Error.
async fn fail(ctx: &HubContext, generation: u64, error: BridgeError) -> BridgeError {
    let reason = error.to_string();
    let current = ctx.state.send_if_modified(|state| {
        if ctx.generation.load(Ordering::SeqCst) != generation
            || *state != ConnectionState::Connecting
        {
            return false;
        }
        *state = ConnectionState::Error;
        ctx.events.error(reason.clone());
        true
    });
    if !current {
        return BridgeError::Superseded;
    }
    warn!(hub = %ctx.hub_id(), error = %reason, "connection failed");
    ctx.mirror.mark_stale().await;
    error
}

/// Releases the session transport, logging failures.
pub(crate) async fn release(ctx: &HubContext) {
    if let Err(e) = ctx.session.disconnect().await {
        debug!(hub = %ctx.hub_id(), error = %e, "session release failed");
    }
}

/// Handles a connection the watchdog found dead.
pub(crate) async fn lose_connection(ctx: &HubContext, generation: u64, reason: String) {
    let lost = ctx.state.send_if_modified(|state| {
        if ctx.generation.load(Ordering::SeqCst) != generation
            || *state != ConnectionState::Connected
        {
            return false;
        }
        *state = ConnectionState::Error;
        ctx.events.error(reason.clone());
        true
    });
    if !lost {
        return;
    }
    warn!(hub = %ctx.hub_id(), reason = %reason, "hub connection lost");
    replace_link(&ctx.link_cancel, None);
    release(ctx).await;
    ctx.mirror.mark_stale().await;
    schedule_retry(ctx);
}

/// Starts a retry loop unless the hub was explicitly disconnected.
pub(crate) fn schedule_retry(ctx: &HubContext) {
    if !ctx.want_connected.load(Ordering::SeqCst) {
        return;
    }
    let seq = ctx.retry_seq.fetch_add(1, Ordering::SeqCst) + 1;
    let cancel = CancellationToken::new();
    if let Ok(mut guard) = ctx.retry_cancel.lock()
        && let Some((_, old)) = guard.replace((seq, cancel.clone()))
    {
        old.cancel();
    }
    tokio::spawn(retry_loop(ctx.clone(), seq, cancel));
}

/// Retry loop with exponential backoff.
///
/// Returns a boxed future to break the type cycle with `try_connect`,
/// whose watchdog may schedule this loop again.
pub(crate) fn retry_loop(
    ctx: HubContext,
    seq: u64,
    cancel: CancellationToken,
) -> Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        let hub_id = ctx.hub_id().to_string();
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            if let Some(max) = ctx.config.retry.max_attempts
                && attempt > max
            {
                warn!(hub = %hub_id, attempts = max, "giving up on hub, staying in error");
                break;
            }

            let delay = ctx.config.retry.delay_for_attempt(attempt);
            let delay_secs = delay.as_secs_f64();
            info!(
                hub = %hub_id,
                attempt,
                delay_secs = format_args!("{delay_secs:.1}"),
                "scheduling reconnect"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(hub = %hub_id, "retry cancelled");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if cancel.is_cancelled() || !ctx.want_connected.load(Ordering::SeqCst) {
                return;
            }

            match try_connect(&ctx).await {
                Ok(()) => {
                    debug!(hub = %hub_id, attempt, "retry loop finished");
                    break;
                }
                Err(BridgeError::Superseded) => return,
                Err(e) => {
                    warn!(hub = %hub_id, attempt, error = %e, "reconnect attempt failed");
                }
            }

            if cancel.is_cancelled() {
                return;
            }
        }

        // Clean up the cancel token if it's still ours.
        if let Ok(mut guard) = ctx.retry_cancel.lock() {
            let ours = guard.as_ref().is_some_and(|(s, _)| *s == seq);
            if ours {
                *guard = None;
            }
        }
    })
}
