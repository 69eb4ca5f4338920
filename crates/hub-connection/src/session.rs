//! Contract of the authenticated hub client.
//!
//! The wire protocol and TLS handshake live behind [`HubSession`]; the
//! bridge only drives its lifecycle and issues typed calls through it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use caseta_protocol::{DeviceKind, DeviceRecord, SceneRecord};

use crate::types::HubIdentity;

/// Boxed future returned by every async session call.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SessionError>> + Send + 'a>>;

/// Invoked by the session when the hub reports a change on a device.
///
/// May be called from any thread.
pub type SubscriberCallback = Arc<dyn Fn() + Send + Sync>;

/// Failure reported by a hub session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("session is not logged in")]
    NotLoggedIn,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

/// Authenticated RPC client for one hub.
///
/// Subscriptions do not survive [`disconnect`](Self::disconnect); the
/// supervisor registers them again after every successful connect.
pub trait HubSession: Send + Sync {
    /// Opens the transport and logs in with the hub's credentials.
    fn connect<'a>(&'a self, hub: &'a HubIdentity) -> SessionFuture<'a, ()>;

    /// Releases the transport. Safe to call when already closed.
    fn disconnect(&self) -> SessionFuture<'_, ()>;

    fn is_logged_in(&self) -> SessionFuture<'_, bool>;

    /// Lists every device the hub files under `kind`.
    fn list_devices(&self, kind: DeviceKind) -> SessionFuture<'_, Vec<DeviceRecord>>;

    /// Fetches one device. `None` if the hub no longer knows it.
    fn device<'a>(&'a self, device_id: &'a str) -> SessionFuture<'a, Option<DeviceRecord>>;

    fn list_scenes(&self) -> SessionFuture<'_, Vec<SceneRecord>>;

    /// Sets a native 0-100 level.
    fn set_value<'a>(&'a self, device_id: &'a str, level: u8) -> SessionFuture<'a, ()>;

    fn turn_on<'a>(&'a self, device_id: &'a str) -> SessionFuture<'a, ()>;

    fn turn_off<'a>(&'a self, device_id: &'a str) -> SessionFuture<'a, ()>;

    fn is_on<'a>(&'a self, device_id: &'a str) -> SessionFuture<'a, bool>;

    fn activate_scene<'a>(&'a self, scene_id: &'a str) -> SessionFuture<'a, ()>;

    /// Stops a moving cover.
    fn stop<'a>(&'a self, _device_id: &'a str) -> SessionFuture<'a, ()> {
        Box::pin(async { Err(SessionError::Unsupported("stop")) })
    }

    /// Registers `callback` for change notifications on `device_id`.
    fn add_subscriber(&self, device_id: &str, callback: SubscriberCallback);
}
