//! Generic entity commands translated into hub calls.

use std::sync::Arc;

use caseta_protocol::convert::{external_to_native, validate_position};
use caseta_protocol::{DeviceKind, DeviceRecord, NATIVE_MAX};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::mirror::DeviceMirror;
use crate::session::{HubSession, SessionError};
use crate::types::ConnectionState;

/// Turns host commands into native session calls for one hub.
///
/// Every command needs a connected hub. The mirror is updated only after
/// the hub accepted the call, through the same change-suppression path as
/// pushes.
pub struct CommandTranslator {
    hub_id: String,
    session: Arc<dyn HubSession>,
    mirror: Arc<DeviceMirror>,
    state: watch::Receiver<ConnectionState>,
}

impl CommandTranslator {
    pub(crate) fn new(
        hub_id: String,
        session: Arc<dyn HubSession>,
        mirror: Arc<DeviceMirror>,
        state: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            hub_id,
            session,
            mirror,
            state,
        }
    }

    /// Turns a light or switch on, optionally at an external 0-255 brightness.
    ///
    /// Without a brightness the hub's own "on" is used and the mirror
    /// assumes the last non-zero level (or full).
    pub async fn set_light(&self, device_id: &str, brightness: Option<i64>) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        let device = self.light_like(device_id).await?;

        match brightness {
            Some(brightness) => {
                if !device.is_dimmable() {
                    return Err(BridgeError::InvalidArgument(format!(
                        "device {device_id} ({}) is not dimmable",
                        device.type_tag
                    )));
                }
                let level = external_to_native(brightness)?;
                self.session
                    .set_value(device_id, level)
                    .await
                    .map_err(|e| self.failed(device_id, e))?;
                debug!(hub = %self.hub_id, device = %device_id, brightness, level, "set level");
                self.mirror.apply_optimistic(device_id, level).await;
            }
            None => {
                self.session
                    .turn_on(device_id)
                    .await
                    .map_err(|e| self.failed(device_id, e))?;
                let level = self
                    .mirror
                    .last_on_level(device_id)
                    .await
                    .unwrap_or(NATIVE_MAX);
                debug!(hub = %self.hub_id, device = %device_id, level, "turned on");
                self.mirror.apply_optimistic(device_id, level).await;
            }
        }
        Ok(())
    }

    pub async fn turn_off(&self, device_id: &str) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        self.light_like(device_id).await?;
        self.session
            .turn_off(device_id)
            .await
            .map_err(|e| self.failed(device_id, e))?;
        debug!(hub = %self.hub_id, device = %device_id, "turned off");
        self.mirror.apply_optimistic(device_id, 0).await;
        Ok(())
    }

    /// Flips a light or switch and returns whether it is now on.
    ///
    /// The current state comes from the hub, not the mirror.
    pub async fn toggle(&self, device_id: &str) -> Result<bool, BridgeError> {
        self.ensure_connected()?;
        self.light_like(device_id).await?;
        let on = self
            .session
            .is_on(device_id)
            .await
            .map_err(|e| self.failed(device_id, e))?;
        if on {
            self.turn_off(device_id).await?;
        } else {
            self.set_light(device_id, None).await?;
        }
        Ok(!on)
    }

    /// Moves a cover to a native 0-100 position.
    pub async fn set_cover_position(&self, device_id: &str, position: i64) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        let position = validate_position(position)?;
        self.cover(device_id).await?;
        self.session
            .set_value(device_id, position)
            .await
            .map_err(|e| self.failed(device_id, e))?;
        debug!(hub = %self.hub_id, device = %device_id, position, "set cover position");
        self.mirror.apply_optimistic(device_id, position).await;
        Ok(())
    }

    pub async fn open_cover(&self, device_id: &str) -> Result<(), BridgeError> {
        self.set_cover_position(device_id, i64::from(NATIVE_MAX)).await
    }

    pub async fn close_cover(&self, device_id: &str) -> Result<(), BridgeError> {
        self.set_cover_position(device_id, 0).await
    }

    /// Stops a moving cover, then re-reads where it stopped.
    pub async fn stop_cover(&self, device_id: &str) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        self.cover(device_id).await?;
        self.session
            .stop(device_id)
            .await
            .map_err(|e| self.failed(device_id, e))?;
        debug!(hub = %self.hub_id, device = %device_id, "stopped cover");
        // The stop itself went through; a failed re-read only leaves the
        // position stale until the next push.
        if let Err(e) = self
            .mirror
            .on_device_pushed(self.session.as_ref(), device_id)
            .await
        {
            warn!(hub = %self.hub_id, device = %device_id, error = %e, "re-reading stopped cover failed");
        }
        Ok(())
    }

    /// Activates a scene known to the mirror.
    ///
    /// The hub never confirms scene activation, so the active scene is
    /// tracked optimistically.
    pub async fn activate_scene(&self, scene_id: &str) -> Result<(), BridgeError> {
        self.ensure_connected()?;
        if self.mirror.scene(scene_id).await.is_none() {
            return Err(BridgeError::InvalidArgument(format!("unknown scene {scene_id}")));
        }
        self.session
            .activate_scene(scene_id)
            .await
            .map_err(|e| self.failed(scene_id, e))?;
        debug!(hub = %self.hub_id, scene = %scene_id, "activated scene");
        self.mirror.set_active_scene(scene_id).await;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<(), BridgeError> {
        if *self.state.borrow() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(BridgeError::NotConnected)
        }
    }

    async fn light_like(&self, device_id: &str) -> Result<DeviceRecord, BridgeError> {
        let device = self.known(device_id).await?;
        if !device.kind.is_light_like() {
            return Err(BridgeError::InvalidArgument(format!(
                "device {device_id} is a {}, not a light or switch",
                device.kind
            )));
        }
        Ok(device)
    }

    async fn cover(&self, device_id: &str) -> Result<DeviceRecord, BridgeError> {
        let device = self.known(device_id).await?;
        if device.kind != DeviceKind::Cover {
            return Err(BridgeError::InvalidArgument(format!(
                "device {device_id} is a {}, not a cover",
                device.kind
            )));
        }
        Ok(device)
    }

    async fn known(&self, device_id: &str) -> Result<DeviceRecord, BridgeError> {
        self.mirror
            .device(device_id)
            .await
            .ok_or_else(|| BridgeError::InvalidArgument(format!("unknown device {device_id}")))
    }

    fn failed(&self, device_id: &str, error: SessionError) -> BridgeError {
        warn!(hub = %self.hub_id, device = %device_id, error = %error, "hub command failed");
        BridgeError::CommandFailed {
            device_id: device_id.to_string(),
            source: error,
        }
    }
}
