use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::SWITCH_TYPES;

/// Hub domain a device is enumerated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Light,
    Switch,
    Cover,
}

impl DeviceKind {
    /// Every domain the bridge enumerates, in enumeration order.
    pub const ALL: [DeviceKind; 3] = [DeviceKind::Light, DeviceKind::Switch, DeviceKind::Cover];

    /// Returns the hub domain name.
    pub fn domain(self) -> &'static str {
        match self {
            DeviceKind::Light => "light",
            DeviceKind::Switch => "switch",
            DeviceKind::Cover => "cover",
        }
    }

    /// Lights and switches share the on/off command surface.
    pub fn is_light_like(self) -> bool {
        matches!(self, DeviceKind::Light | DeviceKind::Switch)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.domain())
    }
}

/// Last enumerated state of one hub device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub device_id: String,
    pub kind: DeviceKind,
    /// Level on the hub's native 0-100 scale.
    pub raw_level: u8,
    pub type_tag: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl DeviceRecord {
    /// Returns true if the device accepts a brightness level.
    pub fn is_dimmable(&self) -> bool {
        self.kind == DeviceKind::Light && is_dimmable(&self.type_tag)
    }
}

/// A scene (virtual button) programmed on the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneRecord {
    pub scene_id: String,
    pub display_name: String,
}

/// Returns false for type tags of known on/off-only families.
pub fn is_dimmable(type_tag: &str) -> bool {
    !SWITCH_TYPES.contains(&type_tag)
}
