//! Generic entity model consumed by the remote-control host.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::convert::{is_cover_open, native_to_external};
use crate::model::{DeviceKind, DeviceRecord};

/// Host-side entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Light,
    Switch,
    Cover,
    /// A hub scene, exposed as a push button.
    Button,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Light => "light",
            EntityKind::Switch => "switch",
            EntityKind::Cover => "cover",
            EntityKind::Button => "button",
        }
    }
}

impl From<DeviceKind> for EntityKind {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Light => EntityKind::Light,
            DeviceKind::Switch => EntityKind::Switch,
            DeviceKind::Cover => EntityKind::Cover,
        }
    }
}

impl FromStr for EntityKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(EntityKind::Light),
            "switch" => Ok(EntityKind::Switch),
            "cover" => Ok(EntityKind::Cover),
            "button" => Ok(EntityKind::Button),
            other => Err(ProtocolError::UnknownEntityKind(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one host entity: `<kind>.<hub_id>.<object_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub hub_id: String,
    pub kind: EntityKind,
    /// Device id or scene id on the hub.
    pub object_id: String,
}

impl EntityRef {
    /// Entity for a mirrored device.
    pub fn device(hub_id: &str, record: &DeviceRecord) -> Self {
        Self {
            hub_id: hub_id.to_string(),
            kind: record.kind.into(),
            object_id: record.device_id.clone(),
        }
    }

    /// Entity for a hub scene.
    pub fn scene(hub_id: &str, scene_id: &str) -> Self {
        Self {
            hub_id: hub_id.to_string(),
            kind: EntityKind::Button,
            object_id: scene_id.to_string(),
        }
    }

    /// Returns the host entity id.
    pub fn entity_id(&self) -> String {
        format!("{}.{}.{}", self.kind, self.hub_id, self.object_id)
    }

    /// Parses a host entity id produced by [`entity_id`](Self::entity_id).
    ///
    /// The hub id must not contain dots; the object id may.
    pub fn parse(entity_id: &str) -> Result<Self, ProtocolError> {
        let invalid = || ProtocolError::InvalidEntityId(entity_id.to_string());
        let (kind, rest) = entity_id.split_once('.').ok_or_else(invalid)?;
        let (hub_id, object_id) = rest.split_once('.').ok_or_else(invalid)?;
        if hub_id.is_empty() || object_id.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            hub_id: hub_id.to_string(),
            kind: kind.parse()?,
            object_id: object_id.to_string(),
        })
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.kind, self.hub_id, self.object_id)
    }
}

/// Entity state as shown by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityState {
    On,
    Off,
    Open,
    Closed,
    Unavailable,
}

/// Name of one entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeName {
    State,
    Brightness,
    Position,
}

/// New value of one entity attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    State(EntityState),
    Level(u8),
}

/// Attributes that changed on one entity. Produced by the device mirror,
/// consumed once by event listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDelta {
    pub entity: EntityRef,
    pub changes: BTreeMap<AttributeName, AttributeValue>,
}

impl AttributeDelta {
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            changes: BTreeMap::new(),
        }
    }

    /// Adds or replaces one changed attribute.
    pub fn with(mut self, name: AttributeName, value: AttributeValue) -> Self {
        self.changes.insert(name, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Returns the new state, if it changed.
    pub fn state(&self) -> Option<EntityState> {
        match self.changes.get(&AttributeName::State) {
            Some(AttributeValue::State(s)) => Some(*s),
            _ => None,
        }
    }

    /// Returns a new numeric attribute value, if it changed.
    pub fn level(&self, name: AttributeName) -> Option<u8> {
        match self.changes.get(&name) {
            Some(AttributeValue::Level(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Attributes derived from a device's native level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAttributes {
    pub state: EntityState,
    /// External 0-255 brightness (lights only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brightness: Option<u8>,
    /// Native 0-100 position (covers only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u8>,
}

impl DerivedAttributes {
    /// Derives host attributes from a device record.
    pub fn from_record(record: &DeviceRecord) -> Self {
        let level = record.raw_level;
        match record.kind {
            DeviceKind::Light => Self {
                state: on_off(level),
                brightness: Some(native_to_external(level)),
                position: None,
            },
            DeviceKind::Switch => Self {
                state: on_off(level),
                brightness: None,
                position: None,
            },
            DeviceKind::Cover => Self {
                state: if is_cover_open(level) {
                    EntityState::Open
                } else {
                    EntityState::Closed
                },
                brightness: None,
                position: Some(level.min(crate::NATIVE_MAX)),
            },
        }
    }

    /// Same attributes with the state replaced by UNAVAILABLE.
    /// Numeric values are kept for last-known-value display.
    pub fn unavailable(self) -> Self {
        Self {
            state: EntityState::Unavailable,
            ..self
        }
    }

    pub fn is_on(&self) -> bool {
        self.state == EntityState::On
    }

    /// Every attribute as a change set.
    pub fn changes(&self) -> BTreeMap<AttributeName, AttributeValue> {
        self.diff(None)
    }

    /// Attributes that differ from `previous` (all of them if `None`).
    pub fn diff(
        &self,
        previous: Option<&DerivedAttributes>,
    ) -> BTreeMap<AttributeName, AttributeValue> {
        let mut changes = BTreeMap::new();
        if previous.map(|p| p.state) != Some(self.state) {
            changes.insert(AttributeName::State, AttributeValue::State(self.state));
        }
        if let Some(b) = self.brightness
            && previous.and_then(|p| p.brightness) != Some(b)
        {
            changes.insert(AttributeName::Brightness, AttributeValue::Level(b));
        }
        if let Some(pos) = self.position
            && previous.and_then(|p| p.position) != Some(pos)
        {
            changes.insert(AttributeName::Position, AttributeValue::Level(pos));
        }
        changes
    }
}

fn on_off(level: u8) -> EntityState {
    if level > 0 {
        EntityState::On
    } else {
        EntityState::Off
    }
}
