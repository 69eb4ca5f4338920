pub mod constants;
pub mod convert;
pub mod entity;
pub mod model;

// Re-export primary types for convenience.
pub use constants::{COVER_OPEN_THRESHOLD, EXTERNAL_MAX, NATIVE_MAX};
pub use convert::{ScaleError, external_to_native, is_cover_open, native_to_external};
pub use entity::{
    AttributeDelta, AttributeName, AttributeValue, DerivedAttributes, EntityKind, EntityRef,
    EntityState,
};
pub use model::{DeviceKind, DeviceRecord, SceneRecord, is_dimmable};

/// Errors for protocol-level parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("unknown entity kind: {0}")]
    UnknownEntityKind(String),
}
