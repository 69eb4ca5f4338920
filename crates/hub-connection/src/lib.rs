//! Connection lifecycle, device mirror and command translation for
//! Caseta Smart Bridges.
//!
//! One [`HubSupervisor`] per hub drives an authenticated [`HubSession`],
//! keeps a [`DeviceMirror`] of the hub's devices and scenes, and publishes
//! [`BridgeEvent`]s. [`HubDirectory`] maps hub identities to supervisors.

pub mod commands;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod events;
pub mod mirror;
mod pumps;
pub(crate) mod reconnection;
pub mod session;
pub mod supervisor;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use commands::CommandTranslator;
pub use config::{BridgeConfig, ConfigError, HubEntry, RetryConfig, SupervisorConfig};
pub use credentials::{CredentialError, CredentialStore};
pub use directory::{AddressChange, HubDirectory};
pub use error::BridgeError;
pub use events::{BridgeEvent, EventEmitter};
pub use mirror::DeviceMirror;
pub use session::{HubSession, SessionError, SessionFuture, SubscriberCallback};
pub use supervisor::HubSupervisor;
pub use types::{ConnectionState, HubCredentials, HubIdentity};
