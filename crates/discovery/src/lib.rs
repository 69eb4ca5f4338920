pub mod client;
pub mod provider;
pub mod types;

// Re-export primary types.
pub use client::MdnsDiscovery;
pub use provider::{DiscoveryFuture, DiscoveryProvider, StaticDiscovery, find_hub};
pub use types::DiscoveredHub;

/// Errors for discovery operations.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(String),

    #[error("invalid address: {0}")]
    Address(String),
}
