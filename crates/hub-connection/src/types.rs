//! Public types for the hub bridge.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Connection state of one hub supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session and no retry pending.
    #[default]
    Disconnected,
    /// Session connect in progress.
    Connecting,
    /// Logged in; the mirror is live.
    Connected,
    /// Last connect failed or the session dropped. A retry may be pending.
    Error,
}

impl ConnectionState {
    /// Connected or on its way there.
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// TLS material issued to this bridge when it paired with a hub.
#[derive(Clone, PartialEq, Eq)]
pub struct HubCredentials {
    pub private_key: Vec<u8>,
    pub certificate: Vec<u8>,
    pub ca_certificate: Vec<u8>,
}

impl HubCredentials {
    /// Checks that every blob is present and PEM-shaped.
    ///
    /// Returns the name of the first bad blob.
    pub fn validate(&self) -> Result<(), &'static str> {
        for (name, blob) in [
            ("private key", &self.private_key),
            ("certificate", &self.certificate),
            ("CA certificate", &self.ca_certificate),
        ] {
            if !looks_like_pem(blob) {
                return Err(name);
            }
        }
        Ok(())
    }

    /// Short SHA-256 fingerprint of the client certificate, for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.certificate);
        hex::encode(&digest[..8])
    }
}

// Key material never goes to logs.
impl fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubCredentials")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

fn looks_like_pem(blob: &[u8]) -> bool {
    let text = String::from_utf8_lossy(blob);
    text.trim_start().starts_with("-----BEGIN")
}

/// A paired hub. Immutable once paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubIdentity {
    /// Stable unique id (the hub serial).
    pub identifier: String,
    pub address: String,
    pub name: String,
    pub model: Option<String>,
    pub credentials: Option<HubCredentials>,
}
