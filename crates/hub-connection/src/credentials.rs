//! Persistent store of hub TLS credentials.
//!
//! Credentials are cached in memory and persisted to a JSON file of
//! base64 blobs, readable by the owner only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{config_dir, set_permissions_0600};
use crate::types::HubCredentials;

/// File names the pairing tool writes into a certificate directory.
pub const KEY_FILE: &str = "caseta.key";
pub const CERT_FILE: &str = "caseta.crt";
pub const CA_FILE: &str = "caseta-bridge.crt";

/// Errors from credential storage.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 in stored credentials: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("invalid {0}")]
    Invalid(&'static str),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredentials {
    private_key: String,
    certificate: String,
    ca_certificate: String,
}

impl From<&HubCredentials> for StoredCredentials {
    fn from(c: &HubCredentials) -> Self {
        Self {
            private_key: STANDARD.encode(&c.private_key),
            certificate: STANDARD.encode(&c.certificate),
            ca_certificate: STANDARD.encode(&c.ca_certificate),
        }
    }
}

impl TryFrom<StoredCredentials> for HubCredentials {
    type Error = CredentialError;

    fn try_from(s: StoredCredentials) -> Result<Self, Self::Error> {
        Ok(Self {
            private_key: STANDARD.decode(s.private_key)?,
            certificate: STANDARD.decode(s.certificate)?,
            ca_certificate: STANDARD.decode(s.ca_certificate)?,
        })
    }
}

/// Credentials keyed by hub identifier.
pub struct CredentialStore {
    path: PathBuf,
    entries: RwLock<HashMap<String, HubCredentials>>,
}

impl CredentialStore {
    /// Opens the store, loading existing credentials from disk.
    pub fn new(path: PathBuf) -> Result<Self, CredentialError> {
        let entries = load_credentials(&path)?;
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    pub fn get(&self, hub_id: &str) -> Option<HubCredentials> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hub_id)
            .cloned()
    }

    /// Stores credentials for a hub after checking their shape.
    pub fn save(&self, hub_id: &str, credentials: HubCredentials) -> Result<(), CredentialError> {
        credentials.validate().map_err(CredentialError::Invalid)?;
        debug!(hub = %hub_id, fingerprint = %credentials.fingerprint(), "saving credentials");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hub_id.to_string(), credentials);
        self.persist()
    }

    pub fn remove(&self, hub_id: &str) -> Result<(), CredentialError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hub_id);
        self.persist()
    }

    pub fn hub_ids(&self) -> Vec<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn persist(&self) -> Result<(), CredentialError> {
        let stored: HashMap<String, StoredCredentials> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, c)| (id.clone(), StoredCredentials::from(c)))
            .collect();
        let json = serde_json::to_string_pretty(&stored)?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, json)?;
        set_permissions_0600(&self.path);
        debug!("persisted {} credential set(s) to {:?}", stored.len(), self.path);
        Ok(())
    }
}

fn load_credentials(path: &Path) -> Result<HashMap<String, HubCredentials>, CredentialError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let data = std::fs::read_to_string(path)?;
    let stored: HashMap<String, StoredCredentials> = serde_json::from_str(&data)?;
    let entries = stored
        .into_iter()
        .map(|(id, s)| Ok((id, HubCredentials::try_from(s)?)))
        .collect::<Result<HashMap<_, _>, CredentialError>>()?;
    debug!("loaded {} credential set(s) from {:?}", entries.len(), path);
    Ok(entries)
}

/// Reads the PEM files a pairing tool leaves in `dir`.
pub fn import_pem_dir(dir: &Path) -> Result<HubCredentials, CredentialError> {
    let credentials = HubCredentials {
        private_key: std::fs::read(dir.join(KEY_FILE))?,
        certificate: std::fs::read(dir.join(CERT_FILE))?,
        ca_certificate: std::fs::read(dir.join(CA_FILE))?,
    };
    credentials.validate().map_err(CredentialError::Invalid)?;
    Ok(credentials)
}

/// Returns the default credential store path.
pub fn default_credentials_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("caseta-bridge").join("credentials.json"))
}
