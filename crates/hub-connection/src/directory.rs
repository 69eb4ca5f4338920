//! Process-wide map of hub identity to supervisor.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use caseta_discovery::{DiscoveryError, DiscoveryProvider};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::credentials::CredentialStore;
use crate::error::BridgeError;
use crate::session::HubSession;
use crate::supervisor::HubSupervisor;
use crate::types::HubIdentity;

/// A configured hub found at a different address than configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressChange {
    pub hub_id: String,
    pub configured: String,
    pub discovered: String,
}

/// Supervisors for every configured hub. Supervisors share nothing; this
/// only fans out bulk operations such as host standby handling.
#[derive(Default)]
pub struct HubDirectory {
    hubs: RwLock<HashMap<String, Arc<HubSupervisor>>>,
}

impl HubDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one supervisor per configured hub.
    ///
    /// `session_for` creates the hub client; credentials come from `store`.
    pub fn from_config<F>(config: &BridgeConfig, store: &CredentialStore, session_for: F) -> Self
    where
        F: Fn(&HubIdentity) -> Arc<dyn HubSession>,
    {
        let directory = Self::new();
        for entry in &config.hubs {
            let identity = entry.identity(store.get(&entry.identifier));
            if identity.credentials.is_none() {
                warn!(hub = %entry.identifier, "no stored credentials, connects will fail until paired");
            }
            let session = session_for(&identity);
            directory.insert(Arc::new(HubSupervisor::new(
                identity,
                session,
                config.supervisor.clone(),
            )));
        }
        debug!(hubs = directory.len(), "hub directory built");
        directory
    }

    /// Adds a supervisor, returning the one it replaced.
    pub fn insert(&self, supervisor: Arc<HubSupervisor>) -> Option<Arc<HubSupervisor>> {
        let id = supervisor.hub().identifier.clone();
        self.hubs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, supervisor)
    }

    pub fn remove(&self, hub_id: &str) -> Option<Arc<HubSupervisor>> {
        self.hubs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(hub_id)
    }

    pub fn get(&self, hub_id: &str) -> Option<Arc<HubSupervisor>> {
        self.hubs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(hub_id)
            .cloned()
    }

    /// Hub identifiers, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .hubs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.hubs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn supervisors(&self) -> Vec<Arc<HubSupervisor>> {
        self.hubs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Connects every hub concurrently. Returns the hubs that failed, sorted
    /// by id; they keep retrying in the background.
    pub async fn connect_all(&self) -> Vec<(String, BridgeError)> {
        let mut set = JoinSet::new();
        for supervisor in self.supervisors() {
            set.spawn(async move {
                let id = supervisor.hub().identifier.clone();
                (id, supervisor.connect().await)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(e))) => failures.push((id, e)),
                Err(e) => warn!(error = %e, "connect task failed"),
            }
        }
        failures.sort_by(|a, b| a.0.cmp(&b.0));
        info!(hubs = self.len(), failed = failures.len(), "connect all finished");
        failures
    }

    /// Disconnects every hub.
    pub async fn disconnect_all(&self) {
        for supervisor in self.supervisors() {
            supervisor.disconnect().await;
        }
        info!(hubs = self.len(), "disconnected all hubs");
    }

    /// Runs one discovery round and reports configured hubs that answered
    /// from another address.
    ///
    /// Hub identities are immutable, so applying a change (rewriting the
    /// config and rebuilding the supervisor) is left to the caller.
    pub async fn address_changes(
        &self,
        provider: &dyn DiscoveryProvider,
        timeout: Duration,
    ) -> Result<Vec<AddressChange>, DiscoveryError> {
        let found = provider.discover(timeout).await?;
        let mut changes = Vec::new();
        for supervisor in self.supervisors() {
            let hub = supervisor.hub();
            let Some(seen) = found.iter().find(|d| d.identifier == hub.identifier) else {
                continue;
            };
            let discovered = seen.address();
            if discovered != hub.address {
                debug!(
                    hub = %hub.identifier,
                    configured = %hub.address,
                    discovered = %discovered,
                    "hub address changed"
                );
                changes.push(AddressChange {
                    hub_id: hub.identifier.clone(),
                    configured: hub.address.clone(),
                    discovered,
                });
            }
        }
        changes.sort_by(|a, b| a.hub_id.cmp(&b.hub_id));
        Ok(changes)
    }
}
