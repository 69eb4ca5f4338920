use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use caseta_protocol::constants::SERVICE_NAME;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, warn};

use crate::DiscoveryError;
use crate::types::DiscoveredHub;

/// Discovers Smart Bridges on the local network via mDNS/DNS-SD.
pub struct MdnsDiscovery {
    hubs: Arc<RwLock<HashMap<String, DiscoveredHub>>>,
}

impl MdnsDiscovery {
    /// Creates a new mDNS discovery client.
    pub fn new() -> Self {
        Self {
            hubs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Performs a one-time mDNS query and returns the hubs that answered.
    pub async fn discover(&self, timeout: Duration) -> Result<Vec<DiscoveredHub>, DiscoveryError> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Mdns(format!("failed to create mDNS daemon: {e}")))?;

        let service_type = format!("{SERVICE_NAME}.local.");
        let receiver = daemon
            .browse(&service_type)
            .map_err(|e| DiscoveryError::Mdns(format!("failed to browse mDNS: {e}")))?;

        let mut found = Vec::new();
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            match tokio::time::timeout(
                deadline.saturating_duration_since(Instant::now()),
                tokio::task::spawn_blocking({
                    let receiver = receiver.clone();
                    move || receiver.recv_timeout(Duration::from_millis(100))
                }),
            )
            .await
            {
                Ok(Ok(Ok(event))) => {
                    if let Some(hub) = self.process_event(&event)
                        && !found.iter().any(|h: &DiscoveredHub| h.identifier == hub.identifier)
                    {
                        found.push(hub);
                    }
                }
                _ => {
                    // Timeout or error, keep going until the deadline.
                    if Instant::now() >= deadline {
                        break;
                    }
                }
            }
        }

        if let Err(e) = daemon.shutdown() {
            debug!("mDNS daemon shutdown: {e}");
        }
        debug!(count = found.len(), "mDNS discovery finished");
        Ok(found)
    }

    /// Records a resolved service and returns it as a hub.
    fn process_event(&self, event: &ServiceEvent) -> Option<DiscoveredHub> {
        let ServiceEvent::ServiceResolved(info) = event else {
            return None;
        };
        let hub = hub_from_service(info)?;

        match self.hubs.write() {
            Ok(mut hubs) => {
                hubs.insert(hub.identifier.clone(), hub.clone());
            }
            Err(e) => warn!("discovery cache poisoned: {e}"),
        }
        Some(hub)
    }

    /// Returns every hub seen so far.
    pub fn hubs(&self) -> Vec<DiscoveredHub> {
        self.hubs
            .read()
            .map(|h| h.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns a specific hub by identifier.
    pub fn hub(&self, identifier: &str) -> Option<DiscoveredHub> {
        self.hubs.read().ok()?.get(identifier).cloned()
    }

    /// Drops hubs not seen within `timeout`.
    pub fn prune_stale(&self, timeout: Duration) {
        if let Ok(mut hubs) = self.hubs.write() {
            hubs.retain(|_, hub| !hub.is_stale(timeout));
        }
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a hub from a resolved mDNS service.
///
/// The serial number TXT record is the stable identifier; the service's
/// full name stands in when it's missing.
pub(crate) fn hub_from_service(info: &ServiceInfo) -> Option<DiscoveredHub> {
    let mut identifier = String::new();
    let mut model = None;
    for property in info.get_properties().iter() {
        match property.key() {
            "SERNUM" => identifier = property.val_str().to_string(),
            "DEVCLASS" => model = Some(property.val_str().to_string()),
            _ => {}
        }
    }
    if identifier.is_empty() {
        identifier = info.get_fullname().to_string();
    }
    if identifier.is_empty() {
        return None;
    }

    // Skip loopback and link-local addresses.
    let ips: Vec<IpAddr> = info
        .get_addresses()
        .iter()
        .filter_map(|ip| match ip {
            IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_link_local() => Some(IpAddr::V4(*v4)),
            _ => None,
        })
        .collect();

    let host = info.get_hostname().to_string();
    let name = host
        .trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string();

    Some(DiscoveredHub {
        identifier,
        name,
        host,
        port: info.get_port(),
        model,
        ips,
        last_seen: Some(Instant::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(properties: &[(&str, &str)], ip: &str) -> ServiceInfo {
        ServiceInfo::new(
            "_lutron._tcp.local.",
            "Lutron Status",
            "Lutron-0123abcd.local.",
            ip,
            8081,
            properties,
        )
        .unwrap()
    }

    #[test]
    fn hub_from_service_uses_serial() {
        let info = service(&[("SERNUM", "0123ABCD"), ("DEVCLASS", "L-BDG2")], "192.168.1.40");
        let hub = hub_from_service(&info).unwrap();
        assert_eq!(hub.identifier, "0123ABCD");
        assert_eq!(hub.model.as_deref(), Some("L-BDG2"));
        assert_eq!(hub.name, "Lutron-0123abcd");
        assert_eq!(hub.port, 8081);
        assert_eq!(hub.address(), "192.168.1.40");
    }

    #[test]
    fn hub_from_service_falls_back_to_fullname() {
        let info = service(&[], "192.168.1.40");
        let hub = hub_from_service(&info).unwrap();
        assert_eq!(hub.identifier, info.get_fullname());
    }

    #[test]
    fn link_local_addresses_are_skipped() {
        let info = service(&[("SERNUM", "1")], "169.254.10.2");
        let hub = hub_from_service(&info).unwrap();
        assert!(hub.ips.is_empty());
        assert_eq!(hub.address(), "Lutron-0123abcd.local.");
    }

    #[test]
    fn resolved_events_are_cached() {
        let client = MdnsDiscovery::new();
        let info = service(&[("SERNUM", "0123ABCD")], "192.168.1.40");
        let hub = client.process_event(&ServiceEvent::ServiceResolved(info));
        assert!(hub.is_some());
        assert_eq!(client.hubs().len(), 1);
        assert!(client.hub("0123ABCD").is_some());
        assert!(client.hub("missing").is_none());

        client.prune_stale(Duration::from_secs(60));
        assert_eq!(client.hubs().len(), 1);
    }

    #[test]
    fn other_events_are_ignored() {
        let client = MdnsDiscovery::new();
        let event = ServiceEvent::SearchStarted("_lutron._tcp.local.".into());
        assert!(client.process_event(&event).is_none());
        assert!(client.hubs().is_empty());
    }
}
