use std::net::IpAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A hub found on the network (or listed statically).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredHub {
    /// Stable hub identifier (serial number when advertised).
    pub identifier: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip)]
    pub ips: Vec<IpAddr>,
    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl DiscoveredHub {
    /// Returns the address (IP or host) used to reach the hub.
    pub fn address(&self) -> String {
        match self.ips.first() {
            Some(ip) => ip.to_string(),
            None => self.host.clone(),
        }
    }

    /// Returns `address:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address(), self.port)
    }

    /// Returns true if the hub hasn't been seen recently.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        match self.last_seen {
            Some(last) => last.elapsed() > timeout,
            None => true,
        }
    }
}
