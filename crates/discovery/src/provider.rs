use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::{Duration, Instant};

use caseta_protocol::constants::LEAP_PORT;

use crate::DiscoveryError;
use crate::client::MdnsDiscovery;
use crate::types::DiscoveredHub;

pub type DiscoveryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<DiscoveredHub>, DiscoveryError>> + Send + 'a>>;

/// Source of hub locations.
///
/// Pairing and address refresh go through this seam so the bridge can run
/// with mDNS, a fixed list, or a test double.
pub trait DiscoveryProvider: Send + Sync {
    fn discover(&self, timeout: Duration) -> DiscoveryFuture<'_>;
}

impl DiscoveryProvider for MdnsDiscovery {
    fn discover(&self, timeout: Duration) -> DiscoveryFuture<'_> {
        Box::pin(MdnsDiscovery::discover(self, timeout))
    }
}

/// Fixed hub list, for networks where multicast doesn't reach the hub.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    hubs: Vec<DiscoveredHub>,
}

impl StaticDiscovery {
    pub fn new(hubs: Vec<DiscoveredHub>) -> Self {
        Self { hubs }
    }

    /// Builds the list from `host` or `host:port` strings.
    ///
    /// The address doubles as the identifier since nothing else is known.
    pub fn from_addresses<S: AsRef<str>>(addresses: &[S]) -> Result<Self, DiscoveryError> {
        let hubs = addresses
            .iter()
            .map(|a| parse_address(a.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { hubs })
    }
}

impl DiscoveryProvider for StaticDiscovery {
    fn discover(&self, _timeout: Duration) -> DiscoveryFuture<'_> {
        let now = Instant::now();
        let hubs = self
            .hubs
            .iter()
            .cloned()
            .map(|mut hub| {
                hub.last_seen = Some(now);
                hub
            })
            .collect();
        Box::pin(async move { Ok(hubs) })
    }
}

/// Parses `host`, `host:port`, a bare IP (v4 or v6) or `[v6]:port`.
fn parse_address(raw: &str) -> Result<DiscoveredHub, DiscoveryError> {
    let raw = raw.trim();
    let invalid = || DiscoveryError::Address(raw.to_string());

    let (host, port) = if let Ok(ip) = raw.parse::<IpAddr>() {
        (ip.to_string(), LEAP_PORT)
    } else if let Ok(socket) = raw.parse::<SocketAddr>() {
        (socket.ip().to_string(), socket.port())
    } else {
        let (host, port) = match raw.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (raw, LEAP_PORT),
        };
        if host.is_empty() || host.contains([':', '[', ']']) {
            return Err(invalid());
        }
        (host.to_string(), port)
    };

    Ok(DiscoveredHub {
        identifier: host.clone(),
        name: host.clone(),
        ips: host.parse::<IpAddr>().ok().into_iter().collect(),
        host,
        port,
        model: None,
        last_seen: None,
    })
}

/// Runs one discovery round and returns the hub with `identifier`, if any.
pub async fn find_hub(
    provider: &dyn DiscoveryProvider,
    identifier: &str,
    timeout: Duration,
) -> Result<Option<DiscoveredHub>, DiscoveryError> {
    let hubs = provider.discover(timeout).await?;
    Ok(hubs.into_iter().find(|h| h.identifier == identifier))
}
