//! DNS-backed discovery.
//!
//! Discovery backends that register fleet members as A records (one
//! per instance) are resolved through the system resolver. Every
//! returned address is paired with the fleet's fixed service port.

use async_trait::async_trait;
use tracing::debug;

use crate::{DiscoveryError, DiscoveryResult, Instance, PeerDiscovery};

/// Resolves a DNS name to the set of registered instances.
pub struct DnsDiscovery {
    name: String,
    service_port: u16,
}

impl DnsDiscovery {
    pub fn new(name: impl Into<String>, service_port: u16) -> Self {
        Self {
            name: name.into(),
            service_port,
        }
    }
}

#[async_trait]
impl PeerDiscovery for DnsDiscovery {
    async fn resolve_peers(&self) -> DiscoveryResult<Vec<Instance>> {
        // lookup_host needs a port even though we only keep addresses.
        let query = format!("{}:{}", self.name, self.service_port);
        let addrs = tokio::net::lookup_host(&query)
            .await
            .map_err(|e| DiscoveryError::Lookup {
                name: self.name.clone(),
                detail: e.to_string(),
            })?;

        let mut peers: Vec<Instance> = addrs
            .map(|addr| Instance::new(addr.ip().to_string(), self.service_port))
            .collect();
        peers.sort_by(|a, b| a.address.cmp(&b.address));
        peers.dedup();

        debug!(name = %self.name, count = peers.len(), "resolved fleet members");
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_localhost() {
        let discovery = DnsDiscovery::new("localhost", 9090);
        let peers = discovery.resolve_peers().await.unwrap();
        assert!(!peers.is_empty());
        assert!(peers.iter().all(|p| p.port == 9090));
    }

    #[tokio::test]
    async fn unknown_name_fails() {
        let discovery = DnsDiscovery::new("definitely-not-a-real-host.invalid", 9090);
        assert!(discovery.resolve_peers().await.is_err());
    }
}
