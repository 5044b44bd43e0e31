//! loadgrid-discovery — how an instance finds the rest of the fleet.
//!
//! The router and the network actuator both need the current list of
//! peer instances. They consume it through the [`PeerDiscovery`] trait:
//! a static list for fixed fleets and tests, a DNS name for discovery
//! backends that publish A records, and a TTL cache wrapper since fleet
//! membership changes slowly relative to the control-loop pace.

pub mod cache;
pub mod dns;

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

pub use cache::CachedDiscovery;
pub use dns::DnsDiscovery;

/// Errors from resolving fleet membership.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery lookup failed for {name}: {detail}")]
    Lookup { name: String, detail: String },
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// One peer in the fleet. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instance {
    pub address: String,
    pub port: u16,
}

impl Instance {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// The peer-discovery boundary.
#[async_trait]
pub trait PeerDiscovery: Send + Sync {
    /// The current list of reachable fleet members.
    async fn resolve_peers(&self) -> DiscoveryResult<Vec<Instance>>;
}

/// A fixed peer list.
pub struct StaticDiscovery {
    peers: Vec<Instance>,
}

impl StaticDiscovery {
    pub fn new(peers: Vec<Instance>) -> Self {
        Self { peers }
    }
}

#[async_trait]
impl PeerDiscovery for StaticDiscovery {
    async fn resolve_peers(&self) -> DiscoveryResult<Vec<Instance>> {
        Ok(self.peers.clone())
    }
}
