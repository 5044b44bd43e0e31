//! TTL cache over a discovery backend.
//!
//! Fleet membership changes on the order of deployments; the control
//! plane asks for it on the order of requests. The cache serves the
//! last resolved list until the TTL lapses, and falls back to the last
//! good list when a refresh fails (logging the failure) so a transient
//! discovery outage does not take down request routing.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{DiscoveryResult, Instance, PeerDiscovery};

struct CacheState {
    peers: Vec<Instance>,
    fetched_at: Instant,
}

/// Caches an inner discovery's results for a fixed TTL.
pub struct CachedDiscovery<D> {
    inner: D,
    ttl: Duration,
    state: Mutex<Option<CacheState>>,
}

impl<D: PeerDiscovery> CachedDiscovery<D> {
    /// Default TTL matching how often fleets actually change.
    pub const DEFAULT_TTL: Duration = Duration::from_secs(15);

    pub fn new(inner: D) -> Self {
        Self::with_ttl(inner, Self::DEFAULT_TTL)
    }

    pub fn with_ttl(inner: D, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<D: PeerDiscovery> PeerDiscovery for CachedDiscovery<D> {
    async fn resolve_peers(&self) -> DiscoveryResult<Vec<Instance>> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            debug!(count = cached.peers.len(), "serving cached peer list");
            return Ok(cached.peers.clone());
        }

        match self.inner.resolve_peers().await {
            Ok(peers) => {
                *state = Some(CacheState {
                    peers: peers.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(peers)
            }
            Err(e) => match state.as_ref() {
                // Stale data beats no data during a discovery outage.
                Some(cached) => {
                    warn!(error = %e, "discovery refresh failed, serving stale peer list");
                    Ok(cached.peers.clone())
                }
                None => Err(e),
            },
        }
    }
}
