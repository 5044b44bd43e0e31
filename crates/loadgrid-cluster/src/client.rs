//! Outbound peer calls for the fan-out path.
//!
//! Routing goes through the [`PeerTransport`] trait so handler tests
//! can script peer outcomes; [`PeerClient`] is the real tonic-backed
//! implementation. Both timeouts are bounded so a dead peer costs at
//! most connect + call time and then surfaces as a dependency failure.

use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tracing::debug;

use loadgrid_consume::{ConsumeError, ConsumeResult};
use loadgrid_discovery::Instance;

use crate::proto;
use crate::proto::consume_service_client::ConsumeServiceClient;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// One consume call to one peer.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn consume(
        &self,
        target: &Instance,
        request: proto::ConsumeRequest,
    ) -> ConsumeResult<proto::ConsumeResponse>;
}

/// tonic-backed peer transport with bounded connect and call timeouts.
pub struct PeerClient {
    connect_timeout: Duration,
    call_timeout: Duration,
}

impl Default for PeerClient {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

impl PeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeouts(connect_timeout: Duration, call_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            call_timeout,
        }
    }
}

#[async_trait]
impl PeerTransport for PeerClient {
    async fn consume(
        &self,
        target: &Instance,
        request: proto::ConsumeRequest,
    ) -> ConsumeResult<proto::ConsumeResponse> {
        let endpoint = Endpoint::from_shared(format!("http://{target}"))
            .map_err(|e| {
                ConsumeError::InvalidParameter(format!("peer address {target} is not valid: {e}"))
            })?
            .connect_timeout(self.connect_timeout)
            .timeout(self.call_timeout);

        let channel = endpoint.connect().await.map_err(|e| {
            ConsumeError::Dependency(format!("cannot reach peer {target}: {e}"))
        })?;

        debug!(peer = %target, "dispatching sub-request");
        let response = ConsumeServiceClient::new(channel)
            .consume(request)
            .await
            .map_err(|status| {
                ConsumeError::Dependency(format!("peer {target} call failed: {status}"))
            })?;
        Ok(response.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_peer_is_a_bounded_dependency_failure() {
        let client =
            PeerClient::with_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        let target = Instance::new("127.0.0.1", 1);

        let started = std::time::Instant::now();
        let err = client
            .consume(&target, proto::ConsumeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumeError::Dependency(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
