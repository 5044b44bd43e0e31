//! Network actuator: duplex TCP traffic between fleet members.
//!
//! Load units are payload bytes per transmission. The actuator listens
//! for inbound connections and pushes one payload to each connected
//! peer per transmit period (at least one byte, so idle connections
//! stay verifiably alive). A connector task periodically re-resolves
//! the peer set through discovery and keeps one outbound drain
//! connection per peer, so traffic flows in both directions across the
//! fleet. Consumption is the measured transmit rate from telemetry.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use loadgrid_discovery::{Instance, PeerDiscovery};
use loadgrid_telemetry::MeasurementSource;
use loadgrid_units::{Unit, UnitFamily};

use super::{Actuator, TargetCell, TargetControl, ensure_non_negative, ensure_unit_allowed};
use crate::{ConsumeError, ConsumeResult, Resource};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_BUFFER: usize = 64 * 1024;

#[derive(Clone)]
pub struct NetworkActuatorConfig {
    /// Listen port for inbound load connections. Zero picks an
    /// ephemeral port, which tests rely on.
    pub listen_port: u16,
    /// How often each connection receives one payload.
    pub transmit_period: Duration,
    /// How often the peer set is re-resolved.
    pub connect_period: Duration,
}

impl Default for NetworkActuatorConfig {
    fn default() -> Self {
        Self {
            listen_port: 9876,
            transmit_period: Duration::from_millis(500),
            connect_period: Duration::from_secs(60),
        }
    }
}

struct NetworkShared {
    /// Canonical target storage, kilobytes per second.
    target: TargetCell,
    source: Arc<dyn MeasurementSource>,
    /// Payload bytes per transmission.
    payload: AtomicI64,
}

struct NetworkControl(Arc<NetworkShared>);

impl TargetControl for NetworkControl {
    fn resource(&self) -> Resource {
        Resource::Network
    }

    fn default_unit(&self) -> Unit {
        Unit::KilobytesPerSecond
    }

    fn is_unit_allowed(&self, unit: Unit) -> bool {
        unit.family() == UnitFamily::Rate
    }

    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()> {
        ensure_unit_allowed(Resource::Network, self.is_unit_allowed(unit), unit)?;
        ensure_non_negative(Resource::Network, value)?;
        self.0
            .target
            .set(unit.convert(value, Unit::KilobytesPerSecond)?);
        Ok(())
    }

    fn target(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Network, self.is_unit_allowed(unit), unit)?;
        Ok(Unit::KilobytesPerSecond.convert(self.0.target.get(), unit)?)
    }

    fn actual(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Network, self.is_unit_allowed(unit), unit)?;
        Ok(self.0.source.network_rate(unit)?)
    }
}

pub struct NetworkActuator {
    shared: Arc<NetworkShared>,
    control: Arc<NetworkControl>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    port: u16,
}

impl NetworkActuator {
    /// Bind the listener and spawn the acceptor and connector tasks.
    pub async fn spawn(
        source: Arc<dyn MeasurementSource>,
        discovery: Arc<dyn PeerDiscovery>,
        config: NetworkActuatorConfig,
    ) -> ConsumeResult<Self> {
        let listener = TcpListener::bind(("0.0.0.0", config.listen_port))
            .await
            .map_err(|e| {
                ConsumeError::Internal(format!(
                    "cannot bind network load listener on port {}: {e}",
                    config.listen_port
                ))
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| ConsumeError::Internal(format!("listener has no local address: {e}")))?
            .port();
        info!(port, "network load listener bound");

        let shared = Arc::new(NetworkShared {
            target: TargetCell::new(0.0),
            source,
            payload: AtomicI64::new(0),
        });
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(acceptor_task(
                listener,
                shared.clone(),
                config.transmit_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(connector_task(
                discovery,
                config.connect_period,
                shutdown.subscribe(),
            )),
        ];

        let control = Arc::new(NetworkControl(shared.clone()));
        Ok(Self {
            shared,
            control,
            shutdown,
            tasks,
            port,
        })
    }

    /// The bound listen port, resolved even when zero was requested.
    pub fn port(&self) -> u16 {
        self.port
    }
}

async fn acceptor_task(
    listener: TcpListener,
    shared: Arc<NetworkShared>,
    transmit_period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(%peer, "inbound load connection");
                    connections.spawn(transmit_task(
                        stream,
                        shared.clone(),
                        transmit_period,
                        stop.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = stop.changed() => break,
        }
    }
    // Closes every accepted socket before the acceptor exits, so
    // teardown's join covers the per-connection tasks too.
    connections.shutdown().await;
    debug!("network acceptor stopped");
}

/// Push one payload per period to a single connection until it drops.
async fn transmit_task(
    mut stream: TcpStream,
    shared: Arc<NetworkShared>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut buffer = Vec::new();
    loop {
        // At least one byte per period keeps the connection observable.
        let payload = shared.payload.load(Ordering::Relaxed).max(1) as usize;
        buffer.resize(payload, 0);
        rand::thread_rng().fill_bytes(&mut buffer);
        if let Err(e) = stream.write_all(&buffer).await {
            debug!(error = %e, "load connection dropped");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }
    }
}

/// Keep one outbound drain connection per discovered peer.
async fn connector_task(
    discovery: Arc<dyn PeerDiscovery>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut drains: HashMap<Instance, JoinHandle<()>> = HashMap::new();
    loop {
        drains.retain(|_, task| !task.is_finished());

        match discovery.resolve_peers().await {
            Ok(peers) => {
                for peer in peers {
                    if drains.contains_key(&peer) {
                        continue;
                    }
                    let address = peer.to_string();
                    match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&address)).await
                    {
                        Ok(Ok(stream)) => {
                            debug!(peer = %address, "outbound load connection established");
                            drains.insert(peer, tokio::spawn(drain_task(stream, stop.clone())));
                        }
                        Ok(Err(e)) => debug!(peer = %address, error = %e, "peer connect failed"),
                        Err(_) => debug!(peer = %address, "peer connect timed out"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "peer resolution failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }
    }
    for (_, task) in drains.drain() {
        task.abort();
        let _ = task.await;
    }
    debug!("network connector stopped");
}

/// Read and discard whatever the peer sends.
async fn drain_task(mut stream: TcpStream, mut stop: watch::Receiver<bool>) {
    let mut buffer = vec![0u8; DRAIN_BUFFER];
    loop {
        tokio::select! {
            read = stream.read(&mut buffer) => match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(error = %e, "drain connection dropped");
                    break;
                }
            },
            _ = stop.changed() => break,
        }
    }
}

#[async_trait]
impl Actuator for NetworkActuator {
    fn resource(&self) -> Resource {
        Resource::Network
    }

    fn control(&self) -> Arc<dyn TargetControl> {
        self.control.clone()
    }

    fn goal(&self) -> ConsumeResult<i64> {
        Ok(self.shared.target.get().round() as i64)
    }

    fn consumed(&self) -> ConsumeResult<i64> {
        Ok(self
            .shared
            .source
            .network_rate(Unit::KilobytesPerSecond)?
            .round() as i64)
    }

    fn generate(&mut self, n: u64) -> ConsumeResult<()> {
        self.shared.payload.fetch_add(n as i64, Ordering::Relaxed);
        Ok(())
    }

    fn destroy(&mut self, n: u64) {
        let _ = self
            .shared
            .payload
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((cur - n as i64).max(0))
            });
    }

    fn load(&self) -> usize {
        self.shared.payload.load(Ordering::Relaxed).max(0) as usize
    }

    async fn teardown(&mut self) {
        self.shared.payload.store(0, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
        // The listener and every peer socket are owned by these tasks;
        // joining them guarantees the ports are released on return.
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgrid_discovery::StaticDiscovery;
    use loadgrid_telemetry::SimulatedSource;

    fn fast_config() -> NetworkActuatorConfig {
        NetworkActuatorConfig {
            listen_port: 0,
            transmit_period: Duration::from_millis(10),
            connect_period: Duration::from_millis(10),
        }
    }

    fn no_peers() -> Arc<dyn PeerDiscovery> {
        Arc::new(StaticDiscovery::new(Vec::new()))
    }

    #[tokio::test]
    async fn targets_accept_only_rate_units() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = NetworkActuator::spawn(sim, no_peers(), fast_config())
            .await
            .unwrap();
        let control = actuator.control();

        control.set_target(1.0, Unit::MegabytesPerSecond).unwrap();
        assert_eq!(control.target(Unit::KilobytesPerSecond).unwrap(), 1024.0);
        assert!(control.set_target(1.0, Unit::Percentage).is_err());
        assert!(control.set_target(1.0, Unit::Gigabytes).is_err());
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn consumed_reads_the_transmit_rate() {
        let sim = Arc::new(SimulatedSource::new());
        sim.set_network_bytes_per_sec(8.0 * 1024.0);
        let mut actuator = NetworkActuator::spawn(sim, no_peers(), fast_config())
            .await
            .unwrap();

        assert_eq!(actuator.consumed().unwrap(), 8);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn inbound_connections_receive_payloads() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = NetworkActuator::spawn(sim, no_peers(), fast_config())
            .await
            .unwrap();
        actuator.generate(1024).unwrap();

        let mut conn = TcpStream::connect(("127.0.0.1", actuator.port()))
            .await
            .unwrap();
        let mut buffer = vec![0u8; 4096];
        let read = tokio::time::timeout(Duration::from_secs(2), conn.read(&mut buffer))
            .await
            .expect("no payload arrived")
            .unwrap();
        assert!(read > 0);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn connector_dials_discovered_peers() {
        let peer_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let peer_port = peer_listener.local_addr().unwrap().port();
        let discovery = Arc::new(StaticDiscovery::new(vec![Instance {
            address: "127.0.0.1".to_string(),
            port: peer_port,
        }]));

        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = NetworkActuator::spawn(sim, discovery, fast_config())
            .await
            .unwrap();

        let accepted = tokio::time::timeout(Duration::from_secs(2), peer_listener.accept())
            .await
            .expect("no outbound connection arrived");
        assert!(accepted.is_ok());
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn generate_and_destroy_track_payload_bytes() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = NetworkActuator::spawn(sim, no_peers(), fast_config())
            .await
            .unwrap();

        actuator.generate(2048).unwrap();
        assert_eq!(actuator.load(), 2048);
        actuator.destroy(48);
        assert_eq!(actuator.load(), 2000);
        actuator.destroy(1 << 30);
        assert_eq!(actuator.load(), 0);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn teardown_releases_the_listen_port_before_returning() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = NetworkActuator::spawn(sim, no_peers(), fast_config())
            .await
            .unwrap();
        let port = actuator.port();

        // An open connection keeps a transmit task alive through the
        // shutdown, so the join has real work to wait for.
        let _conn = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        actuator.teardown().await;

        let rebound = TcpListener::bind(("0.0.0.0", port)).await;
        assert!(rebound.is_ok(), "listen port still held after teardown");
    }
}
