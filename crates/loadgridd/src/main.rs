//! loadgridd — the LoadGrid daemon.
//!
//! Single binary that assembles the whole instance:
//! - `/proc`-backed telemetry
//! - Peer discovery (static list or DNS, TTL-cached)
//! - PID control loops, one per enabled resource
//! - The fleet consume service (gRPC)
//!
//! # Usage
//!
//! ```text
//! loadgridd serve --port 9090 --peers 10.0.0.2:9090,10.0.0.3:9090
//! loadgridd serve --port 9090 --dns-name loadgrid.fleet.internal
//! loadgridd check --port 9090
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use loadgrid_cluster::{ConsumeHandler, ConsumeServer, PeerClient, PeerTransport, proto};
use loadgrid_consume::{
    CpuActuator, CpuActuatorConfig, DiskActuator, DiskActuatorConfig, MemoryActuator,
    MemoryActuatorConfig, NetworkActuator, NetworkActuatorConfig, PidConfig, Resource, Workflow,
};
use loadgrid_discovery::{
    CachedDiscovery, DnsDiscovery, Instance, PeerDiscovery, StaticDiscovery,
};
use loadgrid_telemetry::{MeasurementSource, ProcSource, ProcSourceConfig};

#[derive(Parser)]
#[command(name = "loadgridd", about = "LoadGrid load-generation daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control loops and the fleet consume service.
    Serve {
        /// gRPC port for the consume service.
        #[arg(long, default_value = "9090")]
        port: u16,

        /// Listen port for network load connections.
        #[arg(long, default_value = "9876")]
        network_port: u16,

        /// Control loop period in milliseconds.
        #[arg(long, default_value = "1000")]
        pace_ms: u64,

        /// PID proportional gain.
        #[arg(long, default_value = "0.333")]
        proportion: f64,

        /// PID derivative gain.
        #[arg(long, default_value = "0.333")]
        derivative: f64,

        /// PID integral gain.
        #[arg(long, default_value = "0.333")]
        integral: f64,

        /// Integral damping factor per tick.
        #[arg(long, default_value = "0.95")]
        decay: f64,

        /// Fixed fleet members as host:port, comma separated.
        #[arg(long, value_delimiter = ',')]
        peers: Vec<String>,

        /// DNS name publishing fleet A records. Alternative to --peers.
        #[arg(long, conflicts_with = "peers")]
        dns_name: Option<String>,

        /// Resources to run control loops for.
        #[arg(long, value_delimiter = ',', default_value = "cpu,memory,disk,network")]
        resources: Vec<String>,

        /// Address other fleet members reach this instance at.
        /// Defaults to the kernel hostname.
        #[arg(long)]
        advertise_address: Option<String>,
    },

    /// Probe the local consume service and exit non-zero when the
    /// fleet reports errors. Intended as the container health check.
    Check {
        /// gRPC port of the local consume service.
        #[arg(long, default_value = "9090")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,loadgridd=debug,loadgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            port,
            network_port,
            pace_ms,
            proportion,
            derivative,
            integral,
            decay,
            peers,
            dns_name,
            resources,
            advertise_address,
        } => {
            let pid = PidConfig {
                pace: Duration::from_millis(pace_ms),
                proportion,
                derivative,
                integral,
                decay,
            };
            pid.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

            let resources = resources
                .iter()
                .map(|s| s.parse::<Resource>().map_err(|e| anyhow::anyhow!("{e}")))
                .collect::<anyhow::Result<Vec<_>>>()?;

            run_serve(ServeConfig {
                port,
                network_port,
                pid,
                peers,
                dns_name,
                resources,
                advertise_address,
            })
            .await
        }
        Command::Check { port } => run_check(port).await,
    }
}

struct ServeConfig {
    port: u16,
    network_port: u16,
    pid: PidConfig,
    peers: Vec<String>,
    dns_name: Option<String>,
    resources: Vec<Resource>,
    advertise_address: Option<String>,
}

async fn run_serve(config: ServeConfig) -> anyhow::Result<()> {
    info!("LoadGrid daemon starting");

    // ── Telemetry ──────────────────────────────────────────────

    let source: Arc<dyn MeasurementSource> =
        Arc::new(ProcSource::spawn(ProcSourceConfig::default())?);
    info!("proc telemetry started");

    // ── Discovery ──────────────────────────────────────────────

    let discovery: Arc<dyn PeerDiscovery> = match &config.dns_name {
        Some(name) => {
            info!(%name, "using DNS peer discovery");
            Arc::new(CachedDiscovery::new(DnsDiscovery::new(name, config.port)))
        }
        None => {
            let peers = config
                .peers
                .iter()
                .map(|s| parse_peer(s))
                .collect::<anyhow::Result<Vec<_>>>()?;
            info!(peers = peers.len(), "using static peer list");
            Arc::new(CachedDiscovery::new(StaticDiscovery::new(peers)))
        }
    };

    let advertise = match config.advertise_address {
        Some(addr) => addr,
        None => local_hostname(),
    };
    let self_instance = Instance::new(advertise, config.port);
    info!(instance = %self_instance, "advertising");

    // ── Control loops ──────────────────────────────────────────

    let workflow = Arc::new(Workflow::new());
    for resource in &config.resources {
        let actuator: Box<dyn loadgrid_consume::Actuator> = match resource {
            Resource::Cpu => Box::new(CpuActuator::new(
                source.clone(),
                CpuActuatorConfig::default(),
            )),
            Resource::Memory => Box::new(MemoryActuator::new(
                source.clone(),
                MemoryActuatorConfig::default(),
            )),
            Resource::Disk => Box::new(
                DiskActuator::spawn(source.clone(), DiskActuatorConfig::default())
                    .map_err(|e| anyhow::anyhow!("{e}"))?,
            ),
            Resource::Network => Box::new(
                NetworkActuator::spawn(
                    source.clone(),
                    discovery.clone(),
                    NetworkActuatorConfig {
                        listen_port: config.network_port,
                        ..NetworkActuatorConfig::default()
                    },
                )
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?,
            ),
        };
        workflow
            .start(actuator, config.pid.clone())
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    info!(loops = config.resources.len(), "control loops started");

    // ── Consume service ────────────────────────────────────────

    let handler = Arc::new(ConsumeHandler::new(
        workflow.clone(),
        discovery,
        Arc::new(PeerClient::new()),
        self_instance,
    ));
    let server = ConsumeServer::new(handler);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.serve(addr, shutdown_rx).await?;

    workflow
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    info!("LoadGrid daemon stopped");
    Ok(())
}

/// One fleet-wide consume with no usage changes: healthy when the
/// merged response carries no error entries.
async fn run_check(port: u16) -> anyhow::Result<()> {
    let target = Instance::new("127.0.0.1", port);
    let request = proto::ConsumeRequest {
        candidate: proto::Candidate::All as i32,
        usage: Vec::new(),
        host: String::new(),
        port: 0,
    };

    let response = PeerClient::new()
        .consume(&target, request)
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    if response.errors.is_empty() {
        info!(instances = response.instances.len(), "fleet healthy");
        Ok(())
    } else {
        for error in &response.errors {
            warn!(code = error.code, message = %error.message, "fleet error");
        }
        anyhow::bail!("{} fleet error(s) reported", response.errors.len())
    }
}

fn parse_peer(s: &str) -> anyhow::Result<Instance> {
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!("peer \"{s}\" is not host:port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow::anyhow!("peer \"{s}\" has an invalid port"))?;
    if host.is_empty() {
        anyhow::bail!("peer \"{s}\" has an empty host");
    }
    Ok(Instance::new(host, port))
}

/// The kernel hostname, used as the advertise address when none is
/// configured. Falls back to loopback so a misconfigured instance still
/// starts and logs the problem.
fn local_hostname() -> String {
    match std::fs::read_to_string("/proc/sys/kernel/hostname") {
        Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
        _ => {
            warn!("cannot determine hostname, advertising 127.0.0.1");
            "127.0.0.1".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peers_parse_as_host_port() {
        assert_eq!(
            parse_peer("10.0.0.2:9090").unwrap(),
            Instance::new("10.0.0.2", 9090)
        );
        assert!(parse_peer("10.0.0.2").is_err());
        assert!(parse_peer(":9090").is_err());
        assert!(parse_peer("10.0.0.2:notaport").is_err());
    }
}
