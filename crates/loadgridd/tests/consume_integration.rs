//! End-to-end: in-process consume service plus a real gRPC client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use loadgrid_cluster::proto;
use loadgrid_cluster::proto::consume_service_client::ConsumeServiceClient;
use loadgrid_cluster::{ConsumeHandler, ConsumeServer, PeerClient, PeerTransport};
use loadgrid_consume::{MemoryActuator, MemoryActuatorConfig, PidConfig, Workflow};
use loadgrid_discovery::{Instance, StaticDiscovery};
use loadgrid_telemetry::SimulatedSource;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

async fn connect(port: u16) -> ConsumeServiceClient<tonic::transport::Channel> {
    for _ in 0..50 {
        if let Ok(client) =
            ConsumeServiceClient::connect(format!("http://127.0.0.1:{port}")).await
        {
            return client;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("consume service did not come up on port {port}");
}

#[tokio::test]
async fn consume_round_trip_over_grpc() {
    let port = free_port();
    let sim = Arc::new(SimulatedSource::new());
    sim.set_total_memory_bytes(4.0 * GIB);
    sim.set_used_memory_bytes(GIB);

    let workflow = Arc::new(Workflow::new());
    workflow
        .start(
            Box::new(MemoryActuator::new(
                sim,
                MemoryActuatorConfig {
                    buffer_bytes: 4096,
                    initial_target: 0.0,
                },
            )),
            PidConfig::default(),
        )
        .unwrap();

    let handler = Arc::new(ConsumeHandler::new(
        workflow.clone(),
        Arc::new(StaticDiscovery::new(Vec::new())),
        Arc::new(PeerClient::new()),
        Instance::new("127.0.0.1", port),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let server = tokio::spawn(ConsumeServer::new(handler).serve(addr, shutdown_rx));

    let mut client = connect(port).await;

    // Apply a memory target to self and read back the summary.
    let response = client
        .consume(proto::ConsumeRequest {
            candidate: proto::Candidate::Self_ as i32,
            usage: vec![proto::UsageSpec {
                resource: proto::Resource::Memory as i32,
                unit: proto::Unit::Percentage as i32,
                target: 0.5,
                actual: 0.0,
            }],
            host: String::new(),
            port: 0,
        })
        .await
        .unwrap()
        .into_inner();

    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(response.instances.len(), 1);
    let instance = &response.instances[0];
    assert_eq!(instance.host, "127.0.0.1");
    let usage = &instance.usage[0];
    assert_eq!(usage.resource, proto::Resource::Memory as i32);
    assert_eq!(usage.target, 0.5);
    assert_eq!(usage.actual, 0.25);

    // A classified failure still comes back as a response body, not a
    // transport fault: RANDOM with no peers is a dependency failure.
    let response = client
        .consume(proto::ConsumeRequest {
            candidate: proto::Candidate::Random as i32,
            usage: Vec::new(),
            host: String::new(),
            port: 0,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(response.instances.is_empty());
    assert_eq!(
        response.errors[0].code,
        proto::ErrorCode::DependencyFailure as i32
    );

    // Reserved endpoint metadata RPC answers empty.
    client
        .describe_endpoint(proto::DescribeEndpointRequest {})
        .await
        .unwrap();

    let _ = shutdown_tx.send(true);
    server.await.unwrap().unwrap();
    workflow.shutdown().await.unwrap();
}

/// The health probe semantics: one ALL consume with no usage changes,
/// healthy exactly when the merged response carries no errors.
#[tokio::test]
async fn health_probe_reflects_fleet_errors() {
    let probe_request = || proto::ConsumeRequest {
        candidate: proto::Candidate::All as i32,
        usage: Vec::new(),
        host: String::new(),
        port: 0,
    };

    // Healthy fleet: no peers, ALL degrades to self, zero errors.
    let port = free_port();
    let workflow = Arc::new(Workflow::new());
    workflow
        .start(
            Box::new(MemoryActuator::new(
                Arc::new(SimulatedSource::new()),
                MemoryActuatorConfig {
                    buffer_bytes: 4096,
                    initial_target: 0.0,
                },
            )),
            PidConfig::default(),
        )
        .unwrap();
    let handler = Arc::new(ConsumeHandler::new(
        workflow.clone(),
        Arc::new(StaticDiscovery::new(Vec::new())),
        Arc::new(PeerClient::new()),
        Instance::new("127.0.0.1", port),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let server = tokio::spawn(ConsumeServer::new(handler).serve(addr, shutdown_rx));
    connect(port).await;

    let response = PeerClient::new()
        .consume(&Instance::new("127.0.0.1", port), probe_request())
        .await
        .unwrap();
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    assert_eq!(response.instances.len(), 1);

    let _ = shutdown_tx.send(true);
    server.await.unwrap().unwrap();
    workflow.shutdown().await.unwrap();

    // Degraded fleet: discovery names an unreachable peer, so the same
    // probe comes back with error entries.
    let port = free_port();
    let workflow = Arc::new(Workflow::new());
    let handler = Arc::new(ConsumeHandler::new(
        workflow.clone(),
        Arc::new(StaticDiscovery::new(vec![Instance::new("127.0.0.1", 1)])),
        Arc::new(PeerClient::with_timeouts(
            Duration::from_millis(200),
            Duration::from_millis(200),
        )),
        Instance::new("127.0.0.1", port),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let server = tokio::spawn(ConsumeServer::new(handler).serve(addr, shutdown_rx));
    connect(port).await;

    let response = PeerClient::new()
        .consume(&Instance::new("127.0.0.1", port), probe_request())
        .await
        .unwrap();
    assert!(!response.errors.is_empty());

    let _ = shutdown_tx.send(true);
    server.await.unwrap().unwrap();
    workflow.shutdown().await.unwrap();
}
