//! loadgrid-cluster — the fleet-facing gRPC surface.
//!
//! One `ConsumeService` RPC carries every interaction: a client names a
//! candidate set (self, a random peer, a specific peer, or the whole
//! fleet) and a list of resource targets, and gets back the post-apply
//! state of every instance touched plus any classified errors.
//!
//! ```text
//! ConsumeServer (gRPC)
//!   └── capture            error classification + request logging
//!       └── ConsumeHandler
//!           ├── resolver   candidate → concrete instances
//!           ├── local      apply targets via Workflow controls
//!           └── PeerClient one-hop SELF sub-requests to peers
//! ```

pub mod capture;
pub mod client;
pub mod convert;
pub mod resolver;
pub mod router;
pub mod server;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("loadgrid.v1");
}

pub use capture::{capture, classify};
pub use client::{PeerClient, PeerTransport};
pub use router::ConsumeHandler;
pub use server::ConsumeServer;
