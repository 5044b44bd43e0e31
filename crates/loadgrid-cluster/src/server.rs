//! The gRPC server assembly.
//!
//! Thin tonic layer over the handler: every RPC goes through `capture`,
//! so classified failures come back in the response body and the
//! transport only ever sees well-formed responses.

use std::net::SocketAddr;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tokio::sync::watch;
use tracing::info;

use crate::proto;
use crate::proto::consume_service_server::{ConsumeService, ConsumeServiceServer};
use crate::router::ConsumeHandler;
use crate::capture;

pub struct ConsumeServer {
    handler: Arc<ConsumeHandler>,
}

impl ConsumeServer {
    pub fn new(handler: Arc<ConsumeHandler>) -> Self {
        Self { handler }
    }

    /// Get the tonic service for mounting on a gRPC server.
    pub fn into_service(self) -> ConsumeServiceServer<Self> {
        ConsumeServiceServer::new(self)
    }

    /// Bind and serve until the shutdown channel fires.
    pub async fn serve(
        self,
        addr: SocketAddr,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        info!(%addr, "consume service listening");
        tonic::transport::Server::builder()
            .add_service(self.into_service())
            .serve_with_shutdown(addr, async move {
                let _ = shutdown.changed().await;
                info!("consume service shutting down");
            })
            .await?;
        Ok(())
    }
}

#[tonic::async_trait]
impl ConsumeService for ConsumeServer {
    async fn consume(
        &self,
        request: Request<proto::ConsumeRequest>,
    ) -> Result<Response<proto::ConsumeResponse>, Status> {
        let req = request.into_inner();
        let summary = format!("candidate={} usage={}", req.candidate, req.usage.len());
        let handler = self.handler.clone();
        let response = capture::capture("consume", &summary, handler.handle(req)).await;
        Ok(Response::new(response))
    }

    async fn describe_endpoint(
        &self,
        _request: Request<proto::DescribeEndpointRequest>,
    ) -> Result<Response<proto::DescribeEndpointResponse>, Status> {
        Ok(Response::new(proto::DescribeEndpointResponse {}))
    }
}
