//! The error-capture boundary between the handler and the RPC layer.
//!
//! Every classified failure becomes a well-formed `ConsumeResponse`
//! carrying an `Error` entry, so clients always get a response body to
//! inspect rather than a transport fault. Each request is logged under
//! a generated id at start and at either outcome.

use std::future::Future;

use loadgrid_consume::ConsumeError;
use tracing::{info, warn};

use crate::proto;

/// Map a failure to the wire error code.
pub fn classify(error: &ConsumeError) -> proto::ErrorCode {
    match error {
        ConsumeError::InvalidParameter(_) => proto::ErrorCode::InvalidParameter,
        ConsumeError::Client(_) => proto::ErrorCode::ClientFailure,
        ConsumeError::Dependency(_) => proto::ErrorCode::DependencyFailure,
        ConsumeError::Internal(_) => proto::ErrorCode::InternalFailure,
    }
}

pub fn error_entry(error: &ConsumeError) -> proto::Error {
    proto::Error {
        code: classify(error) as i32,
        message: error.to_string(),
    }
}

/// Run one handler future under request logging, folding any failure
/// into the response body. The future runs on its own task so that a
/// panic surfaces here as an UNKNOWN error entry instead of poisoning
/// the connection.
pub async fn capture<F>(operation: &str, summary: &str, fut: F) -> proto::ConsumeResponse
where
    F: Future<Output = Result<proto::ConsumeResponse, ConsumeError>> + Send + 'static,
{
    let request_id = format!("{:016x}", rand::random::<u64>());
    info!(%request_id, operation, summary, "request received");

    match tokio::spawn(fut).await {
        Ok(Ok(response)) => {
            info!(
                %request_id,
                operation,
                instances = response.instances.len(),
                errors = response.errors.len(),
                "request completed"
            );
            response
        }
        Ok(Err(e)) => {
            warn!(%request_id, operation, error = %e, "request failed");
            proto::ConsumeResponse {
                instances: Vec::new(),
                errors: vec![error_entry(&e)],
            }
        }
        Err(e) => {
            warn!(%request_id, operation, error = %e, "request handler crashed");
            proto::ConsumeResponse {
                instances: Vec::new(),
                errors: vec![proto::Error {
                    code: proto::ErrorCode::Unknown as i32,
                    message: format!("request handler crashed: {e}"),
                }],
            }
        }
    }
}
