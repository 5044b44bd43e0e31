//! The consume error taxonomy.
//!
//! Variants mirror the error codes clients see on the wire: bad caller
//! input, caller misuse of a lower-level client, a failed external
//! collaborator, or a broken invariant inside this service. The
//! boundary layers of neighboring crates fold their errors in via the
//! `From` impls so classification happens once, at the RPC edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Bad or missing caller input.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Caller misuse of a lower-level client.
    #[error("client failure: {0}")]
    Client(String),

    /// A required external collaborator failed or was unreachable.
    #[error("dependency failure: {0}")]
    Dependency(String),

    /// An invariant violation inside this service.
    #[error("internal failure: {0}")]
    Internal(String),
}

pub type ConsumeResult<T> = Result<T, ConsumeError>;

impl From<loadgrid_units::UnitError> for ConsumeError {
    fn from(e: loadgrid_units::UnitError) -> Self {
        ConsumeError::InvalidParameter(e.to_string())
    }
}

impl From<loadgrid_telemetry::TelemetryError> for ConsumeError {
    fn from(e: loadgrid_telemetry::TelemetryError) -> Self {
        ConsumeError::Dependency(e.to_string())
    }
}

impl From<loadgrid_discovery::DiscoveryError> for ConsumeError {
    fn from(e: loadgrid_discovery::DiscoveryError) -> Self {
        ConsumeError::Dependency(e.to_string())
    }
}
