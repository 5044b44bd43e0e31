//! Telemetry error types.

use thiserror::Error;

/// Errors from reading system measurements.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The underlying metrics source is unreachable or returned
    /// incomplete data. Classified as a dependency failure upstream.
    #[error("measurement source unavailable: {0}")]
    Unavailable(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: String, detail: String },

    #[error(transparent)]
    Unit(#[from] loadgrid_units::UnitError),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
