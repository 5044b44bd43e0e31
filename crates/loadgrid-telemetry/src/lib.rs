//! loadgrid-telemetry — where actual resource usage comes from.
//!
//! The control loops never read the operating system directly; they go
//! through the [`MeasurementSource`] trait so that tests can substitute
//! a [`SimulatedSource`] and production uses the `/proc`-backed
//! [`ProcSource`]. Rates (network, storage) are derived from cumulative
//! kernel counters by background [`RateTracker`] pollers.

pub mod error;
pub mod proc;
pub mod rate;
pub mod sim;

use loadgrid_units::Unit;

pub use error::{TelemetryError, TelemetryResult};
pub use proc::{ProcSource, ProcSourceConfig};
pub use rate::{RateTracker, StatTracker};
pub use sim::SimulatedSource;

/// Scheduling-style CPU units per core, the granularity goals and
/// consumption are expressed in for the CPU control loop.
pub const UNITS_PER_CORE: i64 = 1024;

/// The measurement boundary consumed by the resource actuators.
///
/// Implementations must fail with [`TelemetryError::Unavailable`] when
/// the underlying source is unreachable or returns incomplete data
/// rather than silently reporting zero. The one documented exception:
/// when the online CPU count cannot be determined, assuming a single
/// CPU is safer than refusing to start.
pub trait MeasurementSource: Send + Sync {
    /// Memory currently in use, expressed in `unit` (memory family).
    fn used_memory(&self, unit: Unit) -> TelemetryResult<f64>;

    /// Hard memory capacity, expressed in `unit` (memory family).
    fn total_memory(&self, unit: Unit) -> TelemetryResult<f64>;

    /// Used / total memory as a fraction in `[0, 1]`.
    fn memory_percentage(&self) -> TelemetryResult<f64> {
        let used = self.used_memory(Unit::Bytes)?;
        let total = self.total_memory(Unit::Bytes)?;
        Ok(if total > 0.0 { used / total } else { 0.0 })
    }

    /// Total CPU capacity in CPU units ([`UNITS_PER_CORE`] per core).
    fn total_cpu_units(&self) -> TelemetryResult<i64>;

    /// CPU currently consumed, in CPU units.
    fn used_cpu_units(&self) -> TelemetryResult<i64>;

    /// Used / total CPU as a fraction in `[0, 1]`.
    fn cpu_percentage(&self) -> TelemetryResult<f64> {
        let used = self.used_cpu_units()? as f64;
        let total = self.total_cpu_units()? as f64;
        Ok(if total > 0.0 { used / total } else { 0.0 })
    }

    /// Network transmit rate, expressed in `unit` (rate family).
    fn network_rate(&self, unit: Unit) -> TelemetryResult<f64>;

    /// Storage write rate, expressed in `unit` (rate family).
    fn storage_rate(&self, unit: Unit) -> TelemetryResult<f64>;
}
