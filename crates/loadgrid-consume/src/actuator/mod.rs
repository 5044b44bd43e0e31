//! Resource actuators.
//!
//! An actuator is the resource-specific strategy behind the generic PID
//! loop: it fabricates and retracts load units and reads back goal and
//! actual consumption in its native integer unit. The loop owns the
//! actuator exclusively; the only cross-task surface is the
//! [`TargetControl`] handle, which the request router uses to move
//! targets while a tick is in flight.

pub mod cpu;
pub mod disk;
pub mod memory;
pub mod network;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use loadgrid_units::Unit;

use crate::{ConsumeError, ConsumeResult, Resource};

/// Thread-safe target view of a running consumer. Values pass through
/// the unit converter at this boundary; internally each actuator stores
/// its target in one canonical unit.
pub trait TargetControl: Send + Sync {
    fn resource(&self) -> Resource;

    /// The unit summaries are reported in when the caller names none.
    fn default_unit(&self) -> Unit;

    fn is_unit_allowed(&self, unit: Unit) -> bool;

    /// Set the goal. Rejects units outside the resource's family and
    /// negative values, leaving the prior target unchanged.
    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()>;

    /// The current goal, expressed in `unit`.
    fn target(&self, unit: Unit) -> ConsumeResult<f64>;

    /// The live measured consumption, expressed in `unit`.
    fn actual(&self, unit: Unit) -> ConsumeResult<f64>;
}

/// Loop-side interface: everything the PID engine needs from a resource.
#[async_trait]
pub trait Actuator: Send + 'static {
    fn resource(&self) -> Resource;

    /// The shared handle used by the router for target mutation.
    fn control(&self) -> Arc<dyn TargetControl>;

    /// Goal in the actuator's native integer unit.
    fn goal(&self) -> ConsumeResult<i64>;

    /// Measured consumption in the same unit as [`Actuator::goal`].
    fn consumed(&self) -> ConsumeResult<i64>;

    /// Create `n` load units.
    fn generate(&mut self, n: u64) -> ConsumeResult<()>;

    /// Destroy up to `n` load units. A no-op past zero load.
    fn destroy(&mut self, n: u64);

    /// Count of currently-active load units.
    fn load(&self) -> usize;

    /// Release every outstanding load resource (threads, buffers,
    /// files, sockets). Called exactly once, on cancellation, and
    /// returns only after the release is complete: background tasks
    /// joined, files removed, sockets closed.
    async fn teardown(&mut self);
}

/// Lock-free f64 cell for targets: written by `set_target`, read by the
/// control loop mid-tick.
pub(crate) struct TargetCell(AtomicU64);

impl TargetCell {
    pub(crate) fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

pub(crate) fn ensure_unit_allowed(
    resource: Resource,
    allowed: bool,
    unit: Unit,
) -> ConsumeResult<()> {
    if allowed {
        Ok(())
    } else {
        Err(ConsumeError::InvalidParameter(format!(
            "unit {unit:?} is not valid for the {resource} consumer"
        )))
    }
}

pub(crate) fn ensure_non_negative(resource: Resource, value: f64) -> ConsumeResult<()> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConsumeError::InvalidParameter(format!(
            "target for the {resource} consumer must be a non-negative number, got {value}"
        )))
    }
}
