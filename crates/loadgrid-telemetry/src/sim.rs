//! In-memory measurement source for tests.
//!
//! All figures are settable at any time, so a test can move the
//! "measured" usage and watch a control loop react. Values are stored
//! as atomics (f64 bit patterns) so the source can be shared across
//! tasks without locking.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use loadgrid_units::Unit;

use crate::{MeasurementSource, TelemetryResult, UNITS_PER_CORE};

/// A measurement source whose readings are set by the test.
pub struct SimulatedSource {
    total_memory_bytes: AtomicU64,
    used_memory_bytes: AtomicU64,
    total_cpu_units: AtomicI64,
    used_cpu_units: AtomicI64,
    network_bytes_per_sec: AtomicU64,
    storage_bytes_per_sec: AtomicU64,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSource {
    /// 8 GiB of memory, 2 cores, no usage.
    pub fn new() -> Self {
        Self {
            total_memory_bytes: AtomicU64::new((8.0f64 * 1024.0 * 1024.0 * 1024.0).to_bits()),
            used_memory_bytes: AtomicU64::new(0.0f64.to_bits()),
            total_cpu_units: AtomicI64::new(2 * UNITS_PER_CORE),
            used_cpu_units: AtomicI64::new(0),
            network_bytes_per_sec: AtomicU64::new(0.0f64.to_bits()),
            storage_bytes_per_sec: AtomicU64::new(0.0f64.to_bits()),
        }
    }

    pub fn set_total_memory_bytes(&self, bytes: f64) {
        self.total_memory_bytes.store(bytes.to_bits(), Ordering::Relaxed);
    }

    pub fn set_used_memory_bytes(&self, bytes: f64) {
        self.used_memory_bytes.store(bytes.to_bits(), Ordering::Relaxed);
    }

    pub fn set_total_cpu_units(&self, units: i64) {
        self.total_cpu_units.store(units, Ordering::Relaxed);
    }

    pub fn set_used_cpu_units(&self, units: i64) {
        self.used_cpu_units.store(units, Ordering::Relaxed);
    }

    pub fn set_network_bytes_per_sec(&self, rate: f64) {
        self.network_bytes_per_sec.store(rate.to_bits(), Ordering::Relaxed);
    }

    pub fn set_storage_bytes_per_sec(&self, rate: f64) {
        self.storage_bytes_per_sec.store(rate.to_bits(), Ordering::Relaxed);
    }

    fn load_f64(cell: &AtomicU64) -> f64 {
        f64::from_bits(cell.load(Ordering::Relaxed))
    }
}

impl MeasurementSource for SimulatedSource {
    fn used_memory(&self, unit: Unit) -> TelemetryResult<f64> {
        Ok(Unit::Bytes.convert(Self::load_f64(&self.used_memory_bytes), unit)?)
    }

    fn total_memory(&self, unit: Unit) -> TelemetryResult<f64> {
        Ok(Unit::Bytes.convert(Self::load_f64(&self.total_memory_bytes), unit)?)
    }

    fn total_cpu_units(&self) -> TelemetryResult<i64> {
        Ok(self.total_cpu_units.load(Ordering::Relaxed))
    }

    fn used_cpu_units(&self) -> TelemetryResult<i64> {
        Ok(self.used_cpu_units.load(Ordering::Relaxed))
    }

    fn network_rate(&self, unit: Unit) -> TelemetryResult<f64> {
        Ok(Unit::BytesPerSecond.convert(Self::load_f64(&self.network_bytes_per_sec), unit)?)
    }

    fn storage_rate(&self, unit: Unit) -> TelemetryResult<f64> {
        Ok(Unit::BytesPerSecond.convert(Self::load_f64(&self.storage_bytes_per_sec), unit)?)
    }
}
