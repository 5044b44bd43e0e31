//! CPU actuator: a pool of busy-loop worker threads.
//!
//! Load units are abstract "slices" tracked in a shared counter. Every
//! worker thread spins through `busy_per_load * load` iterations of
//! arithmetic per cycle and then yields for the worker period, so the
//! busy fraction of each cycle scales with the load count and the PID
//! loop can steer measured CPU usage toward the goal.
//!
//! The goal and consumption are exchanged with the engine in CPU units
//! (1024 per core); the stored target is a fraction of total capacity.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use loadgrid_telemetry::{MeasurementSource, UNITS_PER_CORE};
use loadgrid_units::Unit;

use super::{Actuator, TargetCell, TargetControl, ensure_non_negative, ensure_unit_allowed};
use crate::{ConsumeResult, Resource};

#[derive(Clone)]
pub struct CpuActuatorConfig {
    /// Number of worker threads. Defaults to the online core count.
    pub workers: usize,
    /// Sleep inserted between busy cycles.
    pub worker_period: Duration,
    /// Spin iterations contributed by each load unit per cycle.
    pub busy_per_load: u64,
    /// Starting target as a fraction of total capacity.
    pub initial_target: f64,
}

impl Default for CpuActuatorConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            worker_period: Duration::from_millis(10),
            busy_per_load: 5_000,
            initial_target: 0.0,
        }
    }
}

struct CpuShared {
    /// Target as a fraction of total CPU capacity.
    target: TargetCell,
    source: Arc<dyn MeasurementSource>,
    load: AtomicU64,
    stop: AtomicBool,
}

struct CpuControl(Arc<CpuShared>);

impl TargetControl for CpuControl {
    fn resource(&self) -> Resource {
        Resource::Cpu
    }

    fn default_unit(&self) -> Unit {
        Unit::Percentage
    }

    fn is_unit_allowed(&self, unit: Unit) -> bool {
        matches!(unit, Unit::Percentage | Unit::Vcpu)
    }

    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()> {
        ensure_unit_allowed(Resource::Cpu, self.is_unit_allowed(unit), unit)?;
        ensure_non_negative(Resource::Cpu, value)?;
        let fraction = match unit {
            Unit::Percentage => value,
            _ => {
                let total = self.0.source.total_cpu_units()? as f64;
                if total > 0.0 {
                    value * UNITS_PER_CORE as f64 / total
                } else {
                    0.0
                }
            }
        };
        self.0.target.set(fraction);
        Ok(())
    }

    fn target(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Cpu, self.is_unit_allowed(unit), unit)?;
        let fraction = self.0.target.get();
        match unit {
            Unit::Percentage => Ok(fraction),
            _ => {
                let total = self.0.source.total_cpu_units()? as f64;
                Ok(fraction * total / UNITS_PER_CORE as f64)
            }
        }
    }

    fn actual(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Cpu, self.is_unit_allowed(unit), unit)?;
        match unit {
            Unit::Percentage => Ok(self.0.source.cpu_percentage()?),
            _ => Ok(self.0.source.used_cpu_units()? as f64 / UNITS_PER_CORE as f64),
        }
    }
}

pub struct CpuActuator {
    shared: Arc<CpuShared>,
    control: Arc<CpuControl>,
    workers: Vec<JoinHandle<()>>,
}

impl CpuActuator {
    pub fn new(source: Arc<dyn MeasurementSource>, config: CpuActuatorConfig) -> Self {
        let shared = Arc::new(CpuShared {
            target: TargetCell::new(config.initial_target),
            source,
            load: AtomicU64::new(0),
            stop: AtomicBool::new(false),
        });

        let workers = (0..config.workers.max(1))
            .map(|i| {
                let shared = shared.clone();
                let period = config.worker_period;
                let busy_per_load = config.busy_per_load;
                std::thread::Builder::new()
                    .name(format!("cpu-load-{i}"))
                    .spawn(move || busy_worker(shared, period, busy_per_load))
                    .expect("failed to spawn cpu worker thread")
            })
            .collect();

        let control = Arc::new(CpuControl(shared.clone()));
        Self {
            shared,
            control,
            workers,
        }
    }
}

fn busy_worker(shared: Arc<CpuShared>, period: Duration, busy_per_load: u64) {
    let mut acc = 1u64;
    while !shared.stop.load(Ordering::Relaxed) {
        let load = shared.load.load(Ordering::Relaxed);
        for _ in 0..busy_per_load.saturating_mul(load) {
            acc = std::hint::black_box(acc.wrapping_mul(6364136223846793005).wrapping_add(load));
        }
        std::thread::sleep(period);
    }
}

#[async_trait]
impl Actuator for CpuActuator {
    fn resource(&self) -> Resource {
        Resource::Cpu
    }

    fn control(&self) -> Arc<dyn TargetControl> {
        self.control.clone()
    }

    fn goal(&self) -> ConsumeResult<i64> {
        let total = self.shared.source.total_cpu_units()? as f64;
        Ok((total * self.shared.target.get()).round() as i64)
    }

    fn consumed(&self) -> ConsumeResult<i64> {
        Ok(self.shared.source.used_cpu_units()?)
    }

    fn generate(&mut self, n: u64) -> ConsumeResult<()> {
        self.shared.load.fetch_add(n, Ordering::Relaxed);
        Ok(())
    }

    fn destroy(&mut self, n: u64) {
        let _ = self
            .shared
            .load
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some(cur.saturating_sub(n))
            });
    }

    fn load(&self) -> usize {
        self.shared.load.load(Ordering::Relaxed) as usize
    }

    async fn teardown(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.load.store(0, Ordering::Relaxed);
        // Workers notice the stop flag within one cycle; hand the
        // blocking joins to the blocking pool.
        let workers: Vec<JoinHandle<()>> = self.workers.drain(..).collect();
        let _ = tokio::task::spawn_blocking(move || {
            for worker in workers {
                let _ = worker.join();
            }
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadgrid_telemetry::SimulatedSource;

    fn test_config() -> CpuActuatorConfig {
        CpuActuatorConfig {
            workers: 1,
            worker_period: Duration::from_millis(1),
            busy_per_load: 10,
            initial_target: 0.0,
        }
    }

    #[tokio::test]
    async fn goal_scales_total_units_by_target_fraction() {
        let sim = Arc::new(SimulatedSource::new());
        sim.set_total_cpu_units(4 * UNITS_PER_CORE);
        let mut actuator = CpuActuator::new(sim, test_config());

        actuator.control().set_target(0.5, Unit::Percentage).unwrap();
        assert_eq!(actuator.goal().unwrap(), 2 * UNITS_PER_CORE);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn vcpu_target_round_trips_through_fraction() {
        let sim = Arc::new(SimulatedSource::new());
        sim.set_total_cpu_units(2 * UNITS_PER_CORE);
        let mut actuator = CpuActuator::new(sim, test_config());
        let control = actuator.control();

        control.set_target(1.0, Unit::Vcpu).unwrap();
        assert_eq!(control.target(Unit::Percentage).unwrap(), 0.5);
        assert_eq!(control.target(Unit::Vcpu).unwrap(), 1.0);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn rejects_units_outside_compute_and_percentage() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = CpuActuator::new(sim, test_config());
        let control = actuator.control();

        assert!(control.set_target(1.0, Unit::Megabytes).is_err());
        assert!(control.set_target(1.0, Unit::KilobytesPerSecond).is_err());
        assert!(control.set_target(-0.1, Unit::Percentage).is_err());
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn generate_and_destroy_track_the_load_counter() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = CpuActuator::new(sim, test_config());

        actuator.generate(5).unwrap();
        assert_eq!(actuator.load(), 5);
        actuator.destroy(3);
        assert_eq!(actuator.load(), 2);
        // Destroying past zero saturates.
        actuator.destroy(100);
        assert_eq!(actuator.load(), 0);
        actuator.teardown().await;
    }

    #[tokio::test]
    async fn teardown_joins_workers_and_clears_load() {
        let sim = Arc::new(SimulatedSource::new());
        let mut actuator = CpuActuator::new(sim, test_config());
        actuator.generate(10).unwrap();

        actuator.teardown().await;
        assert_eq!(actuator.load(), 0);
        assert!(actuator.workers.is_empty());
    }
}
