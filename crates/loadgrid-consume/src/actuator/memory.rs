//! Memory actuator: a queue of resident byte buffers.
//!
//! Each load unit is one allocated buffer. Buffers are touched on
//! allocation (one write per page) so the kernel actually backs them
//! with resident memory instead of leaving them as untouched virtual
//! mappings. Goal and consumption are exchanged with the engine in
//! megabytes; the stored target is a fraction of total memory.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use loadgrid_telemetry::MeasurementSource;
use loadgrid_units::{Unit, UnitFamily};

use super::{Actuator, TargetCell, TargetControl, ensure_non_negative, ensure_unit_allowed};
use crate::{ConsumeResult, Resource};

const PAGE: usize = 4096;

#[derive(Clone)]
pub struct MemoryActuatorConfig {
    /// Size of each load buffer.
    pub buffer_bytes: usize,
    /// Starting target as a fraction of total memory.
    pub initial_target: f64,
}

impl Default for MemoryActuatorConfig {
    fn default() -> Self {
        Self {
            buffer_bytes: 1024 * 1024,
            initial_target: 0.33,
        }
    }
}

struct MemoryShared {
    /// Target as a fraction of total memory.
    target: TargetCell,
    source: Arc<dyn MeasurementSource>,
}

struct MemoryControl(Arc<MemoryShared>);

impl TargetControl for MemoryControl {
    fn resource(&self) -> Resource {
        Resource::Memory
    }

    fn default_unit(&self) -> Unit {
        Unit::Percentage
    }

    fn is_unit_allowed(&self, unit: Unit) -> bool {
        matches!(unit.family(), UnitFamily::Percentage | UnitFamily::Memory)
    }

    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()> {
        ensure_unit_allowed(Resource::Memory, self.is_unit_allowed(unit), unit)?;
        ensure_non_negative(Resource::Memory, value)?;
        let fraction = match unit {
            Unit::Percentage => value,
            _ => {
                let bytes = unit.convert(value, Unit::Bytes)?;
                let total = self.0.source.total_memory(Unit::Bytes)?;
                if total > 0.0 { bytes / total } else { 0.0 }
            }
        };
        self.0.target.set(fraction);
        Ok(())
    }

    fn target(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Memory, self.is_unit_allowed(unit), unit)?;
        let fraction = self.0.target.get();
        match unit {
            Unit::Percentage => Ok(fraction),
            _ => Ok(self.0.source.total_memory(unit)? * fraction),
        }
    }

    fn actual(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Memory, self.is_unit_allowed(unit), unit)?;
        match unit {
            Unit::Percentage => Ok(self.0.source.memory_percentage()?),
            _ => Ok(self.0.source.used_memory(unit)?),
        }
    }
}

pub struct MemoryActuator {
    shared: Arc<MemoryShared>,
    control: Arc<MemoryControl>,
    buffer_bytes: usize,
    buffers: VecDeque<Vec<u8>>,
}

impl MemoryActuator {
    pub fn new(source: Arc<dyn MeasurementSource>, config: MemoryActuatorConfig) -> Self {
        let shared = Arc::new(MemoryShared {
            target: TargetCell::new(config.initial_target),
            source,
        });
        let control = Arc::new(MemoryControl(shared.clone()));
        Self {
            shared,
            control,
            buffer_bytes: config.buffer_bytes.max(PAGE),
            buffers: VecDeque::new(),
        }
    }

    fn allocate(&self) -> Vec<u8> {
        let mut buffer = vec![0u8; self.buffer_bytes];
        for i in (0..buffer.len()).step_by(PAGE) {
            buffer[i] = 1;
        }
        buffer
    }
}

#[async_trait]
impl Actuator for MemoryActuator {
    fn resource(&self) -> Resource {
        Resource::Memory
    }

    fn control(&self) -> Arc<dyn TargetControl> {
        self.control.clone()
    }

    fn goal(&self) -> ConsumeResult<i64> {
        let total = self.shared.source.total_memory(Unit::Megabytes)?;
        Ok((total * self.shared.target.get()).round() as i64)
    }

    fn consumed(&self) -> ConsumeResult<i64> {
        Ok(self.shared.source.used_memory(Unit::Megabytes)?.round() as i64)
    }

    fn generate(&mut self, n: u64) -> ConsumeResult<()> {
        for _ in 0..n {
            let buffer = self.allocate();
            self.buffers.push_back(buffer);
        }
        Ok(())
    }

    fn destroy(&mut self, n: u64) {
        for _ in 0..n {
            if self.buffers.pop_front().is_none() {
                break;
            }
        }
    }

    fn load(&self) -> usize {
        self.buffers.len()
    }

    async fn teardown(&mut self) {
        self.buffers.clear();
    }
}
