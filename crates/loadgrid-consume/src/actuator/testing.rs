//! Scriptable actuator for engine and supervisor tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use loadgrid_units::Unit;

use super::{Actuator, TargetCell, TargetControl};
use crate::{ConsumeError, ConsumeResult, Resource};

pub(crate) struct MockControl {
    resource: Resource,
    target: TargetCell,
}

impl TargetControl for MockControl {
    fn resource(&self) -> Resource {
        self.resource
    }

    fn default_unit(&self) -> Unit {
        Unit::Percentage
    }

    fn is_unit_allowed(&self, unit: Unit) -> bool {
        unit == Unit::Percentage
    }

    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()> {
        super::ensure_unit_allowed(self.resource, self.is_unit_allowed(unit), unit)?;
        super::ensure_non_negative(self.resource, value)?;
        self.target.set(value);
        Ok(())
    }

    fn target(&self, _unit: Unit) -> ConsumeResult<f64> {
        Ok(self.target.get())
    }

    fn actual(&self, _unit: Unit) -> ConsumeResult<f64> {
        Ok(0.0)
    }
}

pub(crate) struct MockActuator {
    resource: Resource,
    goal: i64,
    consumed: i64,
    load: usize,
    generated: u64,
    destroyed: u64,
    fail: Arc<AtomicBool>,
    torn_down: Arc<AtomicBool>,
    control: Arc<MockControl>,
}

impl MockActuator {
    pub(crate) fn new(goal: i64, consumed: i64) -> Self {
        Self {
            resource: Resource::Cpu,
            goal,
            consumed,
            load: 0,
            generated: 0,
            destroyed: 0,
            fail: Arc::new(AtomicBool::new(false)),
            torn_down: Arc::new(AtomicBool::new(false)),
            control: Arc::new(MockControl {
                resource: Resource::Cpu,
                target: TargetCell::new(0.0),
            }),
        }
    }

    pub(crate) fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self.control = Arc::new(MockControl {
            resource,
            target: TargetCell::new(0.0),
        });
        self
    }

    pub(crate) fn set_measurements(&mut self, goal: i64, consumed: i64) {
        self.goal = goal;
        self.consumed = consumed;
    }

    pub(crate) fn set_load(&mut self, load: usize) {
        self.load = load;
    }

    pub(crate) fn fail_measurements(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn generated(&self) -> u64 {
        self.generated
    }

    pub(crate) fn destroyed(&self) -> u64 {
        self.destroyed
    }

    pub(crate) fn teardown_flag(&self) -> Arc<AtomicBool> {
        self.torn_down.clone()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    fn resource(&self) -> Resource {
        self.resource
    }

    fn control(&self) -> Arc<dyn TargetControl> {
        self.control.clone()
    }

    fn goal(&self) -> ConsumeResult<i64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConsumeError::Dependency("measurement down".to_string()));
        }
        Ok(self.goal)
    }

    fn consumed(&self) -> ConsumeResult<i64> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ConsumeError::Dependency("measurement down".to_string()));
        }
        Ok(self.consumed)
    }

    fn generate(&mut self, n: u64) -> ConsumeResult<()> {
        self.generated += n;
        self.load += n as usize;
        Ok(())
    }

    fn destroy(&mut self, n: u64) {
        self.destroyed += n;
        self.load = self.load.saturating_sub(n as usize);
    }

    fn load(&self) -> usize {
        self.load
    }

    async fn teardown(&mut self) {
        self.torn_down.store(true, Ordering::SeqCst);
    }
}
