//! The workflow supervisor.
//!
//! Owns the set of running control loops, at most one per resource.
//! Starting spawns the PID loop on a background task; cancelling
//! signals the loop's watch channel and waits, bounded, for the task
//! to release its load and exit. Cancellation of an absent resource is
//! a no-op so shutdown paths can be idempotent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::actuator::{Actuator, TargetControl};
use crate::pid::PidLoop;
use crate::{ConsumeError, ConsumeResult, PidConfig, Resource};

/// Cancellation is cooperative and checked every tick; a loop that
/// outlives this bound indicates a broken actuator teardown.
const CANCEL_BOUND: Duration = Duration::from_secs(5);

struct ConsumerHandle {
    control: Arc<dyn TargetControl>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Registry of running control loops, keyed by resource.
#[derive(Default)]
pub struct Workflow {
    consumers: Mutex<HashMap<Resource, ConsumerHandle>>,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the actuator under its resource and launch its control
    /// loop. Fails if a consumer is already registered for that
    /// resource — there is no implicit replace.
    pub fn start(&self, actuator: Box<dyn Actuator>, config: PidConfig) -> ConsumeResult<()> {
        config.validate()?;
        let resource = actuator.resource();
        let mut consumers = self.consumers.lock().expect("workflow lock poisoned");

        if consumers.contains_key(&resource) {
            return Err(ConsumeError::InvalidParameter(format!(
                "a consumer is already registered for resource {resource}"
            )));
        }

        let control = actuator.control();
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(PidLoop::new(config).run(actuator, cancel_rx));

        consumers.insert(
            resource,
            ConsumerHandle {
                control,
                cancel,
                task,
            },
        );
        info!(%resource, "consumer registered");
        Ok(())
    }

    /// Cancel the named loop and wait for it to release its load.
    /// No-op when nothing is registered under `resource`.
    pub async fn cancel(&self, resource: Resource) -> ConsumeResult<()> {
        let handle = {
            let mut consumers = self.consumers.lock().expect("workflow lock poisoned");
            consumers.remove(&resource)
        };

        let Some(handle) = handle else {
            debug!(%resource, "cancel requested for absent consumer");
            return Ok(());
        };

        let _ = handle.cancel.send(true);
        match tokio::time::timeout(CANCEL_BOUND, handle.task).await {
            Ok(_) => {
                info!(%resource, "consumer cancelled");
                Ok(())
            }
            Err(_) => Err(ConsumeError::Internal(format!(
                "control loop for {resource} did not stop within {CANCEL_BOUND:?}"
            ))),
        }
    }

    /// The target handle for one registered resource.
    pub fn control(&self, resource: Resource) -> Option<Arc<dyn TargetControl>> {
        self.consumers
            .lock()
            .expect("workflow lock poisoned")
            .get(&resource)
            .map(|h| h.control.clone())
    }

    /// Target handles for every registered resource, in stable order.
    pub fn controls(&self) -> Vec<Arc<dyn TargetControl>> {
        let consumers = self.consumers.lock().expect("workflow lock poisoned");
        let mut entries: Vec<_> = consumers
            .iter()
            .map(|(r, h)| (*r, h.control.clone()))
            .collect();
        entries.sort_by_key(|(r, _)| *r);
        entries.into_iter().map(|(_, c)| c).collect()
    }

    pub fn registered(&self) -> Vec<Resource> {
        let consumers = self.consumers.lock().expect("workflow lock poisoned");
        let mut resources: Vec<_> = consumers.keys().copied().collect();
        resources.sort();
        resources
    }

    /// Cancel every running loop. Idempotent.
    pub async fn shutdown(&self) -> ConsumeResult<()> {
        for resource in Resource::ALL {
            self.cancel(resource).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::testing::MockActuator;
    use loadgrid_units::Unit;

    fn fast_config() -> PidConfig {
        PidConfig {
            pace: Duration::from_millis(10),
            ..PidConfig::default()
        }
    }

    #[tokio::test]
    async fn duplicate_resource_is_rejected() {
        let workflow = Workflow::new();
        workflow
            .start(Box::new(MockActuator::new(0, 0)), fast_config())
            .unwrap();

        let err = workflow
            .start(Box::new(MockActuator::new(0, 0)), fast_config())
            .unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));

        workflow.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_allows_restart() {
        let workflow = Workflow::new();
        let actuator = MockActuator::new(0, 0);
        let torn_down = actuator.teardown_flag();

        workflow.start(Box::new(actuator), fast_config()).unwrap();
        workflow.cancel(Resource::Cpu).await.unwrap();
        assert!(torn_down.load(std::sync::atomic::Ordering::SeqCst));

        // The name is free again.
        workflow
            .start(Box::new(MockActuator::new(0, 0)), fast_config())
            .unwrap();
        workflow.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn cancel_of_absent_resource_is_noop() {
        let workflow = Workflow::new();
        workflow.cancel(Resource::Disk).await.unwrap();
    }

    #[tokio::test]
    async fn controls_are_sorted_and_reachable() {
        let workflow = Workflow::new();
        workflow
            .start(
                Box::new(MockActuator::new(0, 0).with_resource(Resource::Memory)),
                fast_config(),
            )
            .unwrap();
        workflow
            .start(
                Box::new(MockActuator::new(0, 0).with_resource(Resource::Cpu)),
                fast_config(),
            )
            .unwrap();

        assert_eq!(
            workflow.registered(),
            vec![Resource::Cpu, Resource::Memory]
        );
        let controls = workflow.controls();
        assert_eq!(controls[0].resource(), Resource::Cpu);
        assert_eq!(controls[1].resource(), Resource::Memory);

        // Target mutation goes through the shared handle.
        let memory = workflow.control(Resource::Memory).unwrap();
        memory.set_target(0.5, Unit::Percentage).unwrap();
        assert_eq!(memory.target(Unit::Percentage).unwrap(), 0.5);

        workflow.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_pid_config_is_rejected_before_spawn() {
        let workflow = Workflow::new();
        let mut bad = fast_config();
        bad.proportion = 42.0;

        assert!(workflow
            .start(Box::new(MockActuator::new(0, 0)), bad)
            .is_err());
        assert!(workflow.registered().is_empty());
    }
}
