//! The PID feedback engine.
//!
//! One tick: read goal and consumed from the actuator, compute the
//! proportional/derivative/integral terms, and ask the actuator to
//! create or destroy that many load units. The loop never dies on a
//! failed tick — a crashed tick is a no-op tick — and stops only when
//! the workflow supervisor signals cancellation.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::actuator::Actuator;
use crate::{ConsumeError, ConsumeResult};

/// How often the steady-state status line is emitted.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable PID tuning, supplied once at process start.
#[derive(Debug, Clone, PartialEq)]
pub struct PidConfig {
    /// Control loop period.
    pub pace: Duration,
    pub proportion: f64,
    pub derivative: f64,
    pub integral: f64,
    /// Damping applied to the accumulated integral term each tick,
    /// preventing unbounded windup.
    pub decay: f64,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            pace: Duration::from_secs(1),
            proportion: 0.333,
            derivative: 0.333,
            integral: 0.333,
            decay: 0.95,
        }
    }
}

impl PidConfig {
    /// Gains must sit in the open interval (0, 10), decay in (0, 1],
    /// and the pace must be positive.
    pub fn validate(&self) -> ConsumeResult<()> {
        for (name, value) in [
            ("proportion", self.proportion),
            ("derivative", self.derivative),
            ("integral", self.integral),
        ] {
            if !(value > 0.0 && value < 10.0) {
                return Err(ConsumeError::InvalidParameter(format!(
                    "PID {name} factor must be within (0, 10), got {value}"
                )));
            }
        }
        if !(self.decay > 0.0 && self.decay <= 1.0) {
            return Err(ConsumeError::InvalidParameter(format!(
                "PID decay must be within (0, 1], got {}",
                self.decay
            )));
        }
        if self.pace.is_zero() {
            return Err(ConsumeError::InvalidParameter(
                "PID pace must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one tick decided, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TickReport {
    pub goal: i64,
    pub consumed: i64,
    pub p: f64,
    pub d: f64,
    pub i: f64,
    pub scale: i64,
}

/// The feedback engine owning one actuator's PID memory.
pub(crate) struct PidLoop {
    config: PidConfig,
    previous_error: i64,
    total_error: f64,
}

impl PidLoop {
    pub(crate) fn new(config: PidConfig) -> Self {
        Self {
            config,
            previous_error: 0,
            total_error: 0.0,
        }
    }

    /// Run until cancelled, then release the actuator's load.
    pub(crate) async fn run(
        mut self,
        mut actuator: Box<dyn Actuator>,
        mut cancel: watch::Receiver<bool>,
    ) {
        let resource = actuator.resource();
        info!(%resource, pace = ?self.config.pace, "control loop started");

        let mut last_status = Instant::now();
        loop {
            match self.tick(actuator.as_mut()) {
                Ok(report) => {
                    if last_status.elapsed() >= STATUS_LOG_INTERVAL {
                        last_status = Instant::now();
                        debug!(
                            %resource,
                            goal = report.goal,
                            consumed = report.consumed,
                            p = report.p,
                            d = report.d,
                            i = report.i,
                            scale = report.scale,
                            load = actuator.load(),
                            "control loop status"
                        );
                    }
                }
                // A crashed tick is equivalent to a no-op tick.
                Err(e) => warn!(%resource, error = %e, "tick failed, continuing"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.pace) => {}
                _ = cancel.changed() => break,
            }
        }

        actuator.teardown().await;
        info!(%resource, "control loop cancelled, load released");
    }

    pub(crate) fn tick(&mut self, actuator: &mut dyn Actuator) -> ConsumeResult<TickReport> {
        let goal = actuator.goal()?;
        let consumed = actuator.consumed()?;
        let error = goal - consumed;

        let p = error as f64 * self.config.proportion;
        let d = (error - self.previous_error) as f64 * self.config.derivative;
        let i = self.total_error * self.config.integral;
        let scale = (p + d + i).round() as i64;

        if scale > 0 {
            actuator.generate(scale as u64)?;
        } else if scale < 0 {
            actuator.destroy(scale.unsigned_abs());
        }

        // Error crossed zero: drop the accumulated term rather than
        // carrying overshoot into the new direction.
        if error.signum() != 0
            && self.previous_error.signum() != 0
            && error.signum() != self.previous_error.signum()
        {
            self.total_error = 0.0;
        } else {
            self.total_error = self.total_error * self.config.decay + error as f64;
        }
        if actuator.load() == 0 {
            self.total_error = 0.0;
        }
        self.previous_error = error;

        Ok(TickReport {
            goal,
            consumed,
            p,
            d,
            i,
            scale,
        })
    }
}
