//! Rate tracking over cumulative counters.
//!
//! Kernel counters (bytes transmitted, sectors written) only ever grow;
//! a [`RateTracker`] polls one on a fixed period and derives the rate of
//! change from the two most recent samples. The sample window is shared
//! between the polling task and readers under a mutex so a reader never
//! observes a half-updated pair.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::TelemetryResult;

/// One observed value of the tracked counter.
#[derive(Debug, Clone, Copy)]
pub struct Datapoint {
    pub value: f64,
    pub at: Instant,
}

/// Running statistics over a sampled counter.
#[derive(Debug)]
pub struct StatTracker {
    total: f64,
    count: u64,
    max: Option<f64>,
    min: Option<f64>,
    latest: Datapoint,
    previous: Option<Datapoint>,
}

impl StatTracker {
    pub fn new(initial: f64) -> Self {
        Self {
            total: 0.0,
            count: 0,
            max: None,
            min: None,
            latest: Datapoint {
                value: initial,
                at: Instant::now(),
            },
            previous: None,
        }
    }

    /// Record a new sample.
    pub fn add(&mut self, value: f64) {
        self.total += value;
        self.count += 1;
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.previous = Some(self.latest);
        self.latest = Datapoint {
            value,
            at: Instant::now(),
        };
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total / self.count as f64
        }
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn latest(&self) -> Datapoint {
        self.latest
    }

    /// Change between the two most recent samples, if two exist.
    pub fn latest_change(&self) -> Option<f64> {
        self.previous.map(|prev| self.latest.value - prev.value)
    }

    /// Rate of change between the two most recent samples, normalized
    /// to the given time base (e.g. `Duration::from_secs(1)` for a
    /// per-second rate). `None` until two samples exist or if they
    /// carry the same timestamp.
    pub fn latest_rate(&self, per: Duration) -> Option<f64> {
        let change = self.latest_change()?;
        let elapsed = self.latest.at - self.previous?.at;
        if elapsed.is_zero() {
            return None;
        }
        Some(change * per.as_secs_f64() / elapsed.as_secs_f64())
    }
}

/// Polls a cumulative counter on a fixed period in a background task.
///
/// Dropping the tracker stops the task.
pub struct RateTracker {
    name: &'static str,
    stats: Arc<Mutex<StatTracker>>,
    shutdown: watch::Sender<bool>,
}

impl RateTracker {
    /// Spawn the polling task. `read_total` reads the current value of
    /// the cumulative counter; a failed read is logged and skipped so
    /// the poller never dies.
    pub fn spawn<F>(name: &'static str, read_total: F, period: Duration) -> Self
    where
        F: Fn() -> TelemetryResult<f64> + Send + 'static,
    {
        let initial = read_total().unwrap_or(0.0);
        let stats = Arc::new(Mutex::new(StatTracker::new(initial)));
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task_stats = stats.clone();
        tokio::spawn(async move {
            info!(tracker = name, period = ?period, "rate tracker started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        match read_total() {
                            Ok(value) => {
                                let mut stats = task_stats.lock().expect("rate tracker lock poisoned");
                                stats.add(value);
                                debug!(tracker = name, value, "polled counter");
                            }
                            Err(e) => {
                                error!(tracker = name, error = %e, "counter poll failed");
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!(tracker = name, "rate tracker stopping");
                        break;
                    }
                }
            }
        });

        Self {
            name,
            stats,
            shutdown,
        }
    }

    /// Latest observed rate normalized to `per`, or `None` until two
    /// samples have been collected.
    pub fn latest_rate(&self, per: Duration) -> Option<f64> {
        self.stats
            .lock()
            .expect("rate tracker lock poisoned")
            .latest_rate(per)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for RateTracker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}
