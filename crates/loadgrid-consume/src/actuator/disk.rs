//! Disk actuator: rotating scratch files under constant rewrite.
//!
//! Load units are bytes in the write chunk. A writer task appends one
//! chunk of random data per period to the current scratch file, a
//! reader task reads a chunk back, and a rotator advances through a
//! small ring of files, truncating each as it becomes current so the
//! scratch footprint stays bounded. Consumption is the measured storage
//! write rate, so the feedback path reflects what the kernel actually
//! committed, not what was requested.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use loadgrid_telemetry::MeasurementSource;
use loadgrid_units::{Unit, UnitFamily};

use super::{Actuator, TargetCell, TargetControl, ensure_non_negative, ensure_unit_allowed};
use crate::{ConsumeError, ConsumeResult, Resource};

const FILE_COUNT: usize = 3;

/// Distinguishes scratch files across actuator instances in one process.
static INSTANCE: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct DiskActuatorConfig {
    /// Directory the scratch files live in.
    pub scratch_dir: PathBuf,
    pub write_period: Duration,
    pub read_period: Duration,
    pub rotate_period: Duration,
}

impl Default for DiskActuatorConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            write_period: Duration::from_millis(50),
            read_period: Duration::from_millis(50),
            rotate_period: Duration::from_secs(5),
        }
    }
}

struct DiskShared {
    /// Bytes written per writer period. Canonical target storage.
    target: TargetCell,
    source: Arc<dyn MeasurementSource>,
    chunk: AtomicI64,
    current: AtomicUsize,
    paths: Vec<PathBuf>,
}

struct DiskControl(Arc<DiskShared>);

impl TargetControl for DiskControl {
    fn resource(&self) -> Resource {
        Resource::Disk
    }

    fn default_unit(&self) -> Unit {
        Unit::BytesPerSecond
    }

    fn is_unit_allowed(&self, unit: Unit) -> bool {
        unit.family() == UnitFamily::Rate
    }

    fn set_target(&self, value: f64, unit: Unit) -> ConsumeResult<()> {
        ensure_unit_allowed(Resource::Disk, self.is_unit_allowed(unit), unit)?;
        ensure_non_negative(Resource::Disk, value)?;
        self.0.target.set(unit.convert(value, Unit::BytesPerSecond)?);
        Ok(())
    }

    fn target(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Disk, self.is_unit_allowed(unit), unit)?;
        Ok(Unit::BytesPerSecond.convert(self.0.target.get(), unit)?)
    }

    fn actual(&self, unit: Unit) -> ConsumeResult<f64> {
        ensure_unit_allowed(Resource::Disk, self.is_unit_allowed(unit), unit)?;
        Ok(self.0.source.storage_rate(unit)?)
    }
}

pub struct DiskActuator {
    shared: Arc<DiskShared>,
    control: Arc<DiskControl>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl DiskActuator {
    /// Create the scratch files and spawn the writer, reader, and
    /// rotator tasks. Requires a running tokio runtime.
    pub fn spawn(
        source: Arc<dyn MeasurementSource>,
        config: DiskActuatorConfig,
    ) -> ConsumeResult<Self> {
        let instance = INSTANCE.fetch_add(1, Ordering::Relaxed);
        let paths: Vec<PathBuf> = (0..FILE_COUNT)
            .map(|i| {
                config
                    .scratch_dir
                    .join(format!("loadgrid-disk-{}-{instance}-{i}.dat", std::process::id()))
            })
            .collect();
        for path in &paths {
            std::fs::File::create(path).map_err(|e| {
                ConsumeError::Internal(format!(
                    "cannot create scratch file {}: {e}",
                    path.display()
                ))
            })?;
        }

        let shared = Arc::new(DiskShared {
            target: TargetCell::new(0.0),
            source,
            chunk: AtomicI64::new(0),
            current: AtomicUsize::new(0),
            paths,
        });
        let (shutdown, _) = watch::channel(false);

        let tasks = vec![
            tokio::spawn(writer_task(
                shared.clone(),
                config.write_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(reader_task(
                shared.clone(),
                config.read_period,
                shutdown.subscribe(),
            )),
            tokio::spawn(rotator_task(
                shared.clone(),
                config.rotate_period,
                shutdown.subscribe(),
            )),
        ];

        let control = Arc::new(DiskControl(shared.clone()));
        Ok(Self {
            shared,
            control,
            shutdown,
            tasks,
        })
    }
}

async fn writer_task(shared: Arc<DiskShared>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut buffer = Vec::new();
    loop {
        let chunk = shared.chunk.load(Ordering::Relaxed).max(0) as usize;
        if chunk > 0 {
            buffer.resize(chunk, 0);
            rand::thread_rng().fill_bytes(&mut buffer);
            let path = &shared.paths[shared.current.load(Ordering::Relaxed)];
            let result = async {
                let mut file = tokio::fs::OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(path)
                    .await?;
                file.write_all(&buffer).await
            }
            .await;
            if let Err(e) = result {
                warn!(path = %path.display(), error = %e, "scratch write failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("disk writer stopped");
}

async fn reader_task(shared: Arc<DiskShared>, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut buffer = Vec::new();
    loop {
        let chunk = shared.chunk.load(Ordering::Relaxed).max(0) as usize;
        if chunk > 0 {
            buffer.resize(chunk, 0);
            let path = &shared.paths[shared.current.load(Ordering::Relaxed)];
            let result = async {
                let mut file = tokio::fs::File::open(path).await?;
                file.read(&mut buffer).await
            }
            .await;
            if let Err(e) = result {
                debug!(path = %path.display(), error = %e, "scratch read failed");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }
    }
    debug!("disk reader stopped");
}

async fn rotator_task(shared: Arc<DiskShared>, period: Duration, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = stop.changed() => break,
        }

        let next = (shared.current.load(Ordering::Relaxed) + 1) % FILE_COUNT;
        // Truncate before making it current, so the footprint of each
        // file is bounded by one rotation period of writes.
        if let Err(e) = tokio::fs::File::create(&shared.paths[next]).await {
            warn!(path = %shared.paths[next].display(), error = %e, "scratch rotate failed");
        }
        shared.current.store(next, Ordering::Relaxed);
    }
    debug!("disk rotator stopped");
}

#[async_trait]
impl Actuator for DiskActuator {
    fn resource(&self) -> Resource {
        Resource::Disk
    }

    fn control(&self) -> Arc<dyn TargetControl> {
        self.control.clone()
    }

    fn goal(&self) -> ConsumeResult<i64> {
        Ok(self.shared.target.get().round() as i64)
    }

    fn consumed(&self) -> ConsumeResult<i64> {
        Ok(self.shared.source.storage_rate(Unit::BytesPerSecond)?.round() as i64)
    }

    fn generate(&mut self, n: u64) -> ConsumeResult<()> {
        self.shared.chunk.fetch_add(n as i64, Ordering::Relaxed);
        Ok(())
    }

    fn destroy(&mut self, n: u64) {
        let _ = self
            .shared
            .chunk
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cur| {
                Some((cur - n as i64).max(0))
            });
    }

    fn load(&self) -> usize {
        self.shared.chunk.load(Ordering::Relaxed).max(0) as usize
    }

    async fn teardown(&mut self) {
        self.shared.chunk.store(0, Ordering::Relaxed);
        let _ = self.shutdown.send(true);
        // A writer mid-append would recreate a removed file, so the
        // tasks must be fully stopped before cleanup.
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        for path in &self.shared.paths {
            if let Err(e) = std::fs::remove_file(path) {
                debug!(path = %path.display(), error = %e, "scratch cleanup failed");
            }
        }
    }
}
