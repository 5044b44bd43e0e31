//! `/proc`-backed measurement source.
//!
//! Reads:
//! - `/proc/meminfo` — total and available memory.
//! - `/proc/stat` — aggregate CPU time, sampled as deltas between reads.
//! - `/proc/net/dev` — cumulative transmitted bytes per interface.
//! - `/proc/diskstats` — cumulative sectors written per block device.
//!
//! Network and storage figures are cumulative counters, so they are fed
//! through background [`RateTracker`]s; callers read the latest derived
//! rate. CPU utilization is derived from the delta between the current
//! and previous `/proc/stat` read, which matches the control loop's
//! read-once-per-tick access pattern.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use loadgrid_units::Unit;
use tracing::warn;

use crate::rate::RateTracker;
use crate::{MeasurementSource, TelemetryError, TelemetryResult, UNITS_PER_CORE};

const MEMINFO: &str = "/proc/meminfo";
const STAT: &str = "/proc/stat";
const NET_DEV: &str = "/proc/net/dev";
const DISKSTATS: &str = "/proc/diskstats";

/// Sector size used by the kernel for `/proc/diskstats` accounting,
/// independent of the device's real sector size.
const SECTOR_BYTES: f64 = 512.0;

/// Tuning for the `/proc` source.
#[derive(Debug, Clone)]
pub struct ProcSourceConfig {
    /// Polling period for the network and storage rate trackers.
    pub rate_poll: Duration,
}

impl Default for ProcSourceConfig {
    fn default() -> Self {
        Self {
            rate_poll: Duration::from_secs(5),
        }
    }
}

/// Linux measurement source reading kernel counters.
pub struct ProcSource {
    cpu_prev: Arc<Mutex<Option<CpuTimes>>>,
    network_tracker: RateTracker,
    storage_tracker: RateTracker,
}

impl ProcSource {
    /// Build the source and start its rate pollers. Must be called from
    /// within a tokio runtime.
    pub fn spawn(config: ProcSourceConfig) -> TelemetryResult<Self> {
        // Validate the figures we depend on are actually readable
        // before any control loop starts.
        read_meminfo(MEMINFO)?;
        read_cpu_times(STAT)?;

        let network_tracker = RateTracker::spawn(
            "network-tx-bytes",
            || read_transmitted_bytes(NET_DEV),
            config.rate_poll,
        );
        let storage_tracker = RateTracker::spawn(
            "storage-written-bytes",
            || read_written_bytes(DISKSTATS),
            config.rate_poll,
        );

        Ok(Self {
            cpu_prev: Arc::new(Mutex::new(None)),
            network_tracker,
            storage_tracker,
        })
    }

    fn online_cores(&self) -> i64 {
        // Documented safe default: assume one CPU rather than failing.
        match std::thread::available_parallelism() {
            Ok(n) => n.get() as i64,
            Err(e) => {
                warn!(error = %e, "could not determine online CPUs, assuming 1");
                1
            }
        }
    }

    fn busy_fraction(&self) -> TelemetryResult<f64> {
        let now = read_cpu_times(STAT)?;
        let mut prev = self.cpu_prev.lock().expect("cpu sampler lock poisoned");
        let fraction = match *prev {
            Some(p) => {
                let total = now.total.saturating_sub(p.total);
                let busy = now.busy.saturating_sub(p.busy);
                if total == 0 {
                    0.0
                } else {
                    (busy as f64 / total as f64).clamp(0.0, 1.0)
                }
            }
            // Warm-up read: no interval to measure over yet.
            None => 0.0,
        };
        *prev = Some(now);
        Ok(fraction)
    }
}

impl MeasurementSource for ProcSource {
    fn used_memory(&self, unit: Unit) -> TelemetryResult<f64> {
        let mem = read_meminfo(MEMINFO)?;
        Ok(Unit::Bytes.convert(mem.used_bytes(), unit)?)
    }

    fn total_memory(&self, unit: Unit) -> TelemetryResult<f64> {
        let mem = read_meminfo(MEMINFO)?;
        Ok(Unit::Bytes.convert(mem.total_bytes, unit)?)
    }

    fn total_cpu_units(&self) -> TelemetryResult<i64> {
        Ok(self.online_cores() * UNITS_PER_CORE)
    }

    fn used_cpu_units(&self) -> TelemetryResult<i64> {
        let total = self.total_cpu_units()? as f64;
        Ok((self.busy_fraction()? * total) as i64)
    }

    fn cpu_percentage(&self) -> TelemetryResult<f64> {
        self.busy_fraction()
    }

    fn network_rate(&self, unit: Unit) -> TelemetryResult<f64> {
        let bytes_per_sec = self
            .network_tracker
            .latest_rate(Duration::from_secs(1))
            .ok_or_else(|| {
                TelemetryError::Unavailable("network rate not yet sampled".to_string())
            })?;
        Ok(Unit::BytesPerSecond.convert(bytes_per_sec, unit)?)
    }

    fn storage_rate(&self, unit: Unit) -> TelemetryResult<f64> {
        let bytes_per_sec = self
            .storage_tracker
            .latest_rate(Duration::from_secs(1))
            .ok_or_else(|| {
                TelemetryError::Unavailable("storage rate not yet sampled".to_string())
            })?;
        Ok(Unit::BytesPerSecond.convert(bytes_per_sec, unit)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct MemInfo {
    total_bytes: f64,
    available_bytes: f64,
}

impl MemInfo {
    fn used_bytes(self) -> f64 {
        (self.total_bytes - self.available_bytes).max(0.0)
    }
}

fn read_meminfo(path: &str) -> TelemetryResult<MemInfo> {
    let content = read_file(path)?;
    parse_meminfo(&content, path)
}

fn parse_meminfo(content: &str, path: &str) -> TelemetryResult<MemInfo> {
    let mut total_kb: Option<f64> = None;
    let mut available_kb: Option<f64> = None;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match key {
            "MemTotal:" => total_kb = value.parse().ok(),
            "MemAvailable:" => available_kb = value.parse().ok(),
            _ => {}
        }
        if total_kb.is_some() && available_kb.is_some() {
            break;
        }
    }

    match (total_kb, available_kb) {
        (Some(total), Some(available)) => Ok(MemInfo {
            total_bytes: total * 1024.0,
            available_bytes: available * 1024.0,
        }),
        _ => Err(TelemetryError::Parse {
            path: path.to_string(),
            detail: "MemTotal or MemAvailable not found".to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    busy: u64,
    total: u64,
}

fn read_cpu_times(path: &str) -> TelemetryResult<CpuTimes> {
    let content = read_file(path)?;
    parse_cpu_times(&content, path)
}

/// Parse the aggregate `cpu` line: user nice system idle iowait irq
/// softirq steal. Idle plus iowait count as not busy.
fn parse_cpu_times(content: &str, path: &str) -> TelemetryResult<CpuTimes> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| TelemetryError::Parse {
            path: path.to_string(),
            detail: "aggregate cpu line not found".to_string(),
        })?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|f| f.parse().ok())
        .collect();

    if fields.len() < 5 {
        return Err(TelemetryError::Parse {
            path: path.to_string(),
            detail: format!("expected at least 5 cpu time fields, got {}", fields.len()),
        });
    }

    let total: u64 = fields.iter().sum();
    let idle = fields[3] + fields[4];
    Ok(CpuTimes {
        busy: total.saturating_sub(idle),
        total,
    })
}

fn read_transmitted_bytes(path: &str) -> TelemetryResult<f64> {
    let content = read_file(path)?;
    parse_transmitted_bytes(&content)
}

/// Sum transmitted bytes across all interfaces except loopback.
/// `/proc/net/dev` format: `iface: rx_bytes ... (8 rx fields) tx_bytes ...`.
fn parse_transmitted_bytes(content: &str) -> TelemetryResult<f64> {
    let mut total = 0.0;
    for line in content.lines().skip(2) {
        let Some((iface, stats)) = line.split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        if let Some(tx) = stats.split_whitespace().nth(8) {
            total += tx.parse::<f64>().unwrap_or(0.0);
        }
    }
    Ok(total)
}

fn read_written_bytes(path: &str) -> TelemetryResult<f64> {
    let content = read_file(path)?;
    parse_written_bytes(&content)
}

/// Sum sectors written across whole physical disks (field 10 of
/// `/proc/diskstats`), skipping virtual devices and partitions so
/// writes are not counted twice.
fn parse_written_bytes(content: &str) -> TelemetryResult<f64> {
    let mut total = 0.0;
    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }
        let name = fields[2];
        if is_virtual_device(name) || is_partition(name) {
            continue;
        }
        if let Ok(sectors) = fields[9].parse::<f64>() {
            total += sectors * SECTOR_BYTES;
        }
    }
    Ok(total)
}

fn is_virtual_device(name: &str) -> bool {
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("zram")
        || name.starts_with("dm-")
        || name.starts_with("md")
}

fn is_partition(name: &str) -> bool {
    if let Some(rest) = name.strip_prefix("nvme") {
        return rest.contains('p');
    }
    (name.starts_with("sd")
        || name.starts_with("vd")
        || name.starts_with("hd")
        || name.starts_with("xvd"))
        && name.ends_with(|c: char| c.is_ascii_digit())
}

fn read_file(path: &str) -> TelemetryResult<String> {
    std::fs::read_to_string(path).map_err(|source| TelemetryError::Read {
        path: path.to_string(),
        source,
    })
}
