//! loadgrid-consume — synthetic resource consumption under feedback control.
//!
//! One generic PID engine ([`pid::PidLoop`]) drives four concrete
//! [`actuator::Actuator`]s, each of which knows how to fabricate and
//! retract "load" for its resource and how to read back actual
//! consumption through `loadgrid-telemetry`. The [`workflow::Workflow`]
//! supervisor owns the running loops: at most one per resource, started
//! on background tasks and cancelled cooperatively.
//!
//! ```text
//! Workflow
//!   ├── cpu     → PidLoop → CpuActuator     (busy-loop worker pool)
//!   ├── memory  → PidLoop → MemoryActuator  (resident byte buffers)
//!   ├── disk    → PidLoop → DiskActuator    (rotating scratch files)
//!   └── network → PidLoop → NetworkActuator (duplex TCP payloads)
//! ```

pub mod actuator;
pub mod error;
pub mod pid;
pub mod workflow;

use std::fmt;
use std::str::FromStr;

pub use actuator::{Actuator, TargetControl};
pub use actuator::cpu::{CpuActuator, CpuActuatorConfig};
pub use actuator::disk::{DiskActuator, DiskActuatorConfig};
pub use actuator::memory::{MemoryActuator, MemoryActuatorConfig};
pub use actuator::network::{NetworkActuator, NetworkActuatorConfig};
pub use error::{ConsumeError, ConsumeResult};
pub use pid::PidConfig;
pub use workflow::Workflow;

/// The resource kinds a control loop can drive. One actuator per kind
/// per running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::Disk,
        Resource::Network,
    ];
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Cpu => "cpu",
            Resource::Memory => "memory",
            Resource::Disk => "disk",
            Resource::Network => "network",
        };
        f.write_str(name)
    }
}

impl FromStr for Resource {
    type Err = ConsumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Resource::Cpu),
            "memory" => Ok(Resource::Memory),
            "disk" => Ok(Resource::Disk),
            "network" => Ok(Resource::Network),
            other => Err(ConsumeError::InvalidParameter(format!(
                "unknown resource \"{other}\" (expected cpu, memory, disk, or network)"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_round_trips_through_display() {
        for resource in Resource::ALL {
            assert_eq!(resource.to_string().parse::<Resource>().unwrap(), resource);
        }
    }

    #[test]
    fn unknown_resource_is_invalid_parameter() {
        let err = "gpu".parse::<Resource>().unwrap_err();
        assert!(matches!(err, ConsumeError::InvalidParameter(_)));
    }
}
