//! Mappings between wire enums and domain types.
//!
//! Unknown or unspecified wire values are caller mistakes and surface
//! as `InvalidParameter`, with one exception: an unspecified unit means
//! "use the resource's default unit" and maps to `None`.

use loadgrid_consume::{ConsumeError, ConsumeResult, Resource};
use loadgrid_units::Unit;

use crate::proto;

pub fn resource_from_proto(raw: i32) -> ConsumeResult<Resource> {
    let resource = proto::Resource::try_from(raw)
        .map_err(|_| ConsumeError::InvalidParameter(format!("unknown resource value {raw}")))?;
    match resource {
        proto::Resource::Cpu => Ok(Resource::Cpu),
        proto::Resource::Memory => Ok(Resource::Memory),
        proto::Resource::Disk => Ok(Resource::Disk),
        proto::Resource::Network => Ok(Resource::Network),
        proto::Resource::Unspecified => Err(ConsumeError::InvalidParameter(
            "usage entry is missing a resource".to_string(),
        )),
    }
}

pub fn resource_to_proto(resource: Resource) -> proto::Resource {
    match resource {
        Resource::Cpu => proto::Resource::Cpu,
        Resource::Memory => proto::Resource::Memory,
        Resource::Disk => proto::Resource::Disk,
        Resource::Network => proto::Resource::Network,
    }
}

pub fn unit_from_proto(raw: i32) -> ConsumeResult<Option<Unit>> {
    let unit = proto::Unit::try_from(raw)
        .map_err(|_| ConsumeError::InvalidParameter(format!("unknown unit value {raw}")))?;
    Ok(match unit {
        proto::Unit::Unspecified => None,
        proto::Unit::Percentage => Some(Unit::Percentage),
        proto::Unit::Bytes => Some(Unit::Bytes),
        proto::Unit::Kilobytes => Some(Unit::Kilobytes),
        proto::Unit::Megabytes => Some(Unit::Megabytes),
        proto::Unit::Gigabytes => Some(Unit::Gigabytes),
        proto::Unit::Vcpu => Some(Unit::Vcpu),
        proto::Unit::BytesPerSecond => Some(Unit::BytesPerSecond),
        proto::Unit::KilobytesPerSecond => Some(Unit::KilobytesPerSecond),
        proto::Unit::MegabytesPerSecond => Some(Unit::MegabytesPerSecond),
    })
}

pub fn unit_to_proto(unit: Unit) -> proto::Unit {
    match unit {
        Unit::Percentage => proto::Unit::Percentage,
        Unit::Bytes => proto::Unit::Bytes,
        Unit::Kilobytes => proto::Unit::Kilobytes,
        Unit::Megabytes => proto::Unit::Megabytes,
        Unit::Gigabytes => proto::Unit::Gigabytes,
        Unit::Vcpu => proto::Unit::Vcpu,
        Unit::BytesPerSecond => proto::Unit::BytesPerSecond,
        Unit::KilobytesPerSecond => proto::Unit::KilobytesPerSecond,
        Unit::MegabytesPerSecond => proto::Unit::MegabytesPerSecond,
    }
}
