//! Point entity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::CommonFault;
use crate::types::{DataType, ObjectEncoding, ObjectType, PollPriority, PollRate, WriteMode};

/// A single Modbus object polled on a device.
///
/// While the point is enabled (on an enabled device on an enabled network)
/// exactly one polling point references it in the network queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Point {
    #[serde(default)]
    pub uuid: Uuid,
    #[serde(default)]
    pub device_uuid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,

    pub object_type: ObjectType,
    #[serde(default)]
    pub data_type: DataType,
    pub object_encoding: Option<ObjectEncoding>,
    /// Register number, valid range 1..=65535. The wire address is
    /// `address_id - 1` unless the device is in zero mode.
    pub address_id: Option<u32>,
    pub address_length: Option<u16>,

    #[serde(default)]
    pub poll_priority: PollPriority,
    #[serde(default)]
    pub poll_rate: PollRate,
    #[serde(default)]
    pub write_mode: WriteMode,

    pub write_value: Option<f64>,
    pub original_value: Option<f64>,
    pub present_value: Option<f64>,

    #[serde(default)]
    pub write_poll_required: bool,
    #[serde(default)]
    pub read_poll_required: bool,
    #[serde(default)]
    pub enable_writeable: bool,

    #[serde(default)]
    pub is_bitwise: bool,
    pub bitwise_index: Option<i32>,

    /// Defaults to true when unset: the point is pushed straight onto the
    /// priority queue on startup instead of waiting out a repoll delay.
    pub poll_on_startup: Option<bool>,

    #[serde(default)]
    pub is_type_bool: bool,
    #[serde(default)]
    pub is_output: bool,

    #[serde(default)]
    pub common_fault: CommonFault,
}

impl Default for Point {
    fn default() -> Self {
        Point {
            uuid: Uuid::nil(),
            device_uuid: Uuid::nil(),
            name: String::new(),
            enable: false,
            object_type: ObjectType::HoldingRegister,
            data_type: DataType::default(),
            object_encoding: None,
            address_id: None,
            address_length: None,
            poll_priority: PollPriority::default(),
            poll_rate: PollRate::default(),
            write_mode: WriteMode::default(),
            write_value: None,
            original_value: None,
            present_value: None,
            write_poll_required: false,
            read_poll_required: false,
            enable_writeable: false,
            is_bitwise: false,
            bitwise_index: None,
            poll_on_startup: None,
            is_type_bool: false,
            is_output: false,
            common_fault: CommonFault::default(),
        }
    }
}

impl Point {
    /// Unset means poll on startup.
    pub fn poll_on_startup(&self) -> bool {
        self.poll_on_startup.unwrap_or(true)
    }

    /// True when this point addresses a single bit of a register value.
    pub fn bitwise(&self) -> bool {
        self.is_bitwise && self.bitwise_index.is_some_and(|idx| idx >= 0)
    }

    /// Register numbers are 1-based and capped at the Modbus address space.
    pub fn valid_address(&self) -> bool {
        self.address_id.is_some_and(|a| (1..=65535).contains(&a))
    }

    /// Whether both the write mode and the object type accept writes.
    pub fn is_writeable(&self) -> bool {
        self.write_mode.is_writeable() && self.object_type.is_writeable()
    }

    /// Clear the writeable-related properties; used when a point is
    /// reconfigured to a non-writeable mode or object type.
    pub fn reset_writeable_properties(&mut self) {
        self.write_value = None;
        self.enable_writeable = false;
        self.write_poll_required = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_on_startup_defaults_true() {
        let mut pnt = Point::default();
        assert!(pnt.poll_on_startup());
        pnt.poll_on_startup = Some(false);
        assert!(!pnt.poll_on_startup());
    }

    #[test]
    fn bitwise_requires_non_negative_index() {
        let mut pnt = Point {
            is_bitwise: true,
            ..Point::default()
        };
        assert!(!pnt.bitwise());
        pnt.bitwise_index = Some(-1);
        assert!(!pnt.bitwise());
        pnt.bitwise_index = Some(0);
        assert!(pnt.bitwise());
    }

    #[test]
    fn writeable_needs_mode_and_object_type() {
        let mut pnt = Point {
            write_mode: WriteMode::WriteAlways,
            object_type: ObjectType::DiscreteInput,
            ..Point::default()
        };
        assert!(!pnt.is_writeable());
        pnt.object_type = ObjectType::HoldingRegister;
        assert!(pnt.is_writeable());
        pnt.write_mode = WriteMode::ReadOnly;
        assert!(!pnt.is_writeable());
    }
}
