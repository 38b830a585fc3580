//! Device entity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fault::CommonFault;
use crate::point::Point;

/// A slave device on a network, addressed by its Modbus unit id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub uuid: Uuid,
    #[serde(default)]
    pub network_uuid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    /// Modbus unit id, valid range 1..=254.
    #[serde(default)]
    pub address_id: u8,

    // TCP endpoint for IP networks
    pub host: Option<String>,
    pub port: Option<u16>,

    /// When set, register addresses are written to the wire as-is instead
    /// of `address_id - 1`.
    #[serde(default)]
    pub zero_mode: bool,

    // Poll rate class durations in seconds
    pub fast_poll_rate: Option<f64>,
    pub normal_poll_rate: Option<f64>,
    pub slow_poll_rate: Option<f64>,

    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub common_fault: CommonFault,

    /// Populated by the store when fetched with descendants.
    #[serde(default)]
    pub points: Vec<Point>,
}

impl Device {
    /// Unit ids 1..=254 are addressable; 0 is broadcast, 255 is reserved.
    pub fn valid_address(&self) -> bool {
        (1..=254).contains(&self.address_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_range() {
        let mut dev = Device::default();
        assert!(!dev.valid_address());
        dev.address_id = 1;
        assert!(dev.valid_address());
        dev.address_id = 254;
        assert!(dev.valid_address());
        dev.address_id = 255;
        assert!(!dev.valid_address());
    }
}
