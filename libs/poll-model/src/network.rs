//! Network entity

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::Device;
use crate::fault::CommonFault;
use crate::types::TransportType;

/// Smallest poll interval a network may configure, in seconds.
pub const MIN_MAX_POLL_RATE_SECS: f64 = 0.001;

/// A Modbus network: one transport (serial port or TCP endpoint family)
/// scheduled by one poll manager while enabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    #[serde(default)]
    pub uuid: Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub enable: bool,
    pub plugin_uuid: Option<Uuid>,
    #[serde(default)]
    pub transport_type: TransportType,

    // Serial parameters (Serial / LoRa transports)
    pub serial_port: Option<String>,
    pub serial_baud_rate: Option<u32>,
    pub serial_data_bits: Option<u8>,
    pub serial_stop_bits: Option<u8>,
    pub serial_parity: Option<String>,
    /// Connect and transaction timeout in seconds.
    pub serial_timeout: Option<u64>,

    // TCP parameters (fallback when a device carries none)
    pub host: Option<String>,
    pub port: Option<u16>,

    /// Maximum poll rate in seconds; one point is drawn per tick.
    pub max_poll_rate: Option<f64>,

    #[serde(default)]
    pub has_polling_statistics: bool,
    #[serde(default)]
    pub common_fault: CommonFault,

    /// Populated by the store when fetched with descendants.
    #[serde(default)]
    pub devices: Vec<Device>,
}

impl Network {
    /// Poll tick interval in seconds, clamped to the 1 ms floor.
    pub fn poll_rate_secs(&self) -> f64 {
        self.max_poll_rate
            .unwrap_or(MIN_MAX_POLL_RATE_SECS)
            .max(MIN_MAX_POLL_RATE_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_rate_clamps_to_floor() {
        let mut net = Network::default();
        assert_eq!(net.poll_rate_secs(), MIN_MAX_POLL_RATE_SECS);
        net.max_poll_rate = Some(0.0);
        assert_eq!(net.poll_rate_secs(), MIN_MAX_POLL_RATE_SECS);
        net.max_poll_rate = Some(0.1);
        assert_eq!(net.poll_rate_secs(), 0.1);
    }
}
