//! Enumerations shared across the catalog and the polling engine

use serde::{Deserialize, Serialize};

/// Network transport kind. LoRa gateways speak Modbus RTU over a serial
/// bridge, so they are scheduled and framed exactly like `Serial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Serial,
    #[serde(rename = "ip")]
    Ip,
    #[serde(rename = "lora")]
    LoRa,
}

impl TransportType {
    /// True for transports that go through a serial port handler.
    pub fn is_serial(&self) -> bool {
        matches!(self, TransportType::Serial | TransportType::LoRa)
    }
}

impl Default for TransportType {
    fn default() -> Self {
        TransportType::Ip
    }
}

/// Canonical Modbus object types.
///
/// Older catalogs carried read/write-flavoured aliases (`read_coil`,
/// `write_holdings`, ...); these are accepted on deserialization and by
/// [`ObjectType::from_legacy`], and collapse onto the four canonical types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    #[serde(alias = "read_coil", alias = "read_coils", alias = "write_coil", alias = "write_coils")]
    Coil,
    #[serde(alias = "read_discrete_input", alias = "read_discrete_inputs")]
    DiscreteInput,
    #[serde(alias = "read_register", alias = "read_registers")]
    InputRegister,
    #[serde(
        alias = "read_holding",
        alias = "read_holdings",
        alias = "write_holding",
        alias = "write_holdings",
        alias = "write_int_16",
        alias = "write_uint_16",
        alias = "write_float_32"
    )]
    HoldingRegister,
}

impl ObjectType {
    /// Collapse a legacy object-type name onto the canonical type.
    /// Unknown names fall back to `HoldingRegister`, matching the
    /// historical behaviour of the catalogs this engine inherits.
    pub fn from_legacy(name: &str) -> ObjectType {
        match name {
            "coil" | "read_coil" | "read_coils" | "write_coil" | "write_coils" => ObjectType::Coil,
            "discrete_input" | "read_discrete_input" | "read_discrete_inputs" => {
                ObjectType::DiscreteInput
            },
            "input_register" | "read_register" | "read_registers" => ObjectType::InputRegister,
            _ => ObjectType::HoldingRegister,
        }
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Coil => "coil",
            ObjectType::DiscreteInput => "discrete_input",
            ObjectType::InputRegister => "input_register",
            ObjectType::HoldingRegister => "holding_register",
        }
    }

    /// Object types that accept writes (coils via FC05, holdings via FC06/16).
    pub fn is_writeable(&self) -> bool {
        matches!(self, ObjectType::Coil | ObjectType::HoldingRegister)
    }

    /// Object types whose values are inherently boolean.
    pub fn is_boolean(&self) -> bool {
        matches!(self, ObjectType::Coil | ObjectType::DiscreteInput)
    }
}

/// Point payload data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Digital,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
    #[serde(rename = "mod10_u32", alias = "mod10-u32")]
    Mod10U32,
}

impl DataType {
    /// Number of 16-bit registers this type occupies on the wire.
    pub fn register_count(&self) -> u16 {
        match self {
            DataType::Digital | DataType::Int16 | DataType::Uint16 => 1,
            DataType::Int32 | DataType::Uint32 | DataType::Float32 | DataType::Mod10U32 => 2,
            DataType::Int64 | DataType::Uint64 | DataType::Float64 => 4,
        }
    }
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Uint16
    }
}

/// Per-point write-mode policy consumed by the completion-hook state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    ReadOnce,
    ReadOnly,
    WriteOnce,
    WriteOnceReadOnce,
    WriteAlways,
    WriteOnceThenRead,
    WriteAndMaintain,
}

impl WriteMode {
    /// Write modes that ever issue a write transaction.
    pub fn is_writeable(&self) -> bool {
        match self {
            WriteMode::ReadOnce | WriteMode::ReadOnly => false,
            WriteMode::WriteOnce
            | WriteMode::WriteOnceReadOnce
            | WriteMode::WriteAlways
            | WriteMode::WriteOnceThenRead
            | WriteMode::WriteAndMaintain => true,
        }
    }
}

impl Default for WriteMode {
    fn default() -> Self {
        WriteMode::ReadOnly
    }
}

/// Poll queue priority class. Lower rank is drawn first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollPriority {
    Asap,
    High,
    Normal,
    Low,
}

impl PollPriority {
    /// Heap ordering rank: ASAP=0, High=1, Normal=2, Low=3.
    pub fn rank(&self) -> u8 {
        match self {
            PollPriority::Asap => 0,
            PollPriority::High => 1,
            PollPriority::Normal => 2,
            PollPriority::Low => 3,
        }
    }
}

impl Default for PollPriority {
    fn default() -> Self {
        PollPriority::Normal
    }
}

/// Poll rate class, resolved per device into a repoll duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollRate {
    Fast,
    Normal,
    Slow,
}

impl Default for PollRate {
    fn default() -> Self {
        PollRate::Normal
    }
}

/// Register byte/word encoding, byte-order first then word-order:
/// `beb`/`leb` = big/little endian bytes, `bew`/`lew` = high/low word first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectEncoding {
    /// ABCD
    BebBew,
    /// BADC
    LebBew,
    /// CDAB
    BebLew,
    /// DCBA
    LebLew,
}

impl Default for ObjectEncoding {
    /// Historical catalogs default to big-endian bytes with the low word
    /// first (CDAB), the most common Modbus device layout.
    fn default() -> Self {
        ObjectEncoding::BebLew
    }
}

/// Poll outcome recorded on a point by a store write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointState {
    PollOk,
    PollError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_object_types_collapse_to_canonical() {
        assert_eq!(ObjectType::from_legacy("read_coil"), ObjectType::Coil);
        assert_eq!(ObjectType::from_legacy("write_coils"), ObjectType::Coil);
        assert_eq!(
            ObjectType::from_legacy("read_discrete_inputs"),
            ObjectType::DiscreteInput
        );
        assert_eq!(
            ObjectType::from_legacy("read_registers"),
            ObjectType::InputRegister
        );
        assert_eq!(
            ObjectType::from_legacy("write_holdings"),
            ObjectType::HoldingRegister
        );
        // unknown names fall back to holding registers
        assert_eq!(
            ObjectType::from_legacy("bogus"),
            ObjectType::HoldingRegister
        );
    }

    #[test]
    fn legacy_conversion_is_idempotent() {
        for alias in [
            "coil",
            "read_coil",
            "read_coils",
            "write_coil",
            "write_coils",
            "discrete_input",
            "read_discrete_input",
            "read_discrete_inputs",
            "input_register",
            "read_register",
            "read_registers",
            "holding_register",
            "read_holding",
            "read_holdings",
            "write_holding",
            "write_holdings",
        ] {
            let once = ObjectType::from_legacy(alias);
            let twice = ObjectType::from_legacy(once.as_str());
            assert_eq!(once, twice, "alias {alias} must be stable");
        }
    }

    #[test]
    fn object_type_deserializes_aliases() {
        let ot: ObjectType = serde_json::from_str("\"write_holding\"").unwrap();
        assert_eq!(ot, ObjectType::HoldingRegister);
        let ot: ObjectType = serde_json::from_str("\"read_coils\"").unwrap();
        assert_eq!(ot, ObjectType::Coil);
    }

    #[test]
    fn priority_ranks_are_ordered() {
        assert!(PollPriority::Asap.rank() < PollPriority::High.rank());
        assert!(PollPriority::High.rank() < PollPriority::Normal.rank());
        assert!(PollPriority::Normal.rank() < PollPriority::Low.rank());
    }

    #[test]
    fn register_counts_per_data_type() {
        assert_eq!(DataType::Uint16.register_count(), 1);
        assert_eq!(DataType::Int32.register_count(), 2);
        assert_eq!(DataType::Mod10U32.register_count(), 2);
        assert_eq!(DataType::Float32.register_count(), 2);
        assert_eq!(DataType::Uint64.register_count(), 4);
        assert_eq!(DataType::Float64.register_count(), 4);
    }

    #[test]
    fn writeable_write_modes() {
        assert!(!WriteMode::ReadOnce.is_writeable());
        assert!(!WriteMode::ReadOnly.is_writeable());
        assert!(WriteMode::WriteOnce.is_writeable());
        assert!(WriteMode::WriteAndMaintain.is_writeable());
    }
}
