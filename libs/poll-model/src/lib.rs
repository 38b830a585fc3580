//! Catalog data model for the Modbus polling engine
//!
//! Entities (`Network` / `Device` / `Point`), the enumerations they carry,
//! fault bookkeeping and the DTOs exchanged with the store and the HTTP
//! surface. This crate holds no behaviour beyond defaulting and validation
//! helpers; the scheduling and wire logic lives in `pollsrv`.

pub mod device;
pub mod dto;
pub mod fault;
pub mod network;
pub mod point;
pub mod types;

pub use device::Device;
pub use dto::{Plugin, PointWriteResult, PointWriter, PollQueueStatistics};
pub use fault::{CommonFault, FaultCode, MessageLevel};
pub use network::Network;
pub use point::Point;
pub use types::{
    DataType, ObjectEncoding, ObjectType, PointState, PollPriority, PollRate, TransportType,
    WriteMode,
};
