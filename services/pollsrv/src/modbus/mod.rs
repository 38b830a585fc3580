//! Modbus codec and client
//!
//! Layering, bottom up: [`pdu`] builds protocol data units, [`frame`] wraps
//! them for the transport (MBAP for TCP, CRC-16 for RTU), [`connection`]
//! moves frames over `tokio` TCP/serial streams, [`codec`] converts between
//! register payloads and `f64` engine values, and [`client`] exposes the
//! typed read/write operations the polling loop drives.

pub mod client;
pub mod codec;
pub mod connection;
pub mod frame;
pub mod pdu;

pub use client::{ModbusClient, RegisterType, TransportTarget};
pub use codec::{Endianness, WordOrder};
