//! Typed Modbus client
//!
//! One client per network, reused across polls. Holds the transport target,
//! slave id and encoding, and exposes the typed read/write primitives the
//! polling loop drives. Values cross the engine boundary as `f64`.

use std::time::Duration;

use poll_model::DataType;
use tracing::debug;

use super::codec::{self, Endianness, WordOrder};
use super::connection::{ModbusConnection, SerialParams};
use super::frame::{FrameMode, FrameProcessor};
use super::pdu::{ModbusPdu, PduBuilder};
use crate::error::{PollError, Result};

/// Where the client's frames go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportTarget {
    Tcp { host: String, port: u16 },
    Rtu(SerialParams),
}

/// Register family for the float read helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterType {
    Holding,
    Input,
}

/// Modbus client over one transport.
#[derive(Debug)]
pub struct ModbusClient {
    target: TransportTarget,
    timeout: Duration,
    slave_id: u8,
    endianness: Endianness,
    word_order: WordOrder,
    zero_mode: bool,
    connection: Option<ModbusConnection>,
    frames: FrameProcessor,
}

impl ModbusClient {
    pub fn new(target: TransportTarget, timeout: Duration) -> Self {
        let mode = match target {
            TransportTarget::Tcp { .. } => FrameMode::Tcp,
            TransportTarget::Rtu(_) => FrameMode::Rtu,
        };
        Self {
            target,
            timeout,
            slave_id: 1,
            endianness: Endianness::Big,
            word_order: WordOrder::LowFirst,
            zero_mode: false,
            connection: None,
            frames: FrameProcessor::new(mode),
        }
    }

    /// Set the encoding of subsequent requests.
    pub fn set_encoding(&mut self, endianness: Endianness, word_order: WordOrder) {
        self.endianness = endianness;
        self.word_order = word_order;
    }

    pub fn set_slave(&mut self, slave_id: u8) {
        self.slave_id = slave_id;
    }

    pub fn set_zero_mode(&mut self, zero_mode: bool) {
        self.zero_mode = zero_mode;
    }

    pub fn zero_mode(&self) -> bool {
        self.zero_mode
    }

    pub fn is_serial(&self) -> bool {
        matches!(self.target, TransportTarget::Rtu(_))
    }

    /// Repoint a TCP client at a device endpoint; drops the connection when
    /// the endpoint changed.
    pub fn set_tcp_target(&mut self, host: &str, port: u16) {
        if let TransportTarget::Tcp {
            host: ref current_host,
            port: current_port,
        } = self.target
        {
            if current_host == host && current_port == port {
                return;
            }
        }
        self.target = TransportTarget::Tcp {
            host: host.to_string(),
            port,
        };
        self.connection = None;
        self.frames.clear();
    }

    /// Establish the transport connection now instead of on first request.
    pub async fn connect(&mut self) -> Result<()> {
        self.ensure_connected().await.map(|_| ())
    }

    async fn ensure_connected(&mut self) -> Result<&mut ModbusConnection> {
        if self.connection.is_none() {
            let connection = match &self.target {
                TransportTarget::Tcp { host, port } => {
                    ModbusConnection::connect_tcp(host, *port, self.timeout).await?
                },
                TransportTarget::Rtu(params) => {
                    ModbusConnection::connect_rtu(params, self.timeout)?
                },
            };
            self.connection = Some(connection);
        }
        Ok(self.connection.as_mut().expect("connection just set"))
    }

    /// One request/response transaction. Transport errors drop the
    /// connection so the next request redials.
    async fn request(&mut self, pdu: &ModbusPdu) -> Result<ModbusPdu> {
        self.ensure_connected().await?;
        let frame = self.frames.build_frame(self.slave_id, pdu);
        let timeout = self.timeout;

        let connection = self.connection.as_mut().expect("connected above");
        let response = async {
            connection.send(&frame).await?;
            connection.receive(timeout).await
        }
        .await;

        let raw = match response {
            Ok(raw) => raw,
            Err(e) => {
                self.connection = None;
                self.frames.clear();
                return Err(e);
            },
        };

        let response = self.frames.parse_frame(&raw)?;
        if response.is_exception() {
            let code = response.exception_code().unwrap_or(0);
            return Err(PollError::transaction(format!(
                "slave exception {:02X}: {}",
                code,
                ModbusPdu::exception_description(code)
            )));
        }
        Ok(response)
    }

    /// Payload of a read response: `[fc, byte_count, data...]`.
    fn read_payload(response: &ModbusPdu) -> Result<Vec<u8>> {
        let data = response.as_slice();
        if data.len() < 2 {
            return Err(PollError::protocol("read response too short"));
        }
        let byte_count = data[1] as usize;
        let payload = &data[2..];
        if payload.len() != byte_count {
            return Err(PollError::protocol(format!(
                "read response byte count mismatch: declared {}, got {}",
                byte_count,
                payload.len()
            )));
        }
        Ok(payload.to_vec())
    }

    fn decode_registers(&self, data_type: DataType, payload: &[u8]) -> Result<f64> {
        let value = match data_type {
            DataType::Int16 => codec::decode_i16(self.endianness, payload)? as f64,
            DataType::Int32 => {
                codec::decode_i32(self.endianness, self.word_order, payload)? as f64
            },
            DataType::Uint32 => {
                codec::decode_u32(self.endianness, self.word_order, payload)? as f64
            },
            DataType::Int64 => {
                codec::decode_i64(self.endianness, self.word_order, payload)? as f64
            },
            DataType::Uint64 => {
                codec::decode_u64(self.endianness, self.word_order, payload)? as f64
            },
            DataType::Float32 => {
                codec::decode_f32(self.endianness, self.word_order, payload)? as f64
            },
            DataType::Float64 => codec::decode_f64(self.endianness, self.word_order, payload)?,
            DataType::Mod10U32 => {
                codec::decode_mod10_u32(self.endianness, self.word_order, payload)?
            },
            // digital and unknown types read as a plain uint16
            DataType::Digital | DataType::Uint16 => {
                codec::decode_u16(self.endianness, payload)? as f64
            },
        };
        Ok(value)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read coils (function code 01).
    pub async fn read_coils(&mut self, addr: u16, quantity: u16) -> Result<(Vec<u8>, f64)> {
        let pdu = PduBuilder::read_request(0x01, addr, quantity)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = payload.first().copied().unwrap_or(0) as f64;
        Ok((payload, out))
    }

    /// Read discrete inputs (function code 02).
    pub async fn read_discrete_inputs(
        &mut self,
        addr: u16,
        quantity: u16,
    ) -> Result<(Vec<u8>, f64)> {
        let pdu = PduBuilder::read_request(0x02, addr, quantity)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = payload.first().copied().unwrap_or(0) as f64;
        Ok((payload, out))
    }

    /// Read holding registers (function code 03), decoded per `data_type`.
    pub async fn read_holding_registers(
        &mut self,
        addr: u16,
        quantity: u16,
        data_type: DataType,
    ) -> Result<(Vec<u8>, f64)> {
        let pdu = PduBuilder::read_request(0x03, addr, quantity)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = self.decode_registers(data_type, &payload)?;
        Ok((payload, out))
    }

    /// Read input registers (function code 04), decoded per `data_type`.
    pub async fn read_input_registers(
        &mut self,
        addr: u16,
        quantity: u16,
        data_type: DataType,
    ) -> Result<(Vec<u8>, f64)> {
        let pdu = PduBuilder::read_request(0x04, addr, quantity)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = self.decode_registers(data_type, &payload)?;
        Ok((payload, out))
    }

    /// Read a single 32-bit float (2 registers).
    pub async fn read_float32(
        &mut self,
        addr: u16,
        register_type: RegisterType,
    ) -> Result<(Vec<u8>, f64)> {
        let fc = match register_type {
            RegisterType::Holding => 0x03,
            RegisterType::Input => 0x04,
        };
        let pdu = PduBuilder::read_request(fc, addr, 2)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = codec::decode_f32(self.endianness, self.word_order, &payload)? as f64;
        Ok((payload, out))
    }

    /// Read a single 64-bit float (4 registers).
    pub async fn read_float64(
        &mut self,
        addr: u16,
        register_type: RegisterType,
    ) -> Result<(Vec<u8>, f64)> {
        let fc = match register_type {
            RegisterType::Holding => 0x03,
            RegisterType::Input => 0x04,
        };
        let pdu = PduBuilder::read_request(fc, addr, 4)?;
        let response = self.request(&pdu).await?;
        let payload = Self::read_payload(&response)?;
        let out = codec::decode_f64(self.endianness, self.word_order, &payload)?;
        Ok((payload, out))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Write a single coil (function code 05): ON for any positive value.
    pub async fn write_coil(&mut self, addr: u16, value: f64) -> Result<(Vec<u8>, f64)> {
        let payload: u16 = if value > 0.0 { 0xFF00 } else { 0x0000 };
        let pdu = PduBuilder::new()
            .function_code(0x05)?
            .address(addr)?
            .quantity(payload)?
            .build();
        let response = self.request(&pdu).await?;
        let out = if payload == 0 { 0.0 } else { 1.0 };
        Ok((response.as_slice().to_vec(), out))
    }

    /// Write a single register (function code 06).
    ///
    /// Some devices echo the value with its bytes swapped; that specific
    /// mismatch is treated as success. Everything else propagates.
    pub async fn write_single_register(
        &mut self,
        addr: u16,
        value: u16,
    ) -> Result<(Vec<u8>, f64)> {
        let pdu = PduBuilder::new()
            .function_code(0x06)?
            .address(addr)?
            .quantity(value)?
            .build();
        let response = self.request(&pdu).await?;
        match Self::check_fc06_echo(&response, value) {
            Ok(()) => {},
            Err(PollError::WriteEchoMismatch { written, echoed }) => {
                debug!(
                    "FC06 echo mismatch tolerated: wrote {:04X}, echo {:04X}",
                    written, echoed
                );
            },
            Err(e) => return Err(e),
        }
        Ok((response.as_slice().to_vec(), value as f64))
    }

    fn check_fc06_echo(response: &ModbusPdu, written: u16) -> Result<()> {
        let data = response.as_slice();
        if data.len() < 5 {
            return Err(PollError::protocol("FC06 response too short"));
        }
        let echoed = u16::from_be_bytes([data[3], data[4]]);
        if echoed != written {
            return Err(PollError::WriteEchoMismatch { written, echoed });
        }
        Ok(())
    }

    async fn write_multiple_registers(
        &mut self,
        addr: u16,
        payload: &[u8],
    ) -> Result<Vec<u8>> {
        let quantity = (payload.len() / 2) as u16;
        let pdu = PduBuilder::new()
            .function_code(0x10)?
            .address(addr)?
            .quantity(quantity)?
            .byte(payload.len() as u8)?
            .data(payload)?
            .build();
        let response = self.request(&pdu).await?;
        Ok(response.as_slice().to_vec())
    }

    /// Write a 32-bit value across two registers (function code 16).
    pub async fn write_double_register(
        &mut self,
        addr: u16,
        value: u32,
    ) -> Result<(Vec<u8>, f64)> {
        let payload = codec::encode_u32(self.endianness, self.word_order, value);
        let raw = self.write_multiple_registers(addr, &payload).await?;
        Ok((raw, value as f64))
    }

    /// Write a 64-bit value across four registers (function code 16).
    pub async fn write_quad_register(
        &mut self,
        addr: u16,
        value: u64,
    ) -> Result<(Vec<u8>, f64)> {
        let payload = codec::encode_u64(self.endianness, self.word_order, value);
        let raw = self.write_multiple_registers(addr, &payload).await?;
        Ok((raw, value as f64))
    }

    /// Write a 32-bit float across two registers (function code 16).
    pub async fn write_float32(&mut self, addr: u16, value: f64) -> Result<(Vec<u8>, f64)> {
        let payload = codec::encode_f32(self.endianness, self.word_order, value as f32);
        let raw = self.write_multiple_registers(addr, &payload).await?;
        Ok((raw, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_target_change_drops_connection_state() {
        let mut client = ModbusClient::new(
            TransportTarget::Tcp {
                host: "10.0.0.1".into(),
                port: 502,
            },
            Duration::from_secs(1),
        );
        client.set_tcp_target("10.0.0.1", 502);
        assert_eq!(
            client.target,
            TransportTarget::Tcp {
                host: "10.0.0.1".into(),
                port: 502
            }
        );
        client.set_tcp_target("10.0.0.2", 503);
        assert_eq!(
            client.target,
            TransportTarget::Tcp {
                host: "10.0.0.2".into(),
                port: 503
            }
        );
    }

    #[test]
    fn fc06_echo_validation() {
        // FC06 echo: [fc, addr hi, addr lo, value hi, value lo]
        let ok = ModbusPdu::from_slice(&[0x06, 0x00, 0x01, 0x12, 0x34]).unwrap();
        assert!(ModbusClient::check_fc06_echo(&ok, 0x1234).is_ok());

        let swapped = ModbusPdu::from_slice(&[0x06, 0x00, 0x01, 0x34, 0x12]).unwrap();
        let err = ModbusClient::check_fc06_echo(&swapped, 0x1234).unwrap_err();
        assert!(matches!(
            err,
            PollError::WriteEchoMismatch {
                written: 0x1234,
                echoed: 0x3412
            }
        ));
    }

    #[test]
    fn read_payload_checks_byte_count() {
        let response = ModbusPdu::from_slice(&[0x03, 0x02, 0x00, 0x2A]).unwrap();
        assert_eq!(
            ModbusClient::read_payload(&response).unwrap(),
            vec![0x00, 0x2A]
        );

        let bad = ModbusPdu::from_slice(&[0x03, 0x04, 0x00, 0x2A]).unwrap();
        assert!(ModbusClient::read_payload(&bad).is_err());
    }
}
