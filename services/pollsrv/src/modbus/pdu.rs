//! Modbus PDU data structure
//!
//! Fixed-size stack buffer; a PDU never exceeds 253 bytes by spec.

use crate::error::{PollError, Result};

/// Maximum PDU size per the Modbus specification.
pub const MAX_PDU_SIZE: usize = 253;

/// A protocol data unit: function code followed by data.
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    /// Create a PDU from a byte slice.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(PollError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    /// Push a single byte.
    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(PollError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    /// Push a u16 in big-endian wire order.
    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        self.push((value >> 8) as u8)?;
        self.push((value & 0xFF) as u8)
    }

    /// Extend with a byte slice.
    pub fn extend(&mut self, data: &[u8]) -> Result<()> {
        if self.len + data.len() > MAX_PDU_SIZE {
            return Err(PollError::protocol(format!(
                "PDU would exceed max size: {} + {} > {}",
                self.len,
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        self.data[self.len..self.len + data.len()].copy_from_slice(data);
        self.len += data.len();
        Ok(())
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Function code (first byte).
    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        self.as_slice().first().copied()
    }

    /// True when the exception bit is set on the function code.
    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    /// Exception code of an exception response.
    #[inline]
    pub fn exception_code(&self) -> Option<u8> {
        if self.is_exception() && self.len > 1 {
            Some(self.data[1])
        } else {
            None
        }
    }

    /// Human-readable description of a slave exception code.
    pub fn exception_description(code: u8) -> &'static str {
        match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x07 => "Negative Acknowledge",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

/// Fluent PDU builder.
pub struct PduBuilder {
    pdu: ModbusPdu,
}

impl PduBuilder {
    #[inline]
    pub fn new() -> Self {
        Self {
            pdu: ModbusPdu::new(),
        }
    }

    #[inline]
    pub fn function_code(mut self, fc: u8) -> Result<Self> {
        self.pdu.push(fc)?;
        Ok(self)
    }

    #[inline]
    pub fn address(mut self, addr: u16) -> Result<Self> {
        self.pdu.push_u16(addr)?;
        Ok(self)
    }

    #[inline]
    pub fn quantity(mut self, qty: u16) -> Result<Self> {
        self.pdu.push_u16(qty)?;
        Ok(self)
    }

    #[inline]
    pub fn byte(mut self, b: u8) -> Result<Self> {
        self.pdu.push(b)?;
        Ok(self)
    }

    #[inline]
    pub fn data(mut self, data: &[u8]) -> Result<Self> {
        self.pdu.extend(data)?;
        Ok(self)
    }

    #[inline]
    pub fn build(self) -> ModbusPdu {
        self.pdu
    }

    /// Build a read request PDU for FC01-04.
    pub fn read_request(fc: u8, start_address: u16, quantity: u16) -> Result<ModbusPdu> {
        if !matches!(fc, 0x01..=0x04) {
            return Err(PollError::protocol(format!(
                "read_request only supports FC01-04, got FC{fc:02X}"
            )));
        }
        PduBuilder::new()
            .function_code(fc)?
            .address(start_address)?
            .quantity(quantity)
            .map(|b| b.build())
    }
}

impl Default for PduBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_layout() {
        let pdu = PduBuilder::read_request(0x03, 0x0010, 2).unwrap();
        assert_eq!(pdu.as_slice(), &[0x03, 0x00, 0x10, 0x00, 0x02]);
        assert_eq!(pdu.function_code(), Some(0x03));
        assert!(!pdu.is_exception());
    }

    #[test]
    fn read_request_rejects_write_codes() {
        assert!(PduBuilder::read_request(0x06, 0, 1).is_err());
    }

    #[test]
    fn exception_pdu() {
        let pdu = ModbusPdu::from_slice(&[0x83, 0x02]).unwrap();
        assert!(pdu.is_exception());
        assert_eq!(pdu.exception_code(), Some(0x02));
        assert_eq!(
            ModbusPdu::exception_description(0x02),
            "Illegal Data Address"
        );
    }

    #[test]
    fn size_limit_enforced() {
        let big = [0u8; MAX_PDU_SIZE + 1];
        assert!(ModbusPdu::from_slice(&big).is_err());

        let mut pdu = ModbusPdu::new();
        for _ in 0..MAX_PDU_SIZE {
            pdu.push(0xAA).unwrap();
        }
        assert!(pdu.push(0xAA).is_err());
    }
}
