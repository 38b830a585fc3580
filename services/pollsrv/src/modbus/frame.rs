//! Transport framing
//!
//! TCP wraps PDUs in an MBAP header; RTU prefixes the unit id and appends a
//! CRC-16. The engine keeps at most one transaction in flight per network
//! (enforced upstream by the single-slot pipeline), so response validation
//! only needs to match the one outstanding request.

use tracing::debug;

use super::pdu::ModbusPdu;
use crate::error::{PollError, Result};

/// MBAP header length: transaction id (2) + protocol id (2) + length (2) +
/// unit id (1).
pub const MBAP_HEADER_LEN: usize = 7;

/// Framing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    Tcp,
    Rtu,
}

/// The request the processor is waiting on.
#[derive(Debug, Clone, Copy)]
struct Outstanding {
    transaction_id: u16,
    function_code: u8,
    unit_id: u8,
}

/// Builds request frames and validates response frames.
#[derive(Debug)]
pub struct FrameProcessor {
    mode: FrameMode,
    next_transaction_id: u16,
    outstanding: Option<Outstanding>,
}

impl FrameProcessor {
    pub fn new(mode: FrameMode) -> Self {
        Self {
            mode,
            next_transaction_id: 1,
            outstanding: None,
        }
    }

    pub fn mode(&self) -> FrameMode {
        self.mode
    }

    fn next_transaction_id(&mut self) -> u16 {
        let id = self.next_transaction_id;
        self.next_transaction_id = self.next_transaction_id.wrapping_add(1);
        id
    }

    /// Build a complete frame for `pdu` addressed to `unit_id` and record it
    /// as the outstanding request.
    pub fn build_frame(&mut self, unit_id: u8, pdu: &ModbusPdu) -> Vec<u8> {
        let function_code = pdu.function_code().unwrap_or(0);
        let transaction_id = self.next_transaction_id();
        self.outstanding = Some(Outstanding {
            transaction_id,
            function_code,
            unit_id,
        });

        match self.mode {
            FrameMode::Tcp => {
                let length = (pdu.len() + 1) as u16; // unit id + PDU
                let mut frame = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
                frame.extend_from_slice(&transaction_id.to_be_bytes());
                frame.extend_from_slice(&0u16.to_be_bytes()); // protocol id
                frame.extend_from_slice(&length.to_be_bytes());
                frame.push(unit_id);
                frame.extend_from_slice(pdu.as_slice());
                debug!(
                    "TCP frame: trans_id={:04X}, unit_id={}, FC={:02X}, pdu_len={}",
                    transaction_id,
                    unit_id,
                    function_code,
                    pdu.len()
                );
                frame
            },
            FrameMode::Rtu => {
                let mut frame = Vec::with_capacity(1 + pdu.len() + 2);
                frame.push(unit_id);
                frame.extend_from_slice(pdu.as_slice());
                let crc = crc16(&frame);
                frame.extend_from_slice(&crc.to_le_bytes());
                debug!(
                    "RTU frame: unit_id={}, FC={:02X}, pdu_len={}, CRC={:04X}",
                    unit_id,
                    function_code,
                    pdu.len(),
                    crc
                );
                frame
            },
        }
    }

    /// Parse a response frame and validate it against the outstanding
    /// request. Returns the response PDU (possibly an exception PDU).
    pub fn parse_frame(&mut self, data: &[u8]) -> Result<ModbusPdu> {
        let outstanding = self
            .outstanding
            .take()
            .ok_or_else(|| PollError::protocol("response with no outstanding request"))?;

        match self.mode {
            FrameMode::Tcp => Self::parse_tcp(outstanding, data),
            FrameMode::Rtu => Self::parse_rtu(outstanding, data),
        }
    }

    fn parse_tcp(outstanding: Outstanding, data: &[u8]) -> Result<ModbusPdu> {
        if data.len() < MBAP_HEADER_LEN + 1 {
            return Err(PollError::protocol("TCP frame too short"));
        }

        let transaction_id = u16::from_be_bytes([data[0], data[1]]);
        let protocol_id = u16::from_be_bytes([data[2], data[3]]);
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let unit_id = data[6];

        if protocol_id != 0 {
            return Err(PollError::protocol(format!(
                "invalid protocol ID: expected 0, got {protocol_id}"
            )));
        }
        if data.len() != MBAP_HEADER_LEN + length {
            return Err(PollError::protocol(format!(
                "invalid TCP frame length: expected {}, got {}",
                MBAP_HEADER_LEN + length,
                data.len()
            )));
        }
        if transaction_id != outstanding.transaction_id {
            return Err(PollError::transaction(format!(
                "transaction ID mismatch: expected {:04X}, got {:04X}",
                outstanding.transaction_id, transaction_id
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[MBAP_HEADER_LEN..])?;
        Self::validate_response(outstanding, unit_id, &pdu)?;
        Ok(pdu)
    }

    fn parse_rtu(outstanding: Outstanding, data: &[u8]) -> Result<ModbusPdu> {
        if data.len() < 4 {
            return Err(PollError::protocol("RTU frame too short"));
        }

        let frame_len = data.len();
        let unit_id = data[0];
        let received_crc = u16::from_le_bytes([data[frame_len - 2], data[frame_len - 1]]);
        let calculated_crc = crc16(&data[..frame_len - 2]);
        if received_crc != calculated_crc {
            return Err(PollError::transaction(format!(
                "CRC mismatch: expected {calculated_crc:#06X}, got {received_crc:#06X}"
            )));
        }

        let pdu = ModbusPdu::from_slice(&data[1..frame_len - 2])?;
        Self::validate_response(outstanding, unit_id, &pdu)?;
        Ok(pdu)
    }

    fn validate_response(outstanding: Outstanding, unit_id: u8, pdu: &ModbusPdu) -> Result<()> {
        if unit_id != outstanding.unit_id {
            return Err(PollError::transaction(format!(
                "response from unexpected unit: expected {}, got {}",
                outstanding.unit_id, unit_id
            )));
        }
        let response_fc = pdu.function_code().map(|fc| fc & 0x7F).unwrap_or(0);
        if response_fc != outstanding.function_code {
            return Err(PollError::transaction(format!(
                "function code mismatch: expected {:02X}, got {:02X}",
                outstanding.function_code, response_fc
            )));
        }
        Ok(())
    }

    /// Drop the outstanding request (connection reset, timeout).
    pub fn clear(&mut self) {
        self.outstanding = None;
    }
}

/// CRC-16 over the frame body, Modbus RTU polynomial 0xA001.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc >>= 1;
                crc ^= 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::pdu::PduBuilder;

    #[test]
    fn tcp_frame_build_parse() {
        let mut processor = FrameProcessor::new(FrameMode::Tcp);
        let pdu = PduBuilder::read_request(0x03, 0x0001, 2).unwrap();

        let frame = processor.build_frame(1, &pdu);
        assert_eq!(frame.len(), MBAP_HEADER_LEN + 5);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), 0); // protocol id
        assert_eq!(frame[6], 1); // unit id

        // a loopback of the request parses as a valid "response"
        let parsed = processor.parse_frame(&frame).unwrap();
        assert_eq!(parsed.as_slice(), pdu.as_slice());
    }

    #[test]
    fn rtu_frame_build_parse() {
        let mut processor = FrameProcessor::new(FrameMode::Rtu);
        let pdu = PduBuilder::read_request(0x03, 0x0001, 2).unwrap();

        let frame = processor.build_frame(7, &pdu);
        assert_eq!(frame.len(), 1 + 5 + 2);
        assert_eq!(frame[0], 7);

        let parsed = processor.parse_frame(&frame).unwrap();
        assert_eq!(parsed.as_slice(), pdu.as_slice());
    }

    #[test]
    fn crc16_known_vector() {
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(crc16(&data), 0x0A84);
    }

    #[test]
    fn crc16_empty_is_initial_value() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn rtu_rejects_bad_crc() {
        let mut processor = FrameProcessor::new(FrameMode::Rtu);
        let pdu = PduBuilder::read_request(0x03, 0x0000, 1).unwrap();
        processor.build_frame(1, &pdu);

        let bad = [0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFF];
        let err = processor.parse_frame(&bad).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn tcp_rejects_wrong_transaction_id() {
        let mut processor = FrameProcessor::new(FrameMode::Tcp);
        let pdu = PduBuilder::read_request(0x03, 0x0000, 1).unwrap();
        let mut frame = processor.build_frame(1, &pdu);
        frame[1] = frame[1].wrapping_add(1); // corrupt transaction id

        let err = processor.parse_frame(&frame).unwrap_err();
        assert!(err.to_string().contains("transaction ID"));
    }

    #[test]
    fn response_from_wrong_unit_rejected() {
        let mut processor = FrameProcessor::new(FrameMode::Rtu);
        let pdu = PduBuilder::read_request(0x01, 0x0000, 8).unwrap();
        processor.build_frame(1, &pdu);

        // same PDU echoed from unit 2
        let mut frame = vec![0x02];
        frame.extend_from_slice(pdu.as_slice());
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let err = processor.parse_frame(&frame).unwrap_err();
        assert!(err.to_string().contains("unexpected unit"));
    }

    #[test]
    fn transaction_ids_wrap() {
        let mut processor = FrameProcessor::new(FrameMode::Tcp);
        processor.next_transaction_id = 0xFFFF;
        assert_eq!(processor.next_transaction_id(), 0xFFFF);
        assert_eq!(processor.next_transaction_id(), 0x0000);
    }
}
