//! Register payload codec
//!
//! Modbus moves 16-bit registers; devices disagree on the byte order inside
//! each register and on the word order when registers combine into 32/64-bit
//! values. The engine normalizes both through the point's object encoding:
//! `beb`/`leb` selects the register byte order, `bew`/`lew` selects whether
//! the high or the low word arrives first.

use poll_model::ObjectEncoding;

use crate::error::{PollError, Result};

/// Byte order of the two bytes inside each 16-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Big,
    Little,
}

/// Word order of 16-bit registers combining into 32/64-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    HighFirst,
    LowFirst,
}

/// Map a point's object encoding onto codec parameters.
/// Absent encodings default to big-endian bytes, low word first.
pub fn encoding_params(encoding: Option<ObjectEncoding>) -> (Endianness, WordOrder) {
    match encoding.unwrap_or_default() {
        ObjectEncoding::BebBew => (Endianness::Big, WordOrder::HighFirst),
        ObjectEncoding::LebBew => (Endianness::Little, WordOrder::HighFirst),
        ObjectEncoding::BebLew => (Endianness::Big, WordOrder::LowFirst),
        ObjectEncoding::LebLew => (Endianness::Little, WordOrder::LowFirst),
    }
}

/// Split a register payload into 16-bit registers.
pub fn registers_from_payload(endianness: Endianness, payload: &[u8]) -> Result<Vec<u16>> {
    if payload.is_empty() || payload.len() % 2 != 0 {
        return Err(PollError::protocol(format!(
            "register payload must be a non-empty multiple of 2 bytes, got {}",
            payload.len()
        )));
    }
    Ok(payload
        .chunks_exact(2)
        .map(|pair| match endianness {
            Endianness::Big => u16::from_be_bytes([pair[0], pair[1]]),
            Endianness::Little => u16::from_le_bytes([pair[0], pair[1]]),
        })
        .collect())
}

/// Arrange registers most-significant word first.
fn words_high_first(word_order: WordOrder, registers: &[u16]) -> Vec<u16> {
    match word_order {
        WordOrder::HighFirst => registers.to_vec(),
        WordOrder::LowFirst => registers.iter().rev().copied().collect(),
    }
}

fn registers_to_payload(endianness: Endianness, registers: &[u16]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(registers.len() * 2);
    for &register in registers {
        let bytes = match endianness {
            Endianness::Big => register.to_be_bytes(),
            Endianness::Little => register.to_le_bytes(),
        };
        payload.extend_from_slice(&bytes);
    }
    payload
}

fn expect_registers(
    endianness: Endianness,
    payload: &[u8],
    expected: usize,
) -> Result<Vec<u16>> {
    let registers = registers_from_payload(endianness, payload)?;
    if registers.len() < expected {
        return Err(PollError::protocol(format!(
            "expected {expected} registers, got {}",
            registers.len()
        )));
    }
    Ok(registers)
}

// ============================================================================
// Decoding (wire payload -> value)
// ============================================================================

pub fn decode_u16(endianness: Endianness, payload: &[u8]) -> Result<u16> {
    Ok(expect_registers(endianness, payload, 1)?[0])
}

pub fn decode_i16(endianness: Endianness, payload: &[u8]) -> Result<i16> {
    decode_u16(endianness, payload).map(|v| v as i16)
}

pub fn decode_u32(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<u32> {
    let registers = expect_registers(endianness, payload, 2)?;
    let words = words_high_first(word_order, &registers[..2]);
    Ok(((words[0] as u32) << 16) | words[1] as u32)
}

pub fn decode_i32(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<i32> {
    decode_u32(endianness, word_order, payload).map(|v| v as i32)
}

pub fn decode_u64(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<u64> {
    let registers = expect_registers(endianness, payload, 4)?;
    let words = words_high_first(word_order, &registers[..4]);
    Ok(words
        .iter()
        .fold(0u64, |acc, &word| (acc << 16) | word as u64))
}

pub fn decode_i64(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<i64> {
    decode_u64(endianness, word_order, payload).map(|v| v as i64)
}

pub fn decode_f32(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<f32> {
    decode_u32(endianness, word_order, payload).map(f32::from_bits)
}

pub fn decode_f64(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<f64> {
    decode_u64(endianness, word_order, payload).map(f64::from_bits)
}

/// Mod10 format: two registers each carrying four decimal digits; the more
/// significant register contributes `x 10_000`. Under the default low-word-
/// first order this is `R2 * 10_000 + R1` of the wire registers.
pub fn decode_mod10_u32(
    endianness: Endianness,
    word_order: WordOrder,
    payload: &[u8],
) -> Result<f64> {
    let registers = expect_registers(endianness, payload, 2)?;
    let words = words_high_first(word_order, &registers[..2]);
    Ok(words[0] as f64 * 10_000.0 + words[1] as f64)
}

// ============================================================================
// Encoding (value -> wire payload)
// ============================================================================

pub fn encode_u16(endianness: Endianness, value: u16) -> Vec<u8> {
    registers_to_payload(endianness, &[value])
}

pub fn encode_u32(endianness: Endianness, word_order: WordOrder, value: u32) -> Vec<u8> {
    let words = [(value >> 16) as u16, value as u16];
    registers_to_payload(endianness, &words_high_first(word_order, &words))
}

pub fn encode_u64(endianness: Endianness, word_order: WordOrder, value: u64) -> Vec<u8> {
    let words = [
        (value >> 48) as u16,
        (value >> 32) as u16,
        (value >> 16) as u16,
        value as u16,
    ];
    registers_to_payload(endianness, &words_high_first(word_order, &words))
}

pub fn encode_f32(endianness: Endianness, word_order: WordOrder, value: f32) -> Vec<u8> {
    encode_u32(endianness, word_order, value.to_bits())
}

pub fn encode_f64(endianness: Endianness, word_order: WordOrder, value: f64) -> Vec<u8> {
    encode_u64(endianness, word_order, value.to_bits())
}

// ============================================================================
// Bit helpers for bitwise points
// ============================================================================

/// Read one bit of a register value carried as f64.
pub fn bit_from_f64(value: f64, index: u32) -> Result<bool> {
    if value.fract() != 0.0 {
        return Err(PollError::validation("cannot get bits from floats"));
    }
    if value < 0.0 {
        return Err(PollError::validation("cannot get bits from negative numbers"));
    }
    Ok((value as u64) & (1u64 << index) != 0)
}

/// Set the bit at `pos` in `n`.
pub fn set_bit(n: u64, pos: u32) -> u64 {
    n | (1u64 << pos)
}

/// Clear the bit at `pos` in `n`.
pub fn clear_bit(n: u64, pos: u32) -> u64 {
    n & !(1u64 << pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ENCODINGS: [(Endianness, WordOrder); 4] = [
        (Endianness::Big, WordOrder::HighFirst),
        (Endianness::Little, WordOrder::HighFirst),
        (Endianness::Big, WordOrder::LowFirst),
        (Endianness::Little, WordOrder::LowFirst),
    ];

    #[test]
    fn u16_big_endian_layout() {
        assert_eq!(encode_u16(Endianness::Big, 0x1234), vec![0x12, 0x34]);
        assert_eq!(encode_u16(Endianness::Little, 0x1234), vec![0x34, 0x12]);
        assert_eq!(
            decode_u16(Endianness::Big, &[0x00, 0x2A]).unwrap(),
            42
        );
    }

    #[test]
    fn u32_word_orders() {
        // ABCD
        assert_eq!(
            encode_u32(Endianness::Big, WordOrder::HighFirst, 0x1234_5678),
            vec![0x12, 0x34, 0x56, 0x78]
        );
        // CDAB
        assert_eq!(
            encode_u32(Endianness::Big, WordOrder::LowFirst, 0x1234_5678),
            vec![0x56, 0x78, 0x12, 0x34]
        );
        // BADC
        assert_eq!(
            encode_u32(Endianness::Little, WordOrder::HighFirst, 0x1234_5678),
            vec![0x34, 0x12, 0x78, 0x56]
        );
        // DCBA
        assert_eq!(
            encode_u32(Endianness::Little, WordOrder::LowFirst, 0x1234_5678),
            vec![0x78, 0x56, 0x34, 0x12]
        );
    }

    #[test]
    fn round_trips_all_encodings() {
        for (endianness, word_order) in ALL_ENCODINGS {
            let payload = encode_u32(endianness, word_order, 0xDEAD_BEEF);
            assert_eq!(
                decode_u32(endianness, word_order, &payload).unwrap(),
                0xDEAD_BEEF
            );

            let payload = encode_u64(endianness, word_order, 0x0123_4567_89AB_CDEF);
            assert_eq!(
                decode_u64(endianness, word_order, &payload).unwrap(),
                0x0123_4567_89AB_CDEF
            );

            let payload = encode_f32(endianness, word_order, -273.15);
            assert_eq!(
                decode_f32(endianness, word_order, &payload).unwrap(),
                -273.15
            );

            let payload = encode_f64(endianness, word_order, 1234.5678);
            assert_eq!(
                decode_f64(endianness, word_order, &payload).unwrap(),
                1234.5678
            );
        }
    }

    #[test]
    fn signed_decode() {
        let payload = encode_u16(Endianness::Big, (-5i16) as u16);
        assert_eq!(decode_i16(Endianness::Big, &payload).unwrap(), -5);

        let payload = encode_u32(Endianness::Big, WordOrder::LowFirst, (-70000i32) as u32);
        assert_eq!(
            decode_i32(Endianness::Big, WordOrder::LowFirst, &payload).unwrap(),
            -70000
        );
    }

    #[test]
    fn mod10_default_encoding_is_r2_times_10000_plus_r1() {
        // wire registers r1=1234, r2=5678 with big-endian bytes, low word first
        let payload = [0x04, 0xD2, 0x16, 0x2E]; // [1234, 5678]
        let value =
            decode_mod10_u32(Endianness::Big, WordOrder::LowFirst, &payload).unwrap();
        assert_eq!(value, 5678.0 * 10_000.0 + 1234.0);

        // with the high word first the pairing flips
        let value =
            decode_mod10_u32(Endianness::Big, WordOrder::HighFirst, &payload).unwrap();
        assert_eq!(value, 1234.0 * 10_000.0 + 5678.0);
    }

    #[test]
    fn odd_payload_rejected() {
        assert!(decode_u16(Endianness::Big, &[0x01]).is_err());
        assert!(decode_u32(Endianness::Big, WordOrder::HighFirst, &[0x01, 0x02]).is_err());
    }

    #[test]
    fn bit_helpers() {
        assert!(bit_from_f64(5.0, 0).unwrap());
        assert!(!bit_from_f64(5.0, 1).unwrap());
        assert!(bit_from_f64(5.0, 2).unwrap());
        assert!(bit_from_f64(5.5, 0).is_err());
        assert!(bit_from_f64(-1.0, 0).is_err());

        assert_eq!(set_bit(0b0101, 3), 0b1101);
        assert_eq!(clear_bit(0b1101, 2), 0b1001);
    }
}
