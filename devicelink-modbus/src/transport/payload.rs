//! Conversions between raw payload bytes and typed Modbus values.

use super::{TransportError, TransportResult};

/// Pack bits LSB-first into bytes, as they travel in a Modbus PDU.
pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, bit) in bits.iter().enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

/// Unpack `quantity` bits from LSB-first packed bytes.
pub fn unpack_bits(bytes: &[u8], quantity: u16) -> TransportResult<Vec<bool>> {
    let quantity = quantity as usize;
    if bytes.len() * 8 < quantity {
        return Err(TransportError::InvalidValue(format!(
            "{} byte(s) cannot hold {} bit(s)",
            bytes.len(),
            quantity
        )));
    }
    Ok((0..quantity)
        .map(|i| (bytes[i / 8] >> (i % 8)) & 1 == 1)
        .collect())
}

/// Serialize registers big-endian.
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Split big-endian bytes into exactly `quantity` registers.
pub fn bytes_to_registers(bytes: &[u8], quantity: u16) -> TransportResult<Vec<u16>> {
    if bytes.len() != quantity as usize * 2 {
        return Err(TransportError::InvalidValue(format!(
            "expected {} byte(s) for {} register(s), got {}",
            quantity as usize * 2,
            quantity,
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect())
}
