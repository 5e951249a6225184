//! # Modbus Response Encoder
//!
//! Builds master-bound frames: register read responses and exception
//! responses, each terminated by the CRC (low byte first).

use super::crc;
use super::protocol::*;

/// Encode a read-input-registers response
///
/// # Arguments
///
/// * `address` - This device's slave address
/// * `payload` - Register contents, big-endian, 2 bytes per register
///
/// # Returns
///
/// * `Vec<u8>` - `address | 0x04 | byte_count | payload | crc_lo | crc_hi`
///
/// # Panics
///
/// In debug builds, if `payload` is longer than [`MAX_READ_PAYLOAD`]; the
/// byte count field would not fit.
///
/// # Examples
///
/// ```
/// use flowmeter_rtu::modbus::encoder::encode_read_response;
///
/// let frame = encode_read_response(7, &42u16.to_be_bytes());
/// assert_eq!(frame, vec![0x07, 0x04, 0x02, 0x00, 0x2A, 0xB0, 0xEF]);
/// ```
pub fn encode_read_response(address: u8, payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.len() <= MAX_READ_PAYLOAD,
        "read response payload of {} bytes exceeds {}",
        payload.len(),
        MAX_READ_PAYLOAD
    );
    let mut frame = Vec::with_capacity(3 + payload.len() + 2);
    frame.push(address);
    frame.push(FUNCTION_READ_INPUT_REGISTERS);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    append_crc(&mut frame);
    frame
}

/// Encode a single-register response
pub fn encode_register_response(address: u8, value: u16) -> Vec<u8> {
    encode_read_response(address, &value.to_be_bytes())
}

/// Encode an exception response: `address | 0x84 | code | crc_lo | crc_hi`
pub fn encode_exception(address: u8, code: ExceptionCode) -> Vec<u8> {
    let mut frame = Vec::with_capacity(5);
    frame.push(address);
    frame.push(FUNCTION_READ_INPUT_REGISTERS | EXCEPTION_FLAG);
    frame.push(code as u8);
    append_crc(&mut frame);
    frame
}

fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc::generate(frame);
    frame.extend_from_slice(&crc::to_wire(crc));
}
