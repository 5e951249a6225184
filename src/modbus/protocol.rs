//! # Modbus RTU Protocol Constants and Types
//!
//! Core protocol definitions for the fixed-length read-input-registers
//! request this device services.

use super::crc;

/// Length of every request frame: address + function + 4 data + 2 CRC
pub const REQUEST_FRAME_LENGTH: usize = 8;

/// Number of request bytes covered by the CRC
pub const REQUEST_CRC_SPAN: usize = REQUEST_FRAME_LENGTH - 2;

/// Read Input Registers, the only function code serviced
pub const FUNCTION_READ_INPUT_REGISTERS: u8 = 0x04;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Largest read response payload: 125 registers of 2 bytes
pub const MAX_READ_PAYLOAD: usize = 250;

/// Highest slave address selectable on the 5-bit DIP switch
pub const MAX_DEVICE_ADDRESS: u8 = 31;

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
}

/// Register blocks served under function code 0x04, keyed by the 32-bit
/// composite of start register (high half) and register count (low half)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    /// Register 1, 1 register: calibrated flow
    Flow,
    /// Register 2, 2 registers: device serial number
    SerialNumber,
    /// Register 3, 1 register: soft reset, answers "OK"
    SoftReset,
    /// Register 4, 1 register: slave address report
    SlaveId,
}

impl Register {
    pub const FLOW_CODE: u32 = 0x0001_0001;
    pub const SERIAL_NUMBER_CODE: u32 = 0x0002_0002;
    pub const SOFT_RESET_CODE: u32 = 0x0003_0001;
    pub const SLAVE_ID_CODE: u32 = 0x0004_0001;

    /// Look up the register block for a composite request code
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            Self::FLOW_CODE => Some(Self::Flow),
            Self::SERIAL_NUMBER_CODE => Some(Self::SerialNumber),
            Self::SOFT_RESET_CODE => Some(Self::SoftReset),
            Self::SLAVE_ID_CODE => Some(Self::SlaveId),
            _ => None,
        }
    }

    /// Composite request code for this register block
    pub fn code(self) -> u32 {
        match self {
            Self::Flow => Self::FLOW_CODE,
            Self::SerialNumber => Self::SERIAL_NUMBER_CODE,
            Self::SoftReset => Self::SOFT_RESET_CODE,
            Self::SlaveId => Self::SLAVE_ID_CODE,
        }
    }
}

/// Start register and register count carried in a request's data field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterRequest {
    pub start_register: u16,
    pub register_count: u16,
}

impl RegisterRequest {
    /// Decode the two big-endian halfwords of a data field
    pub fn from_data(data: [u8; 4]) -> Self {
        Self {
            start_register: u16::from_be_bytes([data[0], data[1]]),
            register_count: u16::from_be_bytes([data[2], data[3]]),
        }
    }

    /// The 32-bit composite `(start << 16) | count`
    pub fn code(&self) -> u32 {
        ((self.start_register as u32) << 16) | self.register_count as u32
    }
}

/// A request frame that passed address, function code and CRC checks.
///
/// Plain value type; copied in and out of the command queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    pub address: u8,
    pub function_code: u8,
    pub data: [u8; 4],
    pub crc: [u8; 2],
}

impl ParsedCommand {
    /// Copy a raw 8-byte frame into its fields
    pub fn from_frame(frame: &[u8; REQUEST_FRAME_LENGTH]) -> Self {
        Self {
            address: frame[0],
            function_code: frame[1],
            data: [frame[2], frame[3], frame[4], frame[5]],
            crc: [frame[6], frame[7]],
        }
    }

    /// Reassemble the wire bytes
    pub fn to_frame(&self) -> [u8; REQUEST_FRAME_LENGTH] {
        [
            self.address,
            self.function_code,
            self.data[0],
            self.data[1],
            self.data[2],
            self.data[3],
            self.crc[0],
            self.crc[1],
        ]
    }

    /// Decoded start register / register count
    pub fn request(&self) -> RegisterRequest {
        RegisterRequest::from_data(self.data)
    }

    /// Recompute the CRC over address, function code and data
    pub fn crc_is_valid(&self) -> bool {
        let frame = self.to_frame();
        crc::verify(&frame[..REQUEST_CRC_SPAN], self.crc)
    }
}

/// Build a complete request frame with a valid CRC (master side, used by
/// tests and bench tooling)
pub fn build_request(address: u8, start_register: u16, register_count: u16) -> [u8; REQUEST_FRAME_LENGTH] {
    let start = start_register.to_be_bytes();
    let count = register_count.to_be_bytes();
    let mut frame = [
        address,
        FUNCTION_READ_INPUT_REGISTERS,
        start[0],
        start[1],
        count[0],
        count[1],
        0,
        0,
    ];
    let [lo, hi] = crc::to_wire(crc::generate(&frame[..REQUEST_CRC_SPAN]));
    frame[6] = lo;
    frame[7] = hi;
    frame
}
