//! # Modbus RTU Module
//!
//! Slave side of Modbus RTU, function code 0x04 (read input registers) only.
//!
//! ## Request Frame
//!
//! ```text
//! [ADDRESS] [0x04] [START_HI] [START_LO] [COUNT_HI] [COUNT_LO] [CRC_LO] [CRC_HI]
//! ```
//!
//! - **ADDRESS**: slave address, 0..=31 on this instrument
//! - **CRC**: CRC-16/MODBUS over the first six bytes, low byte first
//!
//! Frames are delimited by bus silence, not by a length prefix; see
//! [`framer`].

pub mod crc;
pub mod dispatcher;
pub mod encoder;
pub mod framer;
pub mod protocol;
pub mod queue;
