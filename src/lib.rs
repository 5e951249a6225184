//! # Flow Meter RTU Library
//!
//! Protocol core of a single-board flow-sensing instrument answering Modbus
//! RTU read-input-register requests over RS-485.
//!
//! Bytes flow through the crate as follows:
//!
//! ```text
//! rx byte -> ReceiveFramer -> command queue -> Dispatcher -> FlowSource
//!                                                  |
//! tx byte <- TransmitIsr   <- transmit ring   <----+
//! ```
//!
//! Every hardware signal enters through a method on an owned handle and
//! every hardware action leaves through a trait ([`uart::UartTx`],
//! [`sensor::acquisition::AdcScanner`]), so the same core runs on the
//! board and on a host with a USB RS-485 adapter.

pub mod config;
pub mod device;
pub mod error;
pub mod modbus;
pub mod sensor;
pub mod serial;
pub mod uart;
pub mod watchdog;
