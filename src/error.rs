//! # Error Types
//!
//! Custom error types for the flow meter using `thiserror`.
//!
//! Interrupt-side failures (bad frames, a full command queue) never leave the
//! interrupt handlers as errors; they are counted and logged. The types here
//! cover the main-loop and boot paths.

use thiserror::Error;

/// Reasons a received frame is discarded by the receive framer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Silence timeout hit with anything other than exactly 8 bytes assembled
    #[error("wrong byte count at silence timeout: {0}")]
    ByteCount(usize),

    /// Frame addressed to another slave
    #[error("frame addressed to 0x{0:02X}")]
    Address(u8),

    /// Function code this device does not service
    #[error("unsupported function code 0x{0:02X}")]
    FunctionCode(u8),

    /// CRC field does not match the frame contents
    #[error("CRC mismatch: expected 0x{expected:04X}, received 0x{received:04X}")]
    Crc { expected: u16, received: u16 },

    /// Command queue was at capacity
    #[error("command queue full")]
    QueueFull,
}

/// Analog acquisition failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    /// Conversion did not complete within the settling delay
    #[error("conversion not complete after settling delay")]
    Timeout,

    /// Internal reference channel averaged to zero
    #[error("internal reference channel read zero")]
    NoReference,

    /// No valid calibration; flow cannot be scaled
    #[error("sensor not calibrated")]
    Uncalibrated,
}

/// Startup calibration failures
#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CalibrationError {
    /// Baseline acquisition failed
    #[error("baseline acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    /// Baseline voltage implausibly low (sensor disconnected or faulty)
    #[error("baseline {baseline:.3} V below minimum {minimum:.3} V")]
    BaselineTooLow { baseline: f32, minimum: f32 },

    /// Baseline at or above the supply rail leaves no measurement span
    #[error("baseline {baseline:.3} V leaves no span below supply {supply:.3} V")]
    NoSpan { baseline: f32, supply: f32 },
}

/// Main error type for the flow meter
#[derive(Debug, Error)]
pub enum FlowMeterError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// Calibration errors
    #[error("Calibration error: {0}")]
    Calibration(#[from] CalibrationError),

    /// Acquisition errors
    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),
}

/// Result type alias for the flow meter
pub type Result<T> = std::result::Result<T, FlowMeterError>;
