//! # Receive Framer
//!
//! Recovers request frames from the raw byte stream using the Modbus RTU
//! inter-frame silence. Runs entirely in the receive interrupt: every byte is
//! appended to an 8-byte circular assembly buffer, and when the line has been
//! idle for 3.5 character times the buffer is judged as a whole.
//!
//! Exactly 8 bytes with the head wrapped back to slot 0 is a candidate
//! frame. It is queued only if the address matches this device, the function
//! code is 0x04 and the CRC checks. Anything else is discarded without a
//! reply; the master times out and retries.

use std::time::Duration;

use tracing::{debug, warn};

use super::crc;
use super::protocol::*;
use super::queue::CommandSender;
use crate::error::FrameError;

/// Fixed inter-frame delay above 19200 baud (Modbus serial line guide)
const FIXED_SILENCE_US: u64 = 1750;

/// Baud rate above which the fixed delay applies
const FIXED_SILENCE_BAUD: u32 = 19_200;

/// Inter-frame silence for the given line settings.
///
/// 3.5 characters of `1 start + 8 data + stop_bits` bits (no parity).
///
/// # Examples
///
/// ```
/// use flowmeter_rtu::modbus::framer::silence_timeout;
///
/// // 11-bit characters at 9600 baud: ~4 ms
/// assert_eq!(silence_timeout(9600, 2).as_micros(), 4011);
/// ```
pub fn silence_timeout(baud_rate: u32, stop_bits: u8) -> Duration {
    if baud_rate > FIXED_SILENCE_BAUD {
        return Duration::from_micros(FIXED_SILENCE_US);
    }

    let char_bits = 1 + 8 + stop_bits as u64;
    // 3.5 chars = 7 half-chars; round up to whole microseconds
    let half_char_bits = 7 * char_bits;
    let micros = (half_char_bits * 1_000_000).div_ceil(2 * baud_rate.max(1) as u64);
    Duration::from_micros(micros)
}

/// What the framer did at a silence timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Silence with nothing received
    Idle,
    /// Frame queued for the dispatcher
    Accepted,
    /// Frame discarded
    Dropped(FrameError),
}

/// Frame counters kept by the framer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub accepted: u32,
    pub wrong_length: u32,
    pub wrong_address: u32,
    pub wrong_function: u32,
    pub crc_errors: u32,
    pub queue_full: u32,
}

impl FramerStats {
    fn record(&mut self, outcome: FrameOutcome) {
        let counter = match outcome {
            FrameOutcome::Idle => return,
            FrameOutcome::Accepted => &mut self.accepted,
            FrameOutcome::Dropped(FrameError::ByteCount(_)) => &mut self.wrong_length,
            FrameOutcome::Dropped(FrameError::Address(_)) => &mut self.wrong_address,
            FrameOutcome::Dropped(FrameError::FunctionCode(_)) => &mut self.wrong_function,
            FrameOutcome::Dropped(FrameError::Crc { .. }) => &mut self.crc_errors,
            FrameOutcome::Dropped(FrameError::QueueFull) => &mut self.queue_full,
        };
        *counter = counter.wrapping_add(1);
    }

    /// Frames discarded for any reason
    pub fn dropped(&self) -> u32 {
        self.wrong_length
            .wrapping_add(self.wrong_address)
            .wrapping_add(self.wrong_function)
            .wrapping_add(self.crc_errors)
            .wrapping_add(self.queue_full)
    }
}

/// Silence-delimited frame detector feeding the command queue
#[derive(Debug)]
pub struct ReceiveFramer {
    buffer: [u8; REQUEST_FRAME_LENGTH],
    head: usize,
    count: usize,
    device_address: u8,
    queue: CommandSender,
    stats: FramerStats,
}

impl ReceiveFramer {
    pub fn new(device_address: u8, queue: CommandSender) -> Self {
        Self {
            buffer: [0; REQUEST_FRAME_LENGTH],
            head: 0,
            count: 0,
            device_address,
            queue,
            stats: FramerStats::default(),
        }
    }

    /// Byte-received interrupt
    #[inline]
    pub fn on_byte(&mut self, byte: u8) {
        self.buffer[self.head] = byte;
        self.head = (self.head + 1) % REQUEST_FRAME_LENGTH;
        self.count = self.count.saturating_add(1);
    }

    /// Silence-timeout interrupt
    pub fn on_silence_timeout(&mut self) -> FrameOutcome {
        let outcome = if self.count == 0 {
            FrameOutcome::Idle
        } else if self.count == REQUEST_FRAME_LENGTH && self.head == 0 {
            match self.check_frame() {
                Ok(cmd) => {
                    if self.queue.push(cmd) {
                        FrameOutcome::Accepted
                    } else {
                        FrameOutcome::Dropped(FrameError::QueueFull)
                    }
                }
                Err(e) => FrameOutcome::Dropped(e),
            }
        } else {
            FrameOutcome::Dropped(FrameError::ByteCount(self.count))
        };

        self.head = 0;
        self.count = 0;
        self.stats.record(outcome);

        match outcome {
            FrameOutcome::Dropped(FrameError::QueueFull) => {
                warn!("Command queue full, dropping request");
            }
            FrameOutcome::Dropped(e) => debug!("Discarding frame: {}", e),
            _ => {}
        }

        outcome
    }

    fn check_frame(&self) -> Result<ParsedCommand, FrameError> {
        let frame = &self.buffer;

        if frame[0] != self.device_address {
            return Err(FrameError::Address(frame[0]));
        }

        if frame[1] != FUNCTION_READ_INPUT_REGISTERS {
            return Err(FrameError::FunctionCode(frame[1]));
        }

        let crc_field = [frame[6], frame[7]];
        if !crc::verify(&frame[..REQUEST_CRC_SPAN], crc_field) {
            return Err(FrameError::Crc {
                expected: crc::generate(&frame[..REQUEST_CRC_SPAN]),
                received: u16::from_le_bytes(crc_field),
            });
        }

        Ok(ParsedCommand::from_frame(frame))
    }

    /// Bytes assembled since the last silence
    pub fn pending_bytes(&self) -> usize {
        self.count
    }

    pub fn device_address(&self) -> u8 {
        self.device_address
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }
}
