//! # UART Module
//!
//! Interrupt-driven byte transport towards the RS-485 transceiver.
//!
//! This module handles:
//! - The hardware seam ([`UartTx`]) the core drives: data register writes and
//!   the transmit-ready interrupt enable
//! - The transmit ring buffer feeding that interrupt

pub mod transmit;

/// Transmit side of a UART peripheral.
///
/// Methods take `&self`: the registers are shared between the main loop and
/// the transmit interrupt, exactly like the memory-mapped peripheral.
pub trait UartTx: Send + Sync {
    /// Write one byte to the transmit data register
    fn write_data(&self, byte: u8);

    /// Whether the transmit-ready interrupt is enabled
    fn is_tx_interrupt_armed(&self) -> bool;

    /// Enable the transmit-ready interrupt
    fn arm_tx_interrupt(&self);

    /// Disable the transmit-ready interrupt
    fn disarm_tx_interrupt(&self);
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// UART that records every byte written to its data register
    #[derive(Default)]
    pub struct RecordingUart {
        pub written: Mutex<Vec<u8>>,
        pub armed: AtomicBool,
    }

    impl RecordingUart {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn written(&self) -> Vec<u8> {
            self.written.lock().unwrap().clone()
        }

        pub fn take_written(&self) -> Vec<u8> {
            std::mem::take(&mut *self.written.lock().unwrap())
        }
    }

    impl UartTx for RecordingUart {
        fn write_data(&self, byte: u8) {
            self.written.lock().unwrap().push(byte);
        }

        fn is_tx_interrupt_armed(&self) -> bool {
            self.armed.load(Ordering::SeqCst)
        }

        fn arm_tx_interrupt(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        fn disarm_tx_interrupt(&self) {
            self.armed.store(false, Ordering::SeqCst);
        }
    }
}
