//! # Transmit Ring Buffer
//!
//! Decouples "queue bytes for sending" from the byte-at-a-time transmit
//! interrupt. The main loop owns the [`Transmitter`] half, the transmit-ready
//! interrupt owns the [`TransmitIsr`] half.
//!
//! When the interrupt is idle the first byte goes straight to the data
//! register; later bytes wait in the ring and are drained one per interrupt.
//! The interrupt disables itself once the ring runs dry.

use std::sync::Arc;

use heapless::spsc::{Consumer, Producer, Queue};
use tracing::warn;

use super::UartTx;

/// Bytes buffered ahead of the transmitter
pub const TX_BUFFER_SIZE: usize = 64;

/// `heapless` keeps one slot free to tell full from empty
const RING_SLOTS: usize = TX_BUFFER_SIZE + 1;

/// Main-loop half: fills the ring
pub struct Transmitter<U: UartTx> {
    ring: Producer<'static, u8, RING_SLOTS>,
    uart: Arc<U>,
}

/// Interrupt half: drains the ring
pub struct TransmitIsr<U: UartTx> {
    ring: Consumer<'static, u8, RING_SLOTS>,
    uart: Arc<U>,
}

/// Create the transmit path for `uart`.
///
/// The ring is allocated once per UART and lives for the rest of the program.
pub fn split<U: UartTx>(uart: Arc<U>) -> (Transmitter<U>, TransmitIsr<U>) {
    let ring: &'static mut Queue<u8, RING_SLOTS> = Box::leak(Box::new(Queue::new()));
    let (tx, rx) = ring.split();
    (
        Transmitter {
            ring: tx,
            uart: Arc::clone(&uart),
        },
        TransmitIsr { ring: rx, uart },
    )
}

impl<U: UartTx> Transmitter<U> {
    /// Queue one byte, spinning while the ring is full.
    ///
    /// Always leaves the transmit interrupt armed.
    pub fn enqueue(&mut self, byte: u8) {
        while !self.ring.ready() {
            std::hint::spin_loop();
        }

        // Bytes still in the ring go first even if the interrupt is mid re-arm
        if !self.uart.is_tx_interrupt_armed() && self.ring.len() == 0 {
            self.uart.write_data(byte);
        } else {
            // Mask while the ring is touched; the interrupt re-enables below
            self.uart.disarm_tx_interrupt();
            // Only this half fills and the wait above left room
            let queued = self.ring.enqueue(byte).is_ok();
            debug_assert!(queued, "transmit ring full after waiting for room");
            if !queued {
                warn!("Transmit ring overflow, byte 0x{:02X} lost", byte);
            }
        }

        self.uart.arm_tx_interrupt();
    }

    /// Queue every byte of `bytes` in order
    pub fn enqueue_all(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.enqueue(byte);
        }
    }

    /// Free slots in the ring
    pub fn remaining(&self) -> usize {
        TX_BUFFER_SIZE - self.ring.len()
    }

    /// Bytes waiting for the interrupt
    pub fn pending(&self) -> usize {
        self.ring.len()
    }
}

impl<U: UartTx> TransmitIsr<U> {
    /// Transmit-ready interrupt. Returns `true` if a byte was written.
    pub fn on_transmit_interrupt(&mut self) -> bool {
        if let Some(byte) = self.ring.dequeue() {
            self.uart.write_data(byte);
            return true;
        }

        self.uart.disarm_tx_interrupt();

        // A byte may have landed between the pop and the disarm
        if self.ring.ready() {
            self.uart.arm_tx_interrupt();
        }

        false
    }

    /// Whether the hardware would raise this interrupt now
    pub fn is_armed(&self) -> bool {
        self.uart.is_tx_interrupt_armed()
    }

    /// Bytes waiting to be sent
    pub fn pending(&self) -> usize {
        self.ring.len()
    }
}

impl<U: UartTx> std::fmt::Debug for Transmitter<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transmitter")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl<U: UartTx> std::fmt::Debug for TransmitIsr<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmitIsr")
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uart::mocks::RecordingUart;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn drain<U: UartTx>(isr: &mut TransmitIsr<U>) {
        while isr.is_armed() {
            isr.on_transmit_interrupt();
        }
    }

    #[test]
    fn test_first_byte_goes_direct() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, isr) = split(Arc::clone(&uart));

        tx.enqueue(0xAA);

        assert_eq!(uart.written(), vec![0xAA]);
        assert_eq!(tx.pending(), 0);
        assert!(isr.is_armed());
    }

    #[test]
    fn test_interrupt_disarms_when_empty() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, mut isr) = split(Arc::clone(&uart));

        tx.enqueue(0x01);
        assert!(!isr.on_transmit_interrupt());
        assert!(!isr.is_armed());
    }

    #[test]
    fn test_bytes_emitted_in_fifo_order() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, mut isr) = split(Arc::clone(&uart));

        let data: Vec<u8> = (0..=TX_BUFFER_SIZE as u8).collect();
        tx.enqueue_all(&data);
        assert_eq!(tx.pending(), TX_BUFFER_SIZE);
        assert_eq!(tx.remaining(), 0);

        drain(&mut isr);

        assert_eq!(uart.written(), data);
        assert_eq!(tx.remaining(), TX_BUFFER_SIZE);
    }

    #[test]
    fn test_capacity_invariant_while_draining() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, mut isr) = split(Arc::clone(&uart));

        tx.enqueue_all(&[1, 2, 3, 4, 5]);
        while isr.is_armed() {
            assert_eq!(tx.remaining() + isr.pending(), TX_BUFFER_SIZE);
            isr.on_transmit_interrupt();
        }
        assert_eq!(uart.written(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_back_to_back_messages() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, mut isr) = split(Arc::clone(&uart));

        tx.enqueue_all(&[0x10, 0x11]);
        drain(&mut isr);
        tx.enqueue_all(&[0x20, 0x21, 0x22]);
        drain(&mut isr);

        assert_eq!(uart.written(), vec![0x10, 0x11, 0x20, 0x21, 0x22]);
    }

    #[test]
    fn test_interrupt_driven_from_another_context() {
        let uart = Arc::new(RecordingUart::new());
        let (mut tx, mut isr) = split(Arc::clone(&uart));
        let done = Arc::new(AtomicBool::new(false));

        let isr_done = Arc::clone(&done);
        let isr_thread = thread::spawn(move || loop {
            if isr.is_armed() {
                isr.on_transmit_interrupt();
            } else if isr_done.load(Ordering::SeqCst) && isr.pending() == 0 {
                break;
            } else {
                std::hint::spin_loop();
            }
        });

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        tx.enqueue_all(&data);
        done.store(true, Ordering::SeqCst);

        isr_thread.join().unwrap();
        assert_eq!(uart.written(), data);
    }
}
