//! Host stand-in for the UART transmit peripheral.
//!
//! The data register is an unbounded channel towards the serial writer task
//! and the transmit-ready interrupt is a [`Notify`] that wakes the task
//! running [`run_transmit_interrupt`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::trace;

use crate::uart::transmit::TransmitIsr;
use crate::uart::UartTx;

#[derive(Debug)]
pub struct HostUart {
    data: UnboundedSender<u8>,
    armed: AtomicBool,
    interrupt: Arc<Notify>,
}

impl HostUart {
    /// Create the UART and the receiving end of its data register
    pub fn new() -> (Self, UnboundedReceiver<u8>) {
        let (data, bytes) = unbounded_channel();
        let uart = Self {
            data,
            armed: AtomicBool::new(false),
            interrupt: Arc::new(Notify::new()),
        };
        (uart, bytes)
    }

    /// Interrupt line raised whenever the transmit interrupt is armed
    pub fn interrupt(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }
}

impl UartTx for HostUart {
    fn write_data(&self, byte: u8) {
        // Writer task gone means shutdown; the byte has nowhere to go
        if self.data.send(byte).is_err() {
            trace!("Dropping byte 0x{:02X}, serial writer closed", byte);
        }
    }

    fn is_tx_interrupt_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    fn arm_tx_interrupt(&self) {
        self.armed.store(true, Ordering::Release);
        self.interrupt.notify_one();
    }

    fn disarm_tx_interrupt(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

/// Transmit interrupt context: drain the ring while the interrupt is armed.
///
/// Runs until the task is aborted.
pub async fn run_transmit_interrupt(mut isr: TransmitIsr<HostUart>, interrupt: Arc<Notify>) {
    loop {
        interrupt.notified().await;
        while isr.is_armed() {
            isr.on_transmit_interrupt();
        }
    }
}
