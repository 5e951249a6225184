//! # Device Context
//!
//! Everything the instrument shares between its interrupt handlers and the
//! main loop is built once here at boot and handed out as owned handles:
//!
//! - [`Device`] goes to the main loop (dispatcher plus watchdog)
//! - [`InterruptHandles`] go to the receive and transmit interrupt contexts
//!
//! The acquisition hand-off is created by [`crate::sensor::acquisition::channel`]
//! before boot since calibration has to run before the bus is serviced.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::modbus::dispatcher::Dispatcher;
use crate::modbus::framer::ReceiveFramer;
use crate::modbus::protocol::MAX_DEVICE_ADDRESS;
use crate::modbus::queue::command_queue;
use crate::sensor::FlowSource;
use crate::uart::transmit::{split, TransmitIsr};
use crate::uart::UartTx;
use crate::watchdog::Watchdog;

/// Port pins carrying the address DIP switch (pins 0, 1, 3, 4, 5)
const DIP_SWITCH_PINS: u32 = 0x3B;

/// Who this slave is on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Slave address, 0..=31
    pub address: u8,
    pub serial_number: u32,
}

/// Decode the slave address from the raw input port value.
///
/// Pin 2 is not wired to the switch, so pins 3..=5 shift down one place:
///
/// ```text
/// port bit:    5 4 3 2 1 0
/// address bit: 4 3 2 - 1 0
/// ```
///
/// # Examples
///
/// ```
/// use flowmeter_rtu::device::address_from_dip_switch;
///
/// assert_eq!(address_from_dip_switch(0b0000_1011), 0b0_0111);
/// assert_eq!(address_from_dip_switch(0xFFFF), 31);
/// ```
#[must_use]
pub fn address_from_dip_switch(port_bits: u32) -> u8 {
    let wired = port_bits & DIP_SWITCH_PINS;
    let address = (wired & 0x03) | ((wired >> 1) & 0x1C);
    // At most five bits survive the masks
    address as u8 & MAX_DEVICE_ADDRESS
}

/// Handles owned by the interrupt contexts
#[derive(Debug)]
pub struct InterruptHandles<U: UartTx> {
    /// Receive interrupt and receiver-timeout interrupt
    pub framer: ReceiveFramer,
    /// Transmit-data-register-empty interrupt
    pub transmit: TransmitIsr<U>,
}

/// Main-loop side of the instrument
#[derive(Debug)]
pub struct Device<F: FlowSource, U: UartTx> {
    dispatcher: Dispatcher<F, U>,
    watchdog: Watchdog,
}

impl<F: FlowSource, U: UartTx> Device<F, U> {
    /// Wire the queues and rings together
    ///
    /// # Arguments
    ///
    /// * `identity` - Address and serial number reported on the bus
    /// * `uart` - Transmit side of the serial peripheral
    /// * `sensor` - Flow source, normally a calibrated [`crate::sensor::FlowMeter`]
    /// * `watchdog_timeout` - Longest allowed gap between main-loop passes
    pub fn boot(
        identity: DeviceIdentity,
        uart: Arc<U>,
        sensor: F,
        watchdog_timeout: Duration,
    ) -> (Self, InterruptHandles<U>) {
        let (queue_tx, queue_rx) = command_queue();
        let (transmitter, transmit) = split(uart);

        let framer = ReceiveFramer::new(identity.address, queue_tx);
        let dispatcher = Dispatcher::new(identity, queue_rx, transmitter, sensor);

        info!(
            "Slave {} (serial {:08X}) ready",
            identity.address, identity.serial_number
        );

        let device = Self {
            dispatcher,
            watchdog: Watchdog::new(watchdog_timeout),
        };
        (device, InterruptHandles { framer, transmit })
    }

    /// One main-loop pass: service queued commands, then feed the watchdog
    pub fn service(&mut self) -> usize {
        let serviced = self.dispatcher.poll();
        self.watchdog.feed();
        serviced
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.dispatcher.identity()
    }

    pub fn dispatcher(&self) -> &Dispatcher<F, U> {
        &self.dispatcher
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::framer::FrameOutcome;
    use crate::modbus::protocol::build_request;
    use crate::sensor::acquisition::channel;
    use crate::sensor::simulated::{SimulatedCodes, SimulatedFrontEnd};
    use crate::sensor::{FlowMeter, MockFlowSource};
    use crate::uart::mocks::RecordingUart;

    const IDENTITY: DeviceIdentity = DeviceIdentity {
        address: 7,
        serial_number: 0xCAFE_0001,
    };

    fn drain(isr: &mut TransmitIsr<RecordingUart>) {
        while isr.is_armed() {
            isr.on_transmit_interrupt();
        }
    }

    #[test]
    fn test_dip_switch_decoding() {
        assert_eq!(address_from_dip_switch(0), 0);
        assert_eq!(address_from_dip_switch(0x01), 1);
        assert_eq!(address_from_dip_switch(0x02), 2);
        assert_eq!(address_from_dip_switch(0x04), 0);
        assert_eq!(address_from_dip_switch(0x08), 4);
        assert_eq!(address_from_dip_switch(0x10), 8);
        assert_eq!(address_from_dip_switch(0x20), 16);
        assert_eq!(address_from_dip_switch(0x3F), 31);
        assert_eq!(address_from_dip_switch(0xFFFF_FFC0), 0);
    }

    #[test]
    fn test_flow_request_end_to_end() {
        let mut sensor = MockFlowSource::new();
        sensor.expect_flow().times(1).return_const(Ok(42));
        let uart = Arc::new(RecordingUart::new());
        let (mut device, mut irq) = Device::boot(IDENTITY, Arc::clone(&uart), sensor, Duration::from_secs(1));

        for byte in build_request(7, 1, 1) {
            irq.framer.on_byte(byte);
        }
        assert_eq!(irq.framer.on_silence_timeout(), FrameOutcome::Accepted);

        assert_eq!(device.service(), 1);
        drain(&mut irq.transmit);

        assert_eq!(uart.written(), vec![0x07, 0x04, 0x02, 0x00, 0x2A, 0xB0, 0xEF]);
        assert_eq!(device.watchdog().overruns(), 0);
    }

    #[test]
    fn test_noise_then_clean_frame() {
        let mut sensor = MockFlowSource::new();
        sensor.expect_flow().times(1).return_const(Ok(42));
        let uart = Arc::new(RecordingUart::new());
        let (mut device, mut irq) = Device::boot(IDENTITY, Arc::clone(&uart), sensor, Duration::from_secs(1));

        for byte in [0x55u8; 7] {
            irq.framer.on_byte(byte);
        }
        assert!(matches!(irq.framer.on_silence_timeout(), FrameOutcome::Dropped(_)));
        assert_eq!(device.service(), 0);

        for byte in build_request(7, 1, 1) {
            irq.framer.on_byte(byte);
        }
        irq.framer.on_silence_timeout();
        device.service();
        drain(&mut irq.transmit);

        assert_eq!(uart.written(), vec![0x07, 0x04, 0x02, 0x00, 0x2A, 0xB0, 0xEF]);
    }

    #[test]
    fn test_other_slave_is_ignored() {
        let uart = Arc::new(RecordingUart::new());
        let (mut device, mut irq) =
            Device::boot(IDENTITY, Arc::clone(&uart), MockFlowSource::new(), Duration::from_secs(1));

        for byte in build_request(8, 1, 1) {
            irq.framer.on_byte(byte);
        }
        irq.framer.on_silence_timeout();

        assert_eq!(device.service(), 0);
        assert!(!irq.transmit.is_armed());
        assert!(uart.written().is_empty());
    }

    #[test]
    fn test_simulated_meter_end_to_end() {
        let codes = SimulatedCodes {
            zero_flow: 1000,
            flow: 1000,
            reference: 1489,
            spare: 0,
            ripple: 2,
        };
        let (acq, sink) = channel(1489, Duration::from_millis(5));
        let mut meter = FlowMeter::new(acq, SimulatedFrontEnd::new(sink, codes));
        meter.calibrate(0.1).unwrap();

        let uart = Arc::new(RecordingUart::new());
        let (mut device, mut irq) = Device::boot(IDENTITY, Arc::clone(&uart), meter, Duration::from_secs(1));

        for byte in build_request(7, 1, 1) {
            irq.framer.on_byte(byte);
        }
        irq.framer.on_silence_timeout();
        device.service();
        drain(&mut irq.transmit);

        // Still at zero flow
        assert_eq!(&uart.written()[..5], &[0x07, 0x04, 0x02, 0x00, 0x00]);
        assert_eq!(device.identity(), IDENTITY);
        assert_eq!(device.dispatcher().stats().responses, 1);
    }
}
