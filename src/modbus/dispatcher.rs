//! # Command Dispatcher
//!
//! Main-loop consumer of the command queue. Each command's data field is
//! read as the 32-bit composite `(start_register << 16) | register_count`
//! and looked up in the register table:
//!
//! | Code          | Register       | Response payload            |
//! |---------------|----------------|-----------------------------|
//! | `0x0001_0001` | flow           | flow steps, `i16` BE        |
//! | `0x0002_0002` | serial number  | `u32` BE                    |
//! | `0x0003_0001` | soft reset     | ASCII `"OK"`                |
//! | `0x0004_0001` | slave ID       | device address, `u16` BE    |
//!
//! Unknown codes get no reply. A flow read that cannot produce a value
//! (acquisition timeout, no calibration) is answered with exception 0x04,
//! slave device failure, so the master can tell a sick sensor from a dead bus.

use tracing::{debug, warn};

use super::encoder::{encode_exception, encode_read_response, encode_register_response};
use super::protocol::{ExceptionCode, ParsedCommand, Register};
use super::queue::CommandReceiver;
use crate::device::DeviceIdentity;
use crate::sensor::FlowSource;
use crate::uart::transmit::Transmitter;
use crate::uart::UartTx;

/// What the dispatcher did with one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Register read answered
    Responded(Register),
    /// Exception response sent
    Exception(Register, ExceptionCode),
    /// Composite code not in the register table; nothing sent
    Unsupported(u32),
    /// Command failed its CRC re-check; nothing sent
    BadCrc,
}

/// Dispatch counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub responses: u32,
    pub exceptions: u32,
    pub unsupported: u32,
    pub bad_crc: u32,
}

/// Register-table dispatcher
pub struct Dispatcher<F: FlowSource, U: UartTx> {
    identity: DeviceIdentity,
    commands: CommandReceiver,
    transmitter: Transmitter<U>,
    sensor: F,
    stats: DispatchStats,
}

impl<F: FlowSource, U: UartTx> Dispatcher<F, U> {
    pub fn new(
        identity: DeviceIdentity,
        commands: CommandReceiver,
        transmitter: Transmitter<U>,
        sensor: F,
    ) -> Self {
        Self {
            identity,
            commands,
            transmitter,
            sensor,
            stats: DispatchStats::default(),
        }
    }

    /// Service every queued command. Returns how many were popped.
    pub fn poll(&mut self) -> usize {
        let mut serviced = 0;
        while let Some(cmd) = self.commands.pop() {
            self.dispatch(cmd);
            serviced += 1;
        }
        serviced
    }

    /// Service one command and queue its response, if any
    pub fn dispatch(&mut self, cmd: ParsedCommand) -> DispatchOutcome {
        let outcome = self.handle(cmd);

        match outcome {
            DispatchOutcome::Responded(_) => self.stats.responses += 1,
            DispatchOutcome::Exception(register, code) => {
                warn!("Register {:?} failed, exception {:?}", register, code);
                self.stats.exceptions += 1;
            }
            DispatchOutcome::Unsupported(code) => {
                debug!("No register block for code 0x{:08X}", code);
                self.stats.unsupported += 1;
            }
            DispatchOutcome::BadCrc => {
                debug!("Dropping command with bad CRC");
                self.stats.bad_crc += 1;
            }
        }

        outcome
    }

    fn handle(&mut self, cmd: ParsedCommand) -> DispatchOutcome {
        if !cmd.crc_is_valid() {
            return DispatchOutcome::BadCrc;
        }

        let code = cmd.request().code();
        let Some(register) = Register::from_code(code) else {
            return DispatchOutcome::Unsupported(code);
        };

        let address = self.identity.address;
        let response = match register {
            Register::Flow => match self.sensor.flow() {
                Ok(flow) => Ok(encode_register_response(address, flow as u16)),
                Err(e) => {
                    debug!("Flow read failed, resetting sensor: {}", e);
                    // Drop any half-collected scan so the next read starts fresh
                    self.sensor.soft_reset();
                    Err(ExceptionCode::SlaveDeviceFailure)
                }
            },
            Register::SerialNumber => Ok(encode_read_response(
                address,
                &self.identity.serial_number.to_be_bytes(),
            )),
            Register::SoftReset => {
                self.sensor.soft_reset();
                Ok(encode_read_response(address, b"OK"))
            }
            Register::SlaveId => Ok(encode_register_response(address, address as u16)),
        };

        match response {
            Ok(frame) => {
                self.transmitter.enqueue_all(&frame);
                DispatchOutcome::Responded(register)
            }
            Err(code) => {
                self.transmitter.enqueue_all(&encode_exception(address, code));
                DispatchOutcome::Exception(register, code)
            }
        }
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Commands waiting in the queue
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    pub fn sensor(&self) -> &F {
        &self.sensor
    }
}

impl<F: FlowSource, U: UartTx> std::fmt::Debug for Dispatcher<F, U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("identity", &self.identity)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AcquisitionError;
    use crate::modbus::protocol::build_request;
    use crate::modbus::queue::{command_queue, CommandSender};
    use crate::sensor::MockFlowSource;
    use crate::uart::mocks::RecordingUart;
    use crate::uart::transmit::{split, TransmitIsr};
    use mockall::Sequence;
    use std::sync::Arc;

    const IDENTITY: DeviceIdentity = DeviceIdentity {
        address: 7,
        serial_number: 0x1234_5678,
    };

    struct Harness {
        dispatcher: Dispatcher<MockFlowSource, RecordingUart>,
        queue: CommandSender,
        isr: TransmitIsr<RecordingUart>,
        uart: Arc<RecordingUart>,
    }

    impl Harness {
        fn new(sensor: MockFlowSource) -> Self {
            let uart = Arc::new(RecordingUart::new());
            let (transmitter, isr) = split(Arc::clone(&uart));
            let (queue, commands) = command_queue();
            Self {
                dispatcher: Dispatcher::new(IDENTITY, commands, transmitter, sensor),
                queue,
                isr,
                uart,
            }
        }

        fn request(&mut self, start: u16, count: u16) -> Vec<u8> {
            let frame = build_request(IDENTITY.address, start, count);
            assert!(self.queue.push(ParsedCommand::from_frame(&frame)));
            self.dispatcher.poll();
            while self.isr.is_armed() {
                self.isr.on_transmit_interrupt();
            }
            self.uart.take_written()
        }
    }

    fn sensor_reading(value: Result<i16, AcquisitionError>) -> MockFlowSource {
        let mut sensor = MockFlowSource::new();
        sensor.expect_flow().times(1).return_const(value);
        sensor
    }

    #[test]
    fn test_flow_response() {
        let mut h = Harness::new(sensor_reading(Ok(42)));
        assert_eq!(h.request(1, 1), vec![0x07, 0x04, 0x02, 0x00, 0x2A, 0xB0, 0xEF]);
        assert_eq!(h.dispatcher.stats().responses, 1);
    }

    #[test]
    fn test_negative_flow_response() {
        let mut h = Harness::new(sensor_reading(Ok(-1)));
        let frame = h.request(1, 1);
        assert_eq!(&frame[..5], &[0x07, 0x04, 0x02, 0xFF, 0xFF]);
    }

    fn failed_reading(error: AcquisitionError) -> MockFlowSource {
        let mut sensor = sensor_reading(Err(error));
        sensor.expect_soft_reset().times(1).return_const(());
        sensor
    }

    #[test]
    fn test_flow_timeout_sends_exception() {
        let mut h = Harness::new(failed_reading(AcquisitionError::Timeout));
        assert_eq!(h.request(1, 1), vec![0x07, 0x84, 0x04, 0xA2, 0xC2]);
        assert_eq!(h.dispatcher.stats().exceptions, 1);
    }

    #[test]
    fn test_uncalibrated_sends_exception() {
        let mut h = Harness::new(failed_reading(AcquisitionError::Uncalibrated));
        assert_eq!(h.request(1, 1)[1], 0x84);
    }

    #[test]
    fn test_failed_flow_read_resets_sensor_before_exception() {
        let mut seq = Sequence::new();
        let mut sensor = MockFlowSource::new();
        sensor
            .expect_flow()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Err::<i16, _>(AcquisitionError::NoReference));
        sensor.expect_soft_reset().times(1).in_sequence(&mut seq).return_const(());
        let mut h = Harness::new(sensor);

        assert_eq!(
            h.dispatcher.dispatch(ParsedCommand::from_frame(&build_request(7, 1, 1))),
            DispatchOutcome::Exception(Register::Flow, ExceptionCode::SlaveDeviceFailure)
        );
    }

    #[test]
    fn test_successful_flow_read_does_not_reset() {
        let mut sensor = sensor_reading(Ok(10));
        sensor.expect_soft_reset().never();
        let mut h = Harness::new(sensor);
        assert_eq!(h.request(1, 1)[1], 0x04);
    }

    #[test]
    fn test_serial_number_response() {
        let mut h = Harness::new(MockFlowSource::new());
        assert_eq!(
            h.request(2, 2),
            vec![0x07, 0x04, 0x04, 0x12, 0x34, 0x56, 0x78, 0xE6, 0xB0]
        );
    }

    #[test]
    fn test_soft_reset_response() {
        let mut sensor = MockFlowSource::new();
        sensor.expect_soft_reset().times(1).return_const(());
        let mut h = Harness::new(sensor);

        assert_eq!(h.request(3, 1), vec![0x07, 0x04, 0x02, 0x4F, 0x4B, 0x45, 0x37]);
    }

    #[test]
    fn test_slave_id_response() {
        let mut h = Harness::new(MockFlowSource::new());
        assert_eq!(h.request(4, 1), vec![0x07, 0x04, 0x02, 0x00, 0x07, 0x70, 0xF2]);
    }

    #[test]
    fn test_unsupported_code_is_silent() {
        let mut h = Harness::new(MockFlowSource::new());
        assert!(h.request(1, 2).is_empty());
        assert!(h.request(5, 1).is_empty());
        assert_eq!(h.dispatcher.stats().unsupported, 2);
    }

    #[test]
    fn test_bad_crc_is_silent() {
        let mut h = Harness::new(MockFlowSource::new());
        let mut frame = build_request(IDENTITY.address, 1, 1);
        frame[6] ^= 0xFF;

        let outcome = h.dispatcher.dispatch(ParsedCommand::from_frame(&frame));

        assert_eq!(outcome, DispatchOutcome::BadCrc);
        assert!(!h.isr.is_armed());
        assert!(h.uart.written().is_empty());
    }

    #[test]
    fn test_poll_drains_queue_in_order() {
        let mut sensor = MockFlowSource::new();
        sensor.expect_flow().times(2).return_const(Ok(5));
        let mut h = Harness::new(sensor);

        for (start, count) in [(1, 1), (4, 1), (1, 1)] {
            let frame = build_request(IDENTITY.address, start, count);
            h.queue.push(ParsedCommand::from_frame(&frame));
        }
        assert_eq!(h.dispatcher.pending(), 3);
        assert_eq!(h.dispatcher.poll(), 3);
        assert_eq!(h.dispatcher.pending(), 0);

        while h.isr.is_armed() {
            h.isr.on_transmit_interrupt();
        }
        let written = h.uart.written();
        assert_eq!(written.len(), 21);
        assert_eq!(&written[..5], &[0x07, 0x04, 0x02, 0x00, 0x05]);
        assert_eq!(&written[7..12], &[0x07, 0x04, 0x02, 0x00, 0x07]);
        assert_eq!(&written[14..19], &[0x07, 0x04, 0x02, 0x00, 0x05]);
    }
}
