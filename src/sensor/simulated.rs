//! Synthetic analog front-end for running the core without the sensor board.
//!
//! Every scan completes immediately. The first scan reports the zero-flow
//! code (the instrument is calibrated at zero flow); later scans report the
//! flow code. A symmetric ripple alternates `+ripple` / `-ripple` between
//! cycles so the 16-sample mean still lands on the configured code.

use super::acquisition::{
    AdcScanner, Channel, ConversionSink, DmaBuffer, CHANNEL_COUNT, FULL_SCALE_CODE, SAMPLES_PER_CHANNEL,
};

/// Codes the simulated ADC reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulatedCodes {
    pub zero_flow: u16,
    pub flow: u16,
    pub reference: u16,
    pub spare: u16,
    pub ripple: u16,
}

#[derive(Debug)]
pub struct SimulatedFrontEnd {
    sink: ConversionSink,
    codes: SimulatedCodes,
    scans: u64,
}

impl SimulatedFrontEnd {
    pub fn new(sink: ConversionSink, codes: SimulatedCodes) -> Self {
        Self { sink, codes, scans: 0 }
    }

    /// Change the flow code reported from the next scan on
    pub fn set_flow_code(&mut self, code: u16) {
        self.codes.flow = code.min(FULL_SCALE_CODE);
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    fn buffer(&self) -> DmaBuffer {
        let sensor = if self.scans == 0 {
            self.codes.zero_flow
        } else {
            self.codes.flow
        };

        let mut base = [0u16; CHANNEL_COUNT];
        base[Channel::Sensor as usize] = sensor;
        base[Channel::Reference as usize] = self.codes.reference;
        base[Channel::Spare as usize] = self.codes.spare;

        let mut buffer = [base; SAMPLES_PER_CHANNEL];
        for (i, cycle) in buffer.iter_mut().enumerate() {
            for code in cycle.iter_mut() {
                *code = if i % 2 == 0 {
                    code.saturating_add(self.codes.ripple).min(FULL_SCALE_CODE)
                } else {
                    code.saturating_sub(self.codes.ripple)
                };
            }
        }
        buffer
    }
}

impl AdcScanner for SimulatedFrontEnd {
    fn start_scan(&mut self) {
        let buffer = self.buffer();
        self.sink.on_dma_complete(&buffer);
        self.scans += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::acquisition::channel;
    use std::time::Duration;

    fn codes() -> SimulatedCodes {
        SimulatedCodes {
            zero_flow: 800,
            flow: 1600,
            reference: 1489,
            spare: 0,
            ripple: 3,
        }
    }

    #[test]
    fn test_first_scan_reports_zero_flow() {
        let (mut acq, sink) = channel(1489, Duration::from_millis(5));
        let mut fe = SimulatedFrontEnd::new(sink, codes());

        let first = acq.acquire(&mut fe).unwrap();
        let second = acq.acquire(&mut fe).unwrap();

        assert_eq!(first.average(Channel::Sensor), 800);
        assert_eq!(second.average(Channel::Sensor), 1600);
        assert_eq!(second.average(Channel::Reference), 1489);
        assert_eq!(fe.scans(), 2);
    }

    #[test]
    fn test_set_flow_code_clamps() {
        let (_acq, sink) = channel(1489, Duration::from_millis(5));
        let mut fe = SimulatedFrontEnd::new(sink, codes());
        fe.set_flow_code(5000);
        assert_eq!(fe.codes.flow, FULL_SCALE_CODE);
    }
}
