//! # Sensor Module
//!
//! Analog flow sensor acquisition and calibration.
//!
//! This module handles:
//! - Triggering multi-channel ADC scans and averaging the results
//! - Deriving the supply voltage from the internal reference
//! - One-shot zero-flow calibration at startup
//! - Converting sensor voltage to signed flow steps

pub mod acquisition;
pub mod calibration;
pub mod simulated;

use tracing::{debug, info};

use crate::error::{AcquisitionError, CalibrationError};
use acquisition::{Acquisition, AdcScanner};
use calibration::CalibrationParameters;

/// Source of flow readings used by the dispatcher
#[cfg_attr(test, mockall::automock)]
pub trait FlowSource {
    /// Fresh flow reading in steps
    fn flow(&mut self) -> Result<i16, AcquisitionError>;

    /// Return the measurement front-end to its power-on state
    fn soft_reset(&mut self);
}

/// Acquisition plus calibration for one sensor
#[derive(Debug)]
pub struct FlowMeter<S: AdcScanner> {
    acquisition: Acquisition,
    scanner: S,
    calibration: Option<CalibrationParameters>,
}

impl<S: AdcScanner> FlowMeter<S> {
    pub fn new(acquisition: Acquisition, scanner: S) -> Self {
        Self {
            acquisition,
            scanner,
            calibration: None,
        }
    }

    /// Run the zero-flow calibration and keep its result.
    ///
    /// On failure the meter stays uncalibrated and [`FlowSource::flow`]
    /// reports [`AcquisitionError::Uncalibrated`].
    pub fn calibrate(&mut self, min_baseline: f32) -> Result<CalibrationParameters, CalibrationError> {
        let params = calibration::calibrate(&mut self.acquisition, &mut self.scanner, min_baseline)?;
        self.calibration = Some(params);
        Ok(params)
    }

    pub fn calibration(&self) -> Option<CalibrationParameters> {
        self.calibration
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Supply voltage seen by the last successful acquisition
    pub fn supply_voltage(&self) -> Option<f32> {
        self.acquisition.supply_voltage()
    }
}

impl<S: AdcScanner> FlowSource for FlowMeter<S> {
    fn flow(&mut self) -> Result<i16, AcquisitionError> {
        let params = self.calibration.ok_or(AcquisitionError::Uncalibrated)?;
        let measurement = self.acquisition.acquire(&mut self.scanner)?;
        let flow = params.flow_from_voltage(measurement.sensor_voltage);
        debug!("Flow {} steps ({:.4} V)", flow, measurement.sensor_voltage);
        Ok(flow)
    }

    fn soft_reset(&mut self) {
        info!("Soft reset: discarding pending conversions");
        self.acquisition.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::acquisition::tests::{constant_buffer, InstantScanner};
    use crate::sensor::acquisition::{channel, DmaBuffer};
    use std::time::Duration;

    const CAL: u16 = 1489;

    fn meter(buffer: DmaBuffer) -> FlowMeter<InstantScanner> {
        let (acq, sink) = channel(CAL, Duration::from_millis(5));
        FlowMeter::new(acq, InstantScanner { sink, buffer, scans: 0 })
    }

    #[test]
    fn test_uncalibrated_meter_refuses_flow() {
        let mut meter = meter(constant_buffer(1000, CAL));
        assert!(!meter.is_calibrated());
        assert_eq!(meter.flow(), Err(AcquisitionError::Uncalibrated));
        assert_eq!(meter.scanner.scans, 0);
    }

    #[test]
    fn test_zero_flow_after_calibration() {
        let mut meter = meter(constant_buffer(1000, CAL));
        meter.calibrate(0.1).unwrap();
        assert!(meter.is_calibrated());
        assert_eq!(meter.flow(), Ok(0));
    }

    #[test]
    fn test_flow_tracks_sensor_code() {
        let mut meter = meter(constant_buffer(1000, CAL));
        let params = meter.calibrate(0.1).unwrap();

        meter.scanner.buffer = constant_buffer(2000, CAL);
        let supply = 3.3f32 * CAL as f32 / CAL as f32;
        let expected = params.flow_from_voltage(supply * 2000.0 / 4095.0);

        assert_eq!(meter.flow(), Ok(expected));
        assert!(expected > 0);
    }

    #[test]
    fn test_failed_calibration_leaves_meter_uncalibrated() {
        let mut meter = meter(constant_buffer(5, CAL));
        assert!(meter.calibrate(0.1).is_err());
        assert_eq!(meter.calibration(), None);
        assert_eq!(meter.flow(), Err(AcquisitionError::Uncalibrated));
    }
}
