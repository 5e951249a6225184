//! # Calibration Module
//!
//! Linear scaling from sensor voltage to flow steps.
//!
//! Calibration runs once at startup with the sensor at zero flow. The
//! baseline voltage becomes the zero offset and the remaining span up to the
//! supply rail is divided into the sensor's characterised 200 steps:
//!
//! ```text
//! zero_offset   = baseline
//! step_per_unit = (supply - baseline) / 200
//! flow          = round((voltage - zero_offset) / step_per_unit)
//! ```
//!
//! ## Usage
//!
//! ```
//! use flowmeter_rtu::sensor::calibration::CalibrationParameters;
//!
//! let cal = CalibrationParameters::from_baseline(0.5, 3.3);
//! assert_eq!(cal.flow_from_voltage(0.5), 0);
//! assert_eq!(cal.flow_from_voltage(3.3), 200);
//! ```

use tracing::{info, warn};

use super::acquisition::{Acquisition, AdcScanner, Channel, FULL_SCALE_CODE};
use crate::error::CalibrationError;

/// Steps between zero flow and the supply rail
pub const FULL_SCALE_SPAN_STEPS: f32 = 200.0;

/// Scaling constants, read-only after startup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationParameters {
    /// Volts per flow step
    pub step_per_unit: f32,
    /// Sensor voltage at zero flow
    pub zero_offset: f32,
}

impl CalibrationParameters {
    /// Derive the scale from a zero-flow baseline and the supply voltage
    #[must_use]
    pub fn from_baseline(baseline: f32, supply_voltage: f32) -> Self {
        Self {
            step_per_unit: (supply_voltage - baseline) / FULL_SCALE_SPAN_STEPS,
            zero_offset: baseline,
        }
    }

    /// Convert a sensor voltage to flow steps, rounded to nearest.
    ///
    /// Results beyond the `i16` range saturate.
    #[must_use]
    pub fn flow_from_voltage(&self, voltage: f32) -> i16 {
        ((voltage - self.zero_offset) / self.step_per_unit).round() as i16
    }
}

/// Take the zero-flow baseline and derive the scaling constants
///
/// # Arguments
///
/// * `acquisition` - Acquisition state of the device
/// * `scanner` - ADC front-end
/// * `min_baseline` - Lowest plausible baseline in volts; anything lower
///   means a disconnected or faulty sensor
///
/// # Errors
///
/// - [`CalibrationError::Acquisition`] if the baseline acquisition fails
/// - [`CalibrationError::BaselineTooLow`] if the baseline is implausible
/// - [`CalibrationError::NoSpan`] if the baseline reaches the supply rail
pub fn calibrate<S: AdcScanner + ?Sized>(
    acquisition: &mut Acquisition,
    scanner: &mut S,
    min_baseline: f32,
) -> Result<CalibrationParameters, CalibrationError> {
    let baseline = acquisition.acquire(scanner).map_err(|e| {
        warn!("Calibration baseline acquisition failed: {}", e);
        e
    })?;

    if baseline.sensor_voltage < min_baseline {
        warn!(
            "Calibration baseline {:.3} V below plausibility threshold {:.3} V",
            baseline.sensor_voltage, min_baseline
        );
        return Err(CalibrationError::BaselineTooLow {
            baseline: baseline.sensor_voltage,
            minimum: min_baseline,
        });
    }

    if baseline.average(Channel::Sensor) >= FULL_SCALE_CODE {
        return Err(CalibrationError::NoSpan {
            baseline: baseline.sensor_voltage,
            supply: baseline.supply_voltage,
        });
    }

    let params = CalibrationParameters::from_baseline(baseline.sensor_voltage, baseline.supply_voltage);
    info!(
        "Calibrated: zero offset {:.4} V, {:.5} V/step (supply {:.3} V)",
        params.zero_offset, params.step_per_unit, baseline.supply_voltage
    );

    Ok(params)
}
