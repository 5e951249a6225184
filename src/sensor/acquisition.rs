//! # Analog Acquisition
//!
//! Multi-channel sampling of the flow sensor and the internal voltage
//! reference.
//!
//! A scan converts three channels (sensor, internal reference, spare) sixteen
//! times into a DMA buffer. The DMA-complete interrupt sums the buffer per
//! channel through the [`ConversionSink`] and raises the completion flag. The
//! main loop's [`Acquisition`] waits (bounded) for that flag, averages the
//! sums and converts them to volts.
//!
//! ## Hand-off
//!
//! The flag is the only synchronisation point. The interrupt writes the sums
//! only while the flag is clear and publishes them with a release store; the
//! main loop reads them only after an acquire load observes the flag, then
//! clears the sums before clearing the flag.
//!
//! ## Conversion
//!
//! ```text
//! supply_voltage = 3.3 × reference_calibration / avg_reference
//! sensor_voltage = supply_voltage × avg_sensor / 4095
//! ```
//!
//! `reference_calibration` is the factory reading of the internal reference
//! taken at 3.3 V supply, so the ratio recovers the actual supply rail.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::AcquisitionError;

/// Channels converted per scan cycle
pub const CHANNEL_COUNT: usize = 3;

/// Scan cycles averaged per acquisition
pub const SAMPLES_PER_CHANNEL: usize = 16;

/// Largest 12-bit conversion result
pub const FULL_SCALE_CODE: u16 = 4095;

/// Supply voltage at which the reference calibration was taken
pub const CALIBRATION_SUPPLY_VOLTS: f32 = 3.3;

/// Position of each channel in a scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Sensor = 0,
    Reference = 1,
    Spare = 2,
}

/// One DMA transfer: `SAMPLES_PER_CHANNEL` scan cycles of `CHANNEL_COUNT` codes
pub type DmaBuffer = [[u16; CHANNEL_COUNT]; SAMPLES_PER_CHANNEL];

/// Starts a scan on the ADC. Completion is signalled through
/// [`ConversionSink::on_dma_complete`].
pub trait AdcScanner {
    fn start_scan(&mut self);
}

/// Result of one acquisition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Per-channel mean, truncated to an integer code
    pub averages: [u16; CHANNEL_COUNT],
    pub supply_voltage: f32,
    pub sensor_voltage: f32,
}

impl Measurement {
    pub fn average(&self, channel: Channel) -> u16 {
        self.averages[channel as usize]
    }
}

struct Handoff {
    sums: [AtomicU32; CHANNEL_COUNT],
    complete: AtomicBool,
}

impl Handoff {
    fn clear(&self) {
        for sum in &self.sums {
            sum.store(0, Ordering::Relaxed);
        }
        self.complete.store(false, Ordering::Release);
    }
}

/// Interrupt half: receives finished DMA buffers
pub struct ConversionSink {
    shared: Arc<Handoff>,
}

/// Main-loop half: triggers scans and converts results
pub struct Acquisition {
    shared: Arc<Handoff>,
    reference_calibration: u16,
    settle: Duration,
    supply_voltage: Option<f32>,
}

/// Create the acquisition state for a device
///
/// # Arguments
///
/// * `reference_calibration` - Factory code of the internal reference at 3.3 V
/// * `settle` - Longest wait for a scan to complete
pub fn channel(reference_calibration: u16, settle: Duration) -> (Acquisition, ConversionSink) {
    let shared = Arc::new(Handoff {
        sums: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        complete: AtomicBool::new(false),
    });

    (
        Acquisition {
            shared: Arc::clone(&shared),
            reference_calibration,
            settle,
            supply_voltage: None,
        },
        ConversionSink { shared },
    )
}

impl ConversionSink {
    /// DMA-complete interrupt.
    ///
    /// Ignored while a previous result has not been collected.
    pub fn on_dma_complete(&self, buffer: &DmaBuffer) {
        if self.shared.complete.load(Ordering::Acquire) {
            return;
        }

        for cycle in buffer {
            for (sum, &code) in self.shared.sums.iter().zip(cycle) {
                sum.fetch_add(code as u32, Ordering::Relaxed);
            }
        }

        self.shared.complete.store(true, Ordering::Release);
    }
}

impl Acquisition {
    /// Run one acquisition
    ///
    /// # Errors
    ///
    /// - [`AcquisitionError::Timeout`] if the scan is not complete within
    ///   the settling delay
    /// - [`AcquisitionError::NoReference`] if the reference channel averaged
    ///   to zero
    pub fn acquire<S: AdcScanner + ?Sized>(&mut self, scanner: &mut S) -> Result<Measurement, AcquisitionError> {
        // Only a scan started here may be read
        self.shared.clear();
        scanner.start_scan();

        let deadline = Instant::now() + self.settle;
        while !self.shared.complete.load(Ordering::Acquire) {
            if Instant::now() >= deadline {
                debug!("ADC scan not complete after {:?}", self.settle);
                self.shared.clear();
                return Err(AcquisitionError::Timeout);
            }
            std::hint::spin_loop();
        }

        let mut averages = [0u16; CHANNEL_COUNT];
        for (avg, sum) in averages.iter_mut().zip(&self.shared.sums) {
            *avg = (sum.load(Ordering::Relaxed) / SAMPLES_PER_CHANNEL as u32) as u16;
        }
        self.shared.clear();

        let reference = averages[Channel::Reference as usize];
        if reference == 0 {
            return Err(AcquisitionError::NoReference);
        }

        let supply_voltage =
            CALIBRATION_SUPPLY_VOLTS * self.reference_calibration as f32 / reference as f32;
        let sensor_voltage =
            supply_voltage * averages[Channel::Sensor as usize] as f32 / FULL_SCALE_CODE as f32;
        self.supply_voltage = Some(supply_voltage);

        Ok(Measurement {
            averages,
            supply_voltage,
            sensor_voltage,
        })
    }

    /// Discard any collected but unread scan
    pub fn reset(&mut self) {
        self.shared.clear();
    }

    /// Supply voltage derived by the last successful acquisition
    pub fn supply_voltage(&self) -> Option<f32> {
        self.supply_voltage
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("reference_calibration", &self.reference_calibration)
            .field("settle", &self.settle)
            .field("supply_voltage", &self.supply_voltage)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ConversionSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionSink")
            .field("complete", &self.shared.complete.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
