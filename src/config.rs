//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::device::{address_from_dip_switch, DeviceIdentity};
use crate::error::{FlowMeterError, Result};
use crate::modbus::framer::silence_timeout;
use crate::modbus::protocol::MAX_DEVICE_ADDRESS;
use crate::sensor::acquisition::FULL_SCALE_CODE;
use crate::sensor::simulated::SimulatedCodes;

/// Standard RS-485 line rates the slave accepts
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19200, 38400, 57600, 115200];

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub serial: SerialConfig,
    pub device: DeviceConfig,
    pub acquisition: AcquisitionConfig,
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
}

/// Bus identity. Give either `address` or the raw `dip_switch_input`.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    #[serde(default)]
    pub address: Option<u8>,

    #[serde(default)]
    pub dip_switch_input: Option<u32>,

    #[serde(default)]
    pub serial_number: u32,
}

/// Analog acquisition configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionConfig {
    /// Factory reference code measured at 3.3 V
    #[serde(default = "default_reference_calibration")]
    pub reference_calibration: u16,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_min_baseline_volts")]
    pub min_baseline_volts: f32,
}

/// Main-loop supervision
#[derive(Debug, Deserialize, Clone)]
pub struct WatchdogConfig {
    #[serde(default = "default_watchdog_timeout_ms")]
    pub timeout_ms: u64,
}

/// Codes reported by the simulated analog front-end
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_zero_flow_code")]
    pub zero_flow_code: u16,

    #[serde(default = "default_flow_code")]
    pub flow_code: u16,

    #[serde(default = "default_reference_calibration")]
    pub reference_code: u16,

    #[serde(default)]
    pub spare_code: u16,

    #[serde(default = "default_ripple")]
    pub ripple: u16,
}

/// Log output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for daily log files; console only when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_serial_port() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud_rate() -> u32 { 9600 }
fn default_stop_bits() -> u8 { 2 }

fn default_reference_calibration() -> u16 { 1489 }
fn default_settle_ms() -> u64 { 5 }
fn default_min_baseline_volts() -> f32 { 0.1 }

fn default_watchdog_timeout_ms() -> u64 { 500 }

fn default_zero_flow_code() -> u16 { 1000 }
fn default_flow_code() -> u16 { 1200 }
fn default_ripple() -> u16 { 2 }

fn default_log_level() -> String { "info".to_string() }

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            zero_flow_code: default_zero_flow_code(),
            flow_code: default_flow_code(),
            reference_code: default_reference_calibration(),
            spare_code: 0,
            ripple: default_ripple(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: default_log_level(),
        }
    }
}

fn invalid(message: &str) -> FlowMeterError {
    FlowMeterError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flowmeter_rtu::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        if self.serial.port.is_empty() {
            return Err(invalid("serial port cannot be empty"));
        }

        if !SUPPORTED_BAUD_RATES.contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be a standard rate between 1200 and 115200"));
        }

        if !matches!(self.serial.stop_bits, 1 | 2) {
            return Err(invalid("stop_bits must be 1 or 2"));
        }

        match (self.device.address, self.device.dip_switch_input) {
            (Some(_), Some(_)) => {
                return Err(invalid("give either device address or dip_switch_input, not both"));
            }
            (None, None) => {
                return Err(invalid("device address or dip_switch_input is required"));
            }
            (Some(address), None) if address > MAX_DEVICE_ADDRESS => {
                return Err(invalid("device address must be between 0 and 31"));
            }
            _ => {}
        }

        if self.acquisition.reference_calibration == 0
            || self.acquisition.reference_calibration > FULL_SCALE_CODE
        {
            return Err(invalid("reference_calibration must be between 1 and 4095"));
        }

        if self.acquisition.settle_ms == 0 {
            return Err(invalid("settle_ms must be greater than 0"));
        }

        if !(0.0..3.3).contains(&self.acquisition.min_baseline_volts) {
            return Err(invalid("min_baseline_volts must be between 0.0 and 3.3"));
        }

        if self.watchdog.timeout_ms == 0 || self.watchdog.timeout_ms > 60000 {
            return Err(invalid("watchdog timeout_ms must be between 1 and 60000"));
        }

        // The acquisition wait must never starve the watchdog
        if self.acquisition.settle_ms * 4 >= self.watchdog.timeout_ms {
            return Err(invalid("settle_ms must be below a quarter of the watchdog timeout"));
        }

        let sim = &self.simulation;
        if [sim.zero_flow_code, sim.flow_code, sim.reference_code, sim.spare_code]
            .iter()
            .any(|&code| code > FULL_SCALE_CODE)
        {
            return Err(invalid("simulated codes must not exceed 4095"));
        }

        if self.logging.level.parse::<tracing::Level>().is_err() {
            return Err(invalid("logging level must be one of trace, debug, info, warn, error"));
        }

        Ok(())
    }

    /// Bus identity resolved from the address or the DIP switch input
    pub fn identity(&self) -> DeviceIdentity {
        let address = match (self.device.address, self.device.dip_switch_input) {
            (Some(address), _) => address,
            (None, Some(port_bits)) => address_from_dip_switch(port_bits),
            (None, None) => 0,
        };
        DeviceIdentity {
            address,
            serial_number: self.device.serial_number,
        }
    }

    /// Inter-frame silence for the configured line settings
    pub fn silence_timeout(&self) -> Duration {
        silence_timeout(self.serial.baud_rate, self.serial.stop_bits)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.acquisition.settle_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog.timeout_ms)
    }

    pub fn simulated_codes(&self) -> SimulatedCodes {
        SimulatedCodes {
            zero_flow: self.simulation.zero_flow_code,
            flow: self.simulation.flow_code,
            reference: self.simulation.reference_code,
            spare: self.simulation.spare_code,
            ripple: self.simulation.ripple,
        }
    }
}
