//! # Serial Communication Module
//!
//! Binds the protocol core to an RS-485 adapter on the host.
//!
//! This module handles:
//! - Opening the serial port with the configured line settings (8N1 / 8N2)
//! - Feeding received bytes to the framer and detecting bus silence
//! - Writing bytes emitted by the [`HostUart`] data register to the port

pub mod host_uart;
pub mod port_trait;

pub use host_uart::{run_transmit_interrupt, HostUart};
pub use port_trait::{SerialPortIO, SerialWriter};

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, trace, warn};

use crate::config::SerialConfig;
use crate::error::{FlowMeterError, Result};
use crate::modbus::framer::ReceiveFramer;

/// Bytes pulled from the port per read
const READ_CHUNK: usize = 64;

/// RS-485 serial port handle
pub struct RtuSerial {
    /// Serial port handle
    port: tokio_serial::SerialStream,
    /// Device path (e.g., /dev/ttyUSB0)
    device_path: String,
}

impl std::fmt::Debug for RtuSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtuSerial")
            .field("device_path", &self.device_path)
            .finish_non_exhaustive()
    }
}

impl RtuSerial {
    /// Open the configured port: 8 data bits, no parity, no flow control
    ///
    /// # Errors
    ///
    /// - [`FlowMeterError::SerialPortNotFound`] if the device does not exist
    /// - [`FlowMeterError::Serial`] for any other open failure
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use flowmeter_rtu::config::Config;
    /// use flowmeter_rtu::serial::RtuSerial;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let config = Config::load("config/default.toml")?;
    ///     let serial = RtuSerial::open(&config.serial)?;
    ///     println!("{}", serial.device_path());
    ///     Ok(())
    /// }
    /// ```
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!("Opening serial port: {}", config.port);

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(stop_bits(config.stop_bits))
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => FlowMeterError::SerialPortNotFound(config.port.clone()),
                _ => FlowMeterError::Serial(format!("Failed to open {}: {}", config.port, e)),
            })?;

        info!(
            "Opened {} at {} baud, {} stop bit(s)",
            config.port, config.baud_rate, config.stop_bits
        );

        Ok(Self {
            port,
            device_path: config.port.clone(),
        })
    }

    /// Split into the receive stream and a writer for [`run_transmitter`]
    pub fn into_split(
        self,
    ) -> (
        ReadHalf<tokio_serial::SerialStream>,
        SerialWriter<WriteHalf<tokio_serial::SerialStream>>,
    ) {
        let (reader, writer) = tokio::io::split(self.port);
        (reader, SerialWriter::new(writer))
    }

    /// Get the device path of the connected port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

/// Round a silence interval down to the tokio timer's 1 ms tick.
///
/// Tokio rounds timer deadlines up to the next millisecond, so 4011 µs would
/// fire after 5 ms. Rounding down keeps the timeout no longer than the wire
/// interval, with a floor of one tick.
fn timer_silence(silence: Duration) -> Duration {
    Duration::from_millis(silence.as_millis().max(1) as u64)
}

/// Receive interrupt context: feed every byte to the framer and raise the
/// receiver timeout after `silence` without a byte.
///
/// `silence` is rounded down to whole milliseconds, see [`timer_silence`].
/// Returns the framer when the stream ends.
///
/// # Errors
///
/// Returns error if reading from the port fails
pub async fn run_receiver<R: AsyncRead + Unpin>(
    mut reader: R,
    mut framer: ReceiveFramer,
    silence: Duration,
) -> Result<ReceiveFramer> {
    let mut buf = [0u8; READ_CHUNK];
    let silence = timer_silence(silence);
    debug!("Receiver silence timer: {:?}", silence);

    loop {
        // The timer only runs while a frame is being assembled
        let read = if framer.pending_bytes() == 0 {
            reader.read(&mut buf).await
        } else {
            match timeout(silence, reader.read(&mut buf)).await {
                Ok(read) => read,
                Err(_) => {
                    framer.on_silence_timeout();
                    continue;
                }
            }
        };

        let n = read?;
        if n == 0 {
            if framer.pending_bytes() > 0 {
                framer.on_silence_timeout();
            }
            info!("Serial receive stream closed");
            return Ok(framer);
        }

        trace!("Received {} byte(s)", n);
        for &byte in &buf[..n] {
            framer.on_byte(byte);
        }
    }
}

/// Serial writer: move bytes from the UART data register to the port.
///
/// Bytes already waiting are batched into one write. Returns when every
/// [`HostUart`] holding the sending side is gone.
///
/// # Errors
///
/// Returns error if writing to the port fails
pub async fn run_transmitter<P: SerialPortIO>(mut port: P, mut bytes: UnboundedReceiver<u8>) -> Result<()> {
    let mut chunk = Vec::with_capacity(READ_CHUNK);

    while let Some(byte) = bytes.recv().await {
        chunk.push(byte);
        while let Ok(byte) = bytes.try_recv() {
            chunk.push(byte);
        }

        if let Err(e) = port.write_all(&chunk).await {
            warn!("Serial write of {} byte(s) failed: {}", chunk.len(), e);
            return Err(e.into());
        }
        port.flush().await?;
        trace!("Sent {} byte(s)", chunk.len());
        chunk.clear();
    }

    debug!("UART data register closed, transmitter stopping");
    Ok(())
}
