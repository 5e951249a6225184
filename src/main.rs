//! # Flow Meter RTU
//!
//! Runs the flow meter slave on a host with an RS-485 adapter.
//!
//! The analog front-end is simulated with the codes from the `[simulation]`
//! section; everything from the serial line to the register table is the
//! same core that runs on the board.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use flowmeter_rtu::config::{Config, LoggingConfig};
use flowmeter_rtu::device::Device;
use flowmeter_rtu::sensor::acquisition::channel;
use flowmeter_rtu::sensor::simulated::SimulatedFrontEnd;
use flowmeter_rtu::sensor::FlowMeter;
use flowmeter_rtu::serial::{run_receiver, run_transmit_interrupt, run_transmitter, HostUart, RtuSerial};

/// Configuration used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Pause between main-loop passes
const MAIN_LOOP_PERIOD: Duration = Duration::from_millis(1);

/// How long shutdown waits for queued response bytes to reach the port
const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

const LOG_FILE_PREFIX: &str = "flowmeter-rtu.log";

/// Set up console or daily-file logging.
///
/// `RUST_LOG` directives are applied on top of the configured level. The
/// returned guard flushes the file writer when dropped.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    match &config.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// Main entry point
///
/// # Control Flow
///
/// 1. **Boot**
///    - Load configuration (first argument, default `config/default.toml`)
///    - Calibrate the flow meter at zero flow
///    - Open the serial port and wire the device context
///
/// 2. **Run**
///    - Receive task feeds the framer and raises the silence timeout
///    - Transmit interrupt task drains the transmit ring
///    - Main loop services the command queue on a blocking thread
///
/// 3. **Shutdown** on Ctrl+C or when the serial port closes
///
/// # Errors
///
/// Returns error if the configuration is invalid or the port cannot be opened
#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    let _log_guard = init_logging(&config.logging);
    info!("Flow meter RTU v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from {}", config_path);

    let identity = config.identity();

    let (acquisition, sink) = channel(config.acquisition.reference_calibration, config.settle());
    let front_end = SimulatedFrontEnd::new(sink, config.simulated_codes());
    let mut meter = FlowMeter::new(acquisition, front_end);
    if let Err(e) = meter.calibrate(config.acquisition.min_baseline_volts) {
        warn!("Calibration failed, flow reads will report a device failure: {}", e);
    }

    let serial = RtuSerial::open(&config.serial)?;
    info!("RS-485 port opened at: {}", serial.device_path());
    let (reader, writer) = serial.into_split();

    let (uart, bytes) = HostUart::new();
    let uart = Arc::new(uart);
    let interrupt = uart.interrupt();
    let (mut device, irq) = Device::boot(identity, uart, meter, config.watchdog_timeout());

    let transmit_irq = tokio::spawn(run_transmit_interrupt(irq.transmit, interrupt));
    let mut transmit_task = tokio::spawn(run_transmitter(writer, bytes));
    let mut receive_task = tokio::spawn(run_receiver(reader, irq.framer, config.silence_timeout()));

    let running = Arc::new(AtomicBool::new(true));
    let main_loop = {
        let running = Arc::clone(&running);
        tokio::task::spawn_blocking(move || {
            while running.load(Ordering::Acquire) {
                device.service();
                std::thread::sleep(MAIN_LOOP_PERIOD);
            }
            device
        })
    };

    info!(
        "Listening as slave {} (silence {:?}), press Ctrl+C to exit",
        identity.address,
        config.silence_timeout()
    );

    let mut transmitter_done = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = &mut receive_task => match result {
            Ok(Ok(framer)) => info!("Serial port closed, frames: {:?}", framer.stats()),
            Ok(Err(e)) => warn!("Receiver stopped: {}", e),
            Err(e) => warn!("Receiver task failed: {}", e),
        },
        result = &mut transmit_task => {
            warn!("Transmitter stopped early: {:?}", result);
            transmitter_done = true;
        }
    }

    running.store(false, Ordering::Release);
    let device = main_loop.await?;
    receive_task.abort();
    transmit_irq.abort();

    let stats = device.dispatcher().stats();
    info!(
        "Responses: {}, exceptions: {}, unsupported: {}, watchdog overruns: {}",
        stats.responses,
        stats.exceptions,
        stats.unsupported,
        device.watchdog().overruns()
    );

    // Closing the data register lets the transmitter flush and stop
    drop(device);
    if !transmitter_done && tokio::time::timeout(DRAIN_TIMEOUT, &mut transmit_task).await.is_err() {
        transmit_task.abort();
    }

    Ok(())
}
