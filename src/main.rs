//! UART Logger - Main Entry Point
//!
//! Logs every configured UART port into its own file, one line per record.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uartlog_rs::{
    backend::{MockUart, MockUartHandle, SerialDriver, UartDriver},
    config::{LoggerSettings, PortSettings, SETTINGS_FILE},
    session::LoggerSession,
};

#[derive(Debug, Parser)]
#[command(name = "uartlog", version, about = "Log UART ports to files, one line per record")]
struct Cli {
    /// Logger settings file
    #[arg(long, default_value = SETTINGS_FILE)]
    settings: PathBuf,

    /// Port document, overriding the settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output directory, overriding the settings
    #[arg(long)]
    output: Option<PathBuf>,

    /// Use simulated ports that produce synthetic lines
    #[arg(long)]
    simulate: bool,

    /// Do not prefix lines with timestamps
    #[arg(long)]
    no_timestamps: bool,

    /// Run for this many seconds instead of until a line arrives on stdin
    #[arg(long)]
    duration_secs: Option<u64>,
}

/// Port document used by `--simulate` when none exists
const SIMULATED_DOCUMENT: &str = r#"{"uart": [
    {"tx_pin": 43, "rx_pin": 44, "cts_pin": -1, "rts_pin": -1, "baudRate": 115200, "stopBit": 1, "dataBit": 8, "parity": "none", "flowCtrl": "disable"},
    {"tx_pin": 17, "rx_pin": 16, "cts_pin": -1, "rts_pin": -1, "baudRate": 115200, "stopBit": 1, "dataBit": 8, "parity": "none", "flowCtrl": "disable"},
    {"tx_pin": 4, "rx_pin": 5, "cts_pin": 6, "rts_pin": 7, "baudRate": 921600, "stopBit": 1, "dataBit": 8, "parity": "even", "flowCtrl": "rtscts"}
]}"#;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = LoggerSettings::load_or_default(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    if let Some(config) = cli.config {
        settings.config_path = config;
    }
    if let Some(output) = cli.output {
        settings.output_dir = output;
    }
    if cli.no_timestamps {
        settings.timestamp_lines = false;
    }

    let _log_guard = init_tracing(settings.log_dir.as_deref())?;
    tracing::info!("Starting UART logger");

    let simulated = Arc::new(parking_lot::Mutex::new(Vec::new()));
    if cli.simulate {
        prepare_simulation(&mut settings)?;
    }

    let session = {
        let simulated = simulated.clone();
        let simulate = cli.simulate;
        LoggerSession::open(settings, move |port| make_driver(port, simulate, &simulated))
            .context("Failed to start logging")?
    };

    let stop = Arc::new(AtomicBool::new(false));
    let feeders: Vec<_> = simulated
        .lock()
        .drain(..)
        .map(|(name, handle)| spawn_feeder(name, handle, stop.clone()))
        .collect();

    match cli.duration_secs {
        Some(secs) => {
            tracing::info!("Logging for {} s", secs);
            std::thread::sleep(Duration::from_secs(secs));
        }
        None => {
            tracing::info!("Logging, press Enter to stop");
            let mut line = String::new();
            std::io::stdin()
                .read_line(&mut line)
                .context("Failed to read stdin")?;
        }
    }

    tracing::info!("Shutting down...");
    stop.store(true, Ordering::SeqCst);
    for feeder in feeders {
        let _ = feeder.join();
    }
    for report in session.shutdown() {
        tracing::info!("{}", report);
    }
    Ok(())
}

/// Install the global subscriber, adding a daily file log if `log_dir` is set
fn init_tracing(
    log_dir: Option<&Path>,
) -> anyhow::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,uartlog_rs=debug"))
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "uartlog.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();
    Ok(guard)
}

fn make_driver(
    port: &PortSettings,
    simulate: bool,
    simulated: &parking_lot::Mutex<Vec<(String, MockUartHandle)>>,
) -> Box<dyn UartDriver> {
    if simulate {
        let driver = MockUart::new();
        simulated.lock().push((port.name.clone(), driver.handle()));
        return Box::new(driver);
    }
    match &port.device {
        Some(device) => Box::new(SerialDriver::new(device.clone())),
        None => {
            tracing::warn!(
                "{} has no device configured; available: {:?}",
                port.name,
                SerialDriver::list_devices()
            );
            Box::new(SerialDriver::new(String::new()))
        }
    }
}

/// Point the session at a sample document if the configured one is missing
fn prepare_simulation(settings: &mut LoggerSettings) -> anyhow::Result<()> {
    if settings.config_path.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!(
            "Failed to create output directory {}",
            settings.output_dir.display()
        )
    })?;
    let path = settings.output_dir.join("simulated-config.json");
    std::fs::write(&path, SIMULATED_DOCUMENT)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Simulating with port document {}", path.display());
    settings.config_path = path;
    Ok(())
}

/// Feed synthetic lines into a simulated port until `stop` is set
fn spawn_feeder(
    name: String,
    handle: MockUartHandle,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut sequence = 0u64;
        while !stop.load(Ordering::SeqCst) {
            let line = format!("{} sample={} uptime_ms={}", name, sequence, sequence * 250);
            handle.feed_lines([line.as_str()]);
            sequence += 1;
            std::thread::sleep(Duration::from_millis(250));
        }
    })
}
