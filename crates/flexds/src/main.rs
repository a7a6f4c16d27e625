//! flexds FlexVolume driver entry point.

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use clap::Parser;
use color_eyre::eyre::Result;
use flexds_common::{FlexError, FlexResult};
use flexds_transfer::StoreTransfer;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use flexds::cli::{Cli, DriverOutput};
use flexds::config::{FlexConfig, LogConfig, LogFormat};
use flexds::driver::DatasetVolumes;
use flexds::filesystem::SystemDevice;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments; usage errors go to stderr
    let cli = Cli::parse();
    let operation = cli.command.operation().to_string();

    let output = match bootstrap(&cli) {
        Ok(driver) => cli.command.execute(&driver).await,
        Err(err) => DriverOutput::failure(&operation, &err),
    };

    output.write_to(io::stdout().lock())?;
    Ok(())
}

fn bootstrap(cli: &Cli) -> FlexResult<DatasetVolumes> {
    let config = FlexConfig::load(cli.config.as_deref())?;
    init_tracing(&config.log, cli.debug)?;

    let transfer = StoreTransfer::s3(config.s3.clone());
    Ok(DatasetVolumes::new(config, SystemDevice::new(), transfer))
}

/// Install the global subscriber. Nothing is ever logged to stdout.
fn init_tracing(log: &LogConfig, debug: bool) -> FlexResult<()> {
    let level = if debug { "debug" } else { log.level.as_str() };
    let filter = EnvFilter::try_new(level)
        .map_err(|e| FlexError::config(format!("invalid log filter '{level}': {e}")))?;

    let writer = match &log.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| FlexError::io(format!("failed to open {}", path.display()), e))?;
            fmt::writer::BoxMakeWriter::new(Mutex::new(file))
        }
        None => fmt::writer::BoxMakeWriter::new(io::stderr),
    };

    let layer = match log.format {
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| FlexError::config(format!("failed to initialize logging: {e}")))
}
