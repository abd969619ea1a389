//! # ptlabel
//!
//! Command-line front end for Brother P-touch tape printers.
//!
//! ```bash
//! # Show what the printer is up to
//! ptlabel status
//!
//! # Print a monochrome PNG (its width must be a multiple of 8, at most 128 pixels)
//! ptlabel --dev /dev/usb/lp0 print label.png
//!
//! # Keep an eye on the printer until Ctrl-C
//! ptlabel --usb monitor
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::task::JoinError;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ptlabel::printer::{
    printable_pixels, Device, Error, HardwareVersion, MonitorHandle, PollFailurePolicy, Printer,
    PrinterConfig,
};

/// Drive a Brother P-touch tape printer
#[derive(Parser, Debug)]
#[command(name = "ptlabel")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Read settings from this TOML file; flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// The USB device of the label printer
    #[arg(long, value_name = "PATH", conflicts_with_all = ["usb", "emulate"])]
    dev: Option<PathBuf>,

    /// Claim the printer directly on the USB bus
    #[arg(long, conflicts_with = "emulate")]
    usb: bool,

    /// Only attach printers of this model (with --usb), e.g. "PT-P700"
    #[arg(long, requires = "usb", value_parser = parse_model)]
    model: Option<HardwareVersion>,

    /// Use an in-memory printer instead of real hardware
    #[arg(long)]
    emulate: bool,

    /// Seconds between status checks
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Keep going with the last known state when a status check fails
    #[arg(long)]
    degrade: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the printer and report its status
    Status,

    /// Print a monochrome PNG
    Print {
        /// The image to print
        image: PathBuf,
    },

    /// Watch the printer until interrupted
    Monitor,
}

fn parse_model(value: &str) -> Result<HardwareVersion, String> {
    HardwareVersion::try_from(value)
}

impl Cli {
    fn printer_config(&self) -> Result<PrinterConfig> {
        let mut config = match &self.config {
            Some(path) => PrinterConfig::load(path)?,
            None => PrinterConfig::default(),
        };

        if let Some(path) = &self.dev {
            config.device = Device::Path { path: path.clone() };
        } else if self.usb {
            config.device = Device::Usb { model: self.model };
        } else if self.emulate {
            config.device = Device::Emulated;
        }

        if let Some(secs) = self.poll_interval {
            config.poll_interval_secs = secs;
        }

        if self.degrade {
            config.on_poll_failure = PollFailurePolicy::Degrade;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = cli.printer_config()?;

    let (printer, monitor) = Printer::open(&config)
        .await
        .context("Could not initialize printer")?;

    info!(
        media_width_mm = printer.media_width(),
        printable_pixels = printable_pixels(printer.media_width()),
        "printer ready"
    );

    match cli.command {
        Commands::Status => {
            println!("{}", printer.status_message());
            Ok(())
        }

        Commands::Print { image } => {
            let png = tokio::fs::read(&image)
                .await
                .with_context(|| format!("Could not read {}", image.display()))?;

            printer
                .print_png(&png)
                .await
                .with_context(|| format!("Could not print {}", image.display()))?;

            println!("{}", printer.status_message());
            Ok(())
        }

        Commands::Monitor => monitor_until_interrupted(printer, monitor).await,
    }
}

async fn monitor_until_interrupted(printer: Printer, mut monitor: MonitorHandle) -> Result<()> {
    let mut updates = printer.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                return Ok(());
            }

            result = &mut monitor => return finish(result),

            changed = updates.changed() => {
                if changed.is_err() {
                    // The monitor dropped its end, so it is about to resolve.
                    return finish(monitor.await);
                }

                let state = *updates.borrow_and_update();
                println!(
                    "[{}] {}{}",
                    state.checked_at.format("%H:%M:%S"),
                    state.message(),
                    if state.degraded { " (stale)" } else { "" }
                );
            }
        }
    }
}

fn finish(result: Result<Result<(), Error>, JoinError>) -> Result<()> {
    // There is no way to recover a printer that stopped answering sensibly.
    match result.context("Health monitor panicked")? {
        Ok(()) => Ok(()),

        Err(err) => {
            error!(error = %err, "giving up on the printer");
            Err(err).context("Regular status inquiry failed")
        }
    }
}
