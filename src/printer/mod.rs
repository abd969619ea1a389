use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

/// Raw command bytes of the P-touch raster protocol.
pub mod command;

/// There are different printer models, told apart by their hardware version.
mod model;
pub use model::HardwareVersion;

/// Tape properties: the kind of media and how many pins of the print head a tape width covers.
mod label;
pub use label::{printable_pixels, MediaType};

/// The byte-stream link to the printer and its character-device flavour.
mod io;
pub use io::{DeviceLink, Error as IOError, FileLink};

/// Search the list of available USB devices, find a P-touch printer and attach it.
mod attach;
pub use attach::{Error as AttachError, UsbLink};

/// An in-memory printer.
pub mod emulate;
pub use emulate::EmulatedLink;

/// Bounded retries for the printer's flaky reads.
mod retry;
pub use retry::{Attempts, RetryPolicy};

/// The status response is the basic feedback method from the printer to the host.
pub mod status;
pub use status::{Error as StatusError, ErrorFlags as StatusErrorFlags, StatusFrame};

/// Reduce the error flags of a status response to something an operator can act on.
mod classify;
pub use classify::{classify, Error as ClassifyError, TransientError};

/// Printing requires the conversion of the input picture into raster lines.
mod print;
pub use print::{encode, Error as PrintError, Padding, PrintJob, RasterLine, CANVAS_WIDTH};

/// Device selection, poll interval and failure policy.
mod config;
pub use config::{Device, Error as ConfigError, PollFailurePolicy, PrinterConfig};

/// The background task owning the link.
mod monitor;
pub use monitor::PrinterState;

use monitor::{HealthMonitor, Request};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to attach the printer: {0}")]
    Attach(#[from] AttachError),

    #[error(transparent)]
    IO(#[from] IOError),

    #[error("Unable to {step}: {source}")]
    Init { step: &'static str, source: IOError },

    #[error("Status problem: {0}")]
    Status(#[from] StatusError),

    #[error(transparent)]
    Print(#[from] PrintError),

    #[error("The printer health monitor has stopped.")]
    MonitorStopped,
}

/// The health monitor task. It resolves once the session is over.
pub type MonitorHandle = JoinHandle<Result<(), Error>>;

/// A handle to a running printer session.
///
/// Handles are cheap to clone. The session ends once the last handle is dropped,
/// or when the health monitor gives up on the printer.
#[derive(Clone)]
pub struct Printer {
    requests: mpsc::Sender<Request>,
    state: watch::Receiver<PrinterState>,
}

impl Printer {
    /// Open the printer named by the configuration, initialize it and start the health monitor.
    pub async fn open(config: &PrinterConfig) -> Result<(Self, MonitorHandle), Error> {
        match &config.device {
            Device::Path { path } => Self::start(FileLink::open(path).await?, config).await,
            Device::Usb { model } => Self::start(UsbLink::attach(*model)?, config).await,
            Device::Emulated => Self::start(EmulatedLink::new(), config).await,
        }
    }

    /// Initialize the printer behind `link` and hand the link over to a new health monitor.
    pub async fn start<L>(
        mut link: L,
        config: &PrinterConfig,
    ) -> Result<(Self, MonitorHandle), Error>
    where
        L: DeviceLink + 'static,
    {
        let state = monitor::initialize(&mut link, &config.read_retry).await?;

        info!(
            media_width_mm = state.media_width_mm,
            "printer initialized successfully"
        );

        let (request_tx, request_rx) = mpsc::channel(config.submit_queue.max(1));
        let (state_tx, state_rx) = watch::channel(state);

        let monitor = HealthMonitor::new(
            link,
            request_rx,
            state_tx,
            config.poll_interval(),
            config.read_retry,
            config.on_poll_failure,
        );

        let printer = Printer {
            requests: request_tx,
            state: state_rx,
        };

        Ok((printer, tokio::spawn(monitor.run())))
    }

    /// The result of the most recent successful status check.
    pub fn state(&self) -> PrinterState {
        *self.state.borrow()
    }

    /// Get notified whenever a status check completes.
    pub fn subscribe(&self) -> watch::Receiver<PrinterState> {
        self.state.clone()
    }

    /// Width of the inserted tape in millimeters.
    pub fn media_width(&self) -> u8 {
        self.state.borrow().media_width_mm
    }

    pub fn transient_error(&self) -> TransientError {
        self.state.borrow().transient_error
    }

    pub fn status_message(&self) -> String {
        self.state.borrow().message()
    }

    /// Write one command to the printer once the health monitor gets to it.
    pub async fn submit(&self, command: Vec<u8>) -> Result<(), Error> {
        self.submit_batch(vec![command]).await
    }

    /// Write several commands back to back. Nothing else reaches the printer in between.
    pub async fn submit_batch(&self, commands: Vec<Vec<u8>>) -> Result<(), Error> {
        let (reply, response) = oneshot::channel();

        self.requests
            .send(Request { commands, reply })
            .await
            .map_err(|_| Error::MonitorStopped)?;

        response.await.map_err(|_| Error::MonitorStopped)??;

        Ok(())
    }
}
