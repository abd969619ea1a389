//! The health monitor owns the printer link for the whole session.
//!
//! It waits for two things at once: write requests from [`Printer`](super::Printer) handles
//! and the poll timer. Whatever arrives first is handled to completion before the next wait,
//! so status queries and writes never overlap on the wire.

use super::{
    classify, command, io, status, DeviceLink, Error, HardwareVersion, PollFailurePolicy,
    RetryPolicy, TransientError,
};

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tracing::{debug, error, info, warn};

/// What the rest of the program gets to see of the printer.
/// It is replaced as a whole after every status check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PrinterState {
    pub hardware: HardwareVersion,
    pub media_width_mm: u8,
    pub transient_error: TransientError,

    /// The last periodic check failed; the other fields are from the last one that succeeded.
    pub degraded: bool,

    pub checked_at: DateTime<Local>,
}

impl PrinterState {
    /// A one-line message for whoever stands in front of the printer.
    pub fn message(&self) -> String {
        use TransientError::*;

        match self.transient_error {
            AllIsWell => format!("Printer OK, {}mm tape inserted", self.media_width_mm),
            NoTapeCartridge => String::from("No tape inserted!"),
            TapeRanOut => String::from("The tape has run out!"),
            TapeJammed => String::from("The tape is jammed!"),
            CoverOpen => String::from("The printer's cover is open!"),
        }
    }
}

/// One or more commands to be written back to back.
pub(super) struct Request {
    pub commands: Vec<Vec<u8>>,
    pub reply: oneshot::Sender<Result<(), io::Error>>,
}

/// Query the status and reduce it to the state we publish.
pub(super) async fn check_status<L>(
    link: &mut L,
    retry: &RetryPolicy,
) -> Result<PrinterState, status::Error>
where
    L: DeviceLink + ?Sized,
{
    let frame = status::query_status(link, retry).await?;
    let transient_error = classify::classify(&frame)?;

    Ok(PrinterState {
        hardware: frame.hardware,
        media_width_mm: frame.media_width_mm,
        transient_error,
        degraded: false,
        checked_at: Local::now(),
    })
}

/// Bring a freshly opened printer into a known state.
pub(super) async fn initialize<L>(link: &mut L, retry: &RetryPolicy) -> Result<PrinterState, Error>
where
    L: DeviceLink + ?Sized,
{
    // Clear outstanding jobs by sending a bunch of "invalid" commands.
    // Then reset the printer.
    link.submit(&command::wake())
        .await
        .map_err(init_step("start communication"))?;
    link.submit(&command::RESET)
        .await
        .map_err(init_step("reset the printer"))?;

    let state = check_status(link, retry).await?;

    info!(
        hardware = %state.hardware,
        media_width_mm = state.media_width_mm,
        state = %state.transient_error,
        "printer identified"
    );

    link.submit(&command::SET_AUTO_CUT)
        .await
        .map_err(init_step("set auto-cut"))?;
    link.submit(&command::SET_FULL_CUT)
        .await
        .map_err(init_step("set full cut"))?;
    link.submit(&command::SET_COMPRESSION)
        .await
        .map_err(init_step("set compression"))?;

    Ok(state)
}

fn init_step(step: &'static str) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::Init { step, source }
}

enum Event {
    Request(Request),
    Closed,
    Tick,
}

pub(super) struct HealthMonitor<L> {
    link: L,
    requests: mpsc::Receiver<Request>,
    state: watch::Sender<PrinterState>,
    poll_interval: Duration,
    retry: RetryPolicy,
    on_failure: PollFailurePolicy,

    /// A check failed without ending the session.
    /// Leftovers of its reply may still be on the stream.
    resync: bool,
}

impl<L: DeviceLink> HealthMonitor<L> {
    pub fn new(
        link: L,
        requests: mpsc::Receiver<Request>,
        state: watch::Sender<PrinterState>,
        poll_interval: Duration,
        retry: RetryPolicy,
        on_failure: PollFailurePolicy,
    ) -> Self {
        Self {
            link,
            requests,
            state,
            poll_interval,
            retry,
            on_failure,
            resync: false,
        }
    }

    /// Serve requests and poll until every printer handle is gone.
    ///
    /// Under [`PollFailurePolicy::Terminate`] a failed status check ends the loop with that error.
    pub async fn run(mut self) -> Result<(), Error> {
        loop {
            // The timer starts over on every iteration. A stream of writes postpones the
            // next status check, but never skips it once the stream pauses.
            let event = tokio::select! {
                request = self.requests.recv() => match request {
                    Some(request) => Event::Request(request),
                    None => Event::Closed,
                },
                _ = time::sleep(self.poll_interval) => Event::Tick,
            };

            match event {
                Event::Request(request) => self.serve(request).await,
                Event::Tick => self.poll().await?,
                Event::Closed => {
                    debug!("all printer handles dropped, stopping the health monitor");
                    return Ok(());
                }
            }
        }
    }

    async fn serve(&mut self, request: Request) {
        let mut result = Ok(());

        for command in &request.commands {
            if let Err(err) = self.link.submit(command).await {
                warn!(error = %err, "write to printer failed");
                result = Err(err);
                break;
            }
        }

        // The requester may have given up waiting. Nothing to do about that.
        _ = request.reply.send(result);
    }

    async fn check(&mut self) -> Result<PrinterState, status::Error> {
        if self.resync {
            let discarded = status::drain(&mut self.link).await?;

            if discarded > 0 {
                warn!(discarded, "dropped stale bytes from an earlier status reply");
            }

            self.resync = false;
        }

        check_status(&mut self.link, &self.retry).await
    }

    async fn poll(&mut self) -> Result<(), Error> {
        match self.check().await {
            Ok(state) => {
                info!(
                    state = %state.transient_error,
                    media_width_mm = state.media_width_mm,
                    "status OK"
                );
                self.state.send_replace(state);
                Ok(())
            }

            Err(err) => match self.on_failure {
                PollFailurePolicy::Terminate => {
                    error!(error = %err, "regular status inquiry failed");
                    Err(Error::Status(err))
                }

                PollFailurePolicy::Degrade => {
                    error!(error = %err, "regular status inquiry failed, keeping the last state");
                    self.resync = true;
                    self.state.send_modify(|state| state.degraded = true);
                    Ok(())
                }
            },
        }
    }
}
