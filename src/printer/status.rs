use super::{command, io, ClassifyError, DeviceLink, HardwareVersion, MediaType, RetryPolicy};

use tracing::{debug, warn};

/// The status frame always has exactly this many bytes.
pub const FRAME_LEN: usize = 32;

const PRINT_HEAD_MARK: u8 = 0x80;
const FIXED_BYTES: [(usize, u8); 3] = [(2, 0x42), (3, 0x30), (5, 0x30)];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to ask the printer for its status: {0}")]
    Request(#[source] io::Error),

    #[error("Error reading the printer status: {0}")]
    Read(#[source] io::Error),

    #[error("The status response from the printer is incomplete ({received} of 32 bytes after {attempts} attempts).")]
    IncompleteFrame { received: usize, attempts: u32 },

    #[error("The status response from the printer has the wrong print head mark ({0:#04x} instead of 0x80).")]
    WrongPrintHeadMark(u8),

    #[error("The status response from the printer has the wrong size at header level ({0} instead of 32 bytes).")]
    WrongResponseSizeHeader(u8),

    #[error("The status response from the printer has a wrong fixed byte at offset {offset} ({found:#04x} instead of {expected:#04x}).")]
    WrongFixedByte { offset: usize, expected: u8, found: u8 },

    #[error("The printer reports an unknown hardware version ({0:#04x}).")]
    UnknownHardware(u8),

    #[error("The printer reports an error: {0}")]
    Classify(#[from] ClassifyError),
}

bitflags! {
    /// Both error information bytes of the status frame.
    /// Error information 1 is the LSB, error information 2 the MSB.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ErrorFlags: u16 {
        // Error info 1 (LSB)
        const NO_MEDIA = 0b0000_0000_0000_0001;
        const END_OF_MEDIA = 0b0000_0000_0000_0010;
        const CUTTER_JAM = 0b0000_0000_0000_0100;
        const WEAK_BATTERIES = 0b0000_0000_0000_1000;
        const PRINTER_IN_USE = 0b0000_0000_0001_0000;
        const TURNED_OFF = 0b0000_0000_0010_0000;
        const HIGH_VOLTAGE_ADAPTER = 0b0000_0000_0100_0000;
        const FAN_NOT_WORKING = 0b0000_0000_1000_0000;

        // Error info 2 (MSB)
        const REPLACE_MEDIA = 0b0000_0001_0000_0000;
        const EXPANSION_BUFFER_FULL = 0b0000_0010_0000_0000;
        const TRANSMISSION_ERROR = 0b0000_0100_0000_0000;
        const COMMUNICATION_BUFFER_FULL = 0b0000_1000_0000_0000;
        const COVER_OPEN = 0b0001_0000_0000_0000;
        const OVERHEATING = 0b0010_0000_0000_0000;
        const CANNOT_FEED = 0b0100_0000_0000_0000;
        const SYSTEM_ERROR = 0b1000_0000_0000_0000;
    }
}

impl ErrorFlags {
    pub fn from_bytes(error1: u8, error2: u8) -> Self {
        // Keep bits we have no name for, the classifier has to see them.
        Self::from_bits_retain(u16::from_le_bytes([error1, error2]))
    }

    pub fn error1(&self) -> u8 {
        self.bits().to_le_bytes()[0]
    }

    pub fn error2(&self) -> u8 {
        self.bits().to_le_bytes()[1]
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusType {
    StatusReply,
    PrintingCompleted,
    ErrorOccurred,
    TurnedOff,
    Notification,
    PhaseChange,
    Unknown(u8),
}

impl From<u8> for StatusType {
    fn from(value: u8) -> Self {
        use StatusType::*;

        match value {
            0x00 => StatusReply,
            0x01 => PrintingCompleted,
            0x02 => ErrorOccurred,
            0x04 => TurnedOff,
            0x05 => Notification,
            0x06 => PhaseChange,
            other => Unknown(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PhaseType {
    Editing,
    Feeding,
    Printing,
    Unknown(u8),
}

impl From<u8> for PhaseType {
    fn from(value: u8) -> Self {
        use PhaseType::*;

        match value {
            0x00 => Editing,
            0x01 => Printing,
            0x02 => Feeding,
            other => Unknown(other),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Notification {
    CoverOpen,
    CoverClosed,
    CoolingStart,
    CoolingFinish,
    Unknown(u8),
}

impl Notification {
    fn from_byte(value: u8) -> Option<Self> {
        use Notification::*;

        match value {
            0x00 => None,
            0x01 => Some(CoverOpen),
            0x02 => Some(CoverClosed),
            0x03 => Some(CoolingStart),
            0x04 => Some(CoolingFinish),
            other => Some(Unknown(other)),
        }
    }
}

/// A validated status frame.
///
/// Only the fixed bytes and the hardware version are checked while parsing.
/// The reserved bytes are expected to be zero, but the printer is not held to that.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub hardware: HardwareVersion,
    pub error_flags: ErrorFlags,
    pub media_width_mm: u8,
    pub media_type: MediaType,
    pub media_length_mm: u8,
    pub status_type: StatusType,
    pub phase_type: PhaseType,
    pub phase_number: u16,
    pub notification: Option<Notification>,
}

impl StatusFrame {
    pub fn parse(data: &[u8; FRAME_LEN]) -> Result<Self, Error> {
        // Check head mark and length.
        if data[0] != PRINT_HEAD_MARK {
            return Err(Error::WrongPrintHeadMark(data[0]));
        }

        if data[1] as usize != FRAME_LEN {
            return Err(Error::WrongResponseSizeHeader(data[1]));
        }

        // The hardware version sits between the fixed bytes, but is checked in stream order.
        for &(offset, expected) in &FIXED_BYTES[..2] {
            check_fixed(data, offset, expected)?;
        }

        let hardware = HardwareVersion::try_from(data[4]).map_err(Error::UnknownHardware)?;

        let (offset, expected) = FIXED_BYTES[2];
        check_fixed(data, offset, expected)?;

        Ok(Self {
            hardware,
            error_flags: ErrorFlags::from_bytes(data[8], data[9]),
            media_width_mm: data[10],
            media_type: MediaType::from(data[11]),
            media_length_mm: data[17],
            status_type: StatusType::from(data[18]),
            phase_type: PhaseType::from(data[19]),
            phase_number: u16::from_be_bytes([data[20], data[21]]),
            notification: Notification::from_byte(data[22]),
        })
    }
}

fn check_fixed(data: &[u8; FRAME_LEN], offset: usize, expected: u8) -> Result<(), Error> {
    if data[offset] != expected {
        return Err(Error::WrongFixedByte {
            offset,
            expected,
            found: data[offset],
        });
    }

    Ok(())
}

/// Ask the printer for its status and parse the reply.
pub async fn query_status<L>(link: &mut L, retry: &RetryPolicy) -> Result<StatusFrame, Error>
where
    L: DeviceLink + ?Sized,
{
    link.submit(&command::STATUS_QUERY)
        .await
        .map_err(Error::Request)?;

    let data = read_frame(link, retry).await?;
    let frame = StatusFrame::parse(&data)?;

    debug!(hardware = %frame.hardware, "hardware identified");

    Ok(frame)
}

/// Read exactly one status frame.
///
/// The printer is slow and its USB interface is buggy. It wantonly signals end-of-stream rather
/// than blocking, even when data is still on its way. Those reads are retried per `retry`; any
/// other read error aborts immediately.
pub async fn read_frame<L>(link: &mut L, retry: &RetryPolicy) -> Result<[u8; FRAME_LEN], Error>
where
    L: DeviceLink + ?Sized,
{
    let mut data = [0u8; FRAME_LEN];
    let mut received = 0;
    let mut attempts = retry.start();

    while received < FRAME_LEN {
        let read = link.read(&mut data[received..]).await.map_err(Error::Read)?;

        if read == 0 {
            warn!(
                attempt = attempts.failed() + 1,
                received, "end-of-stream while reading status"
            );

            if !attempts.backoff().await {
                return Err(Error::IncompleteFrame {
                    received,
                    attempts: attempts.failed(),
                });
            }

            continue;
        }

        received += read;
    }

    Ok(data)
}

/// Upper bound for [`drain`], in bytes.
const DRAIN_LIMIT: usize = 16 * FRAME_LEN;

/// Discard whatever the printer still has queued, up to the next end-of-stream.
///
/// A status query that gave up halfway leaves the rest of its frame on the stream. Unless it is
/// drained, every following reply is read from a shifted position. Returns the number of bytes
/// thrown away.
pub async fn drain<L>(link: &mut L) -> Result<usize, Error>
where
    L: DeviceLink + ?Sized,
{
    let mut buf = [0u8; FRAME_LEN];
    let mut discarded = 0;

    while discarded < DRAIN_LIMIT {
        let read = link.read(&mut buf).await.map_err(Error::Read)?;

        if read == 0 {
            break;
        }

        discarded += read;
    }

    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::printer::emulate::{status_frame, EmulatedLink};
    use std::time::Duration;
    use tokio::time::Instant;

    fn healthy() -> [u8; FRAME_LEN] {
        status_frame(HardwareVersion::PTP700, 12, 0x00, 0x00)
    }

    #[test]
    fn parses_a_healthy_frame() {
        let frame = StatusFrame::parse(&healthy()).unwrap();

        assert_eq!(frame.hardware, HardwareVersion::PTP700);
        assert_eq!(frame.media_width_mm, 12);
        assert_eq!(frame.media_type, MediaType::Laminated);
        assert!(frame.error_flags.is_empty());
        assert_eq!(frame.status_type, StatusType::StatusReply);
        assert_eq!(frame.notification, None);
    }

    #[test]
    fn keeps_unnamed_error_bits() {
        let mut data = healthy();
        data[8] = 0x01;
        data[9] = 0x10;

        let frame = StatusFrame::parse(&data).unwrap();
        assert_eq!(frame.error_flags.error1(), 0x01);
        assert_eq!(frame.error_flags.error2(), 0x10);
        assert!(frame.error_flags.contains(ErrorFlags::NO_MEDIA | ErrorFlags::COVER_OPEN));
    }

    #[test]
    fn wrong_head_mark_is_a_protocol_error() {
        for mark in [0x00, 0x7f, 0x81, 0xff] {
            let mut data = healthy();
            data[0] = mark;

            assert!(matches!(
                StatusFrame::parse(&data),
                Err(Error::WrongPrintHeadMark(m)) if m == mark
            ));
        }
    }

    #[test]
    fn wrong_size_is_a_protocol_error() {
        let mut data = healthy();
        data[1] = 31;

        assert!(matches!(
            StatusFrame::parse(&data),
            Err(Error::WrongResponseSizeHeader(31))
        ));
    }

    #[test]
    fn wrong_fixed_bytes_are_protocol_errors() {
        for offset in [2, 3, 5] {
            let mut data = healthy();
            data[offset] ^= 0xff;

            match StatusFrame::parse(&data) {
                Err(Error::WrongFixedByte { offset: o, .. }) => assert_eq!(o, offset),
                other => panic!("offset {}: unexpected {:?}", offset, other),
            }
        }
    }

    #[test]
    fn unknown_hardware_is_rejected() {
        let mut data = healthy();
        data[4] = 0x30;

        assert!(matches!(
            StatusFrame::parse(&data),
            Err(Error::UnknownHardware(0x30))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_exactly_ten_attempts() {
        let mut link = EmulatedLink::new();
        link.set_reply_silenced(true).await;

        let started = Instant::now();
        let result = query_status(&mut link, &RetryPolicy::default()).await;

        assert!(matches!(
            result,
            Err(Error::IncompleteFrame {
                received: 0,
                attempts: 10
            })
        ));
        assert_eq!(link.reads().await, 10);
        assert_eq!(started.elapsed(), Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_from_spurious_end_of_stream() {
        let mut link = EmulatedLink::new();
        link.set_spurious_eofs(3).await;

        let frame = query_status(&mut link, &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(frame.hardware, HardwareVersion::PTP700);
        assert_eq!(link.reads().await, 4);
        assert_eq!(link.written().await, vec![command::STATUS_QUERY.to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn assembles_frames_delivered_in_pieces() {
        let mut link = EmulatedLink::new();
        link.set_reply_chunk(5).await;

        let frame = query_status(&mut link, &RetryPolicy::default())
            .await
            .unwrap();

        assert_eq!(frame.media_width_mm, 12);
        assert_eq!(link.reads().await, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_discards_the_rest_of_a_torn_reply() {
        let mut link = EmulatedLink::new();
        let retry = RetryPolicy::default();
        link.cut_next_reply(5, Duration::from_millis(1500)).await;

        assert!(matches!(
            query_status(&mut link, &retry).await,
            Err(Error::IncompleteFrame {
                received: 5,
                attempts: 10
            })
        ));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(drain(&mut link).await.unwrap(), FRAME_LEN - 5);

        // Back in step with the printer.
        let frame = query_status(&mut link, &retry).await.unwrap();
        assert_eq!(frame.media_width_mm, 12);
    }

    #[tokio::test]
    async fn drain_stops_at_end_of_stream() {
        let mut link = EmulatedLink::new();

        assert_eq!(drain(&mut link).await.unwrap(), 0);
        assert_eq!(link.reads().await, 1);
    }

    #[tokio::test]
    async fn failed_request_is_not_retried() {
        let mut link = EmulatedLink::new();
        link.set_write_failure(true).await;

        let result = query_status(&mut link, &RetryPolicy::default()).await;

        assert!(matches!(result, Err(Error::Request(_))));
        assert_eq!(link.reads().await, 0);
    }
}
