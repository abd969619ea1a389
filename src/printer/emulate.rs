use super::{command, io, status::FRAME_LEN, DeviceLink, HardwareVersion};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Assemble a well-formed status frame.
pub fn status_frame(
    hardware: HardwareVersion,
    media_width_mm: u8,
    error1: u8,
    error2: u8,
) -> [u8; FRAME_LEN] {
    let mut data = [0x00; FRAME_LEN];

    data[0] = 0x80;
    data[1] = FRAME_LEN as u8;
    data[2] = 0x42;
    data[3] = 0x30;
    data[4] = hardware.status_byte();
    data[5] = 0x30;
    data[8] = error1;
    data[9] = error2;
    data[10] = media_width_mm;
    data[11] = if media_width_mm == 0 { 0x00 } else { 0x01 };

    data
}

struct Emulation {
    frame: [u8; FRAME_LEN],
    pending: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    reads: u32,
    spurious_eofs: u32,
    eofs_left: u32,
    reply_chunk: usize,
    reply_silenced: bool,
    write_failure: bool,
    cut: Option<(usize, Duration)>,
    late: Option<(Instant, Vec<u8>)>,
}

impl Emulation {
    /// Queue the tail of a cut reply once it is due.
    fn deliver_late(&mut self) {
        let due = matches!(&self.late, Some((at, _)) if Instant::now() >= *at);

        if due {
            if let Some((_, tail)) = self.late.take() {
                self.pending.extend(tail);
            }
        }
    }
}

/// A printer that lives in memory.
///
/// It answers every status query with the configured frame and records everything written to it.
/// Clones share the same emulated device, so one clone can be handed to the driver while another
/// one inspects and reconfigures it.
#[derive(Clone)]
pub struct EmulatedLink {
    inner: Arc<Mutex<Emulation>>,
}

impl Default for EmulatedLink {
    fn default() -> Self {
        Self::new()
    }
}

impl EmulatedLink {
    /// A healthy PT-P700 with 12 mm tape.
    pub fn new() -> Self {
        Self::with_frame(status_frame(HardwareVersion::PTP700, 12, 0x00, 0x00))
    }

    pub fn with_frame(frame: [u8; FRAME_LEN]) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Emulation {
                frame,
                pending: VecDeque::new(),
                written: Vec::new(),
                reads: 0,
                spurious_eofs: 0,
                eofs_left: 0,
                reply_chunk: FRAME_LEN,
                reply_silenced: false,
                write_failure: false,
                cut: None,
                late: None,
            })),
        }
    }

    /// Answer future status queries with `frame`.
    pub async fn set_frame(&self, frame: [u8; FRAME_LEN]) {
        self.inner.lock().await.frame = frame;
    }

    /// Change only the error bytes of the frame.
    pub async fn set_errors(&self, error1: u8, error2: u8) {
        let mut inner = self.inner.lock().await;
        inner.frame[8] = error1;
        inner.frame[9] = error2;
    }

    pub async fn set_media_width(&self, media_width_mm: u8) {
        self.inner.lock().await.frame[10] = media_width_mm;
    }

    /// Signal end-of-stream this many times before each status reply.
    pub async fn set_spurious_eofs(&self, count: u32) {
        self.inner.lock().await.spurious_eofs = count;
    }

    /// Hand out status replies in pieces of at most `chunk` bytes.
    pub async fn set_reply_chunk(&self, chunk: usize) {
        self.inner.lock().await.reply_chunk = chunk.max(1);
    }

    /// Never answer status queries.
    pub async fn set_reply_silenced(&self, silenced: bool) {
        self.inner.lock().await.reply_silenced = silenced;
    }

    /// Deliver only the first `bytes` bytes of the next status reply.
    /// The rest of it shows up on the stream `delay` later.
    pub async fn cut_next_reply(&self, bytes: usize, delay: Duration) {
        self.inner.lock().await.cut = Some((bytes.min(FRAME_LEN), delay));
    }

    /// Fail every write with a broken pipe.
    pub async fn set_write_failure(&self, failure: bool) {
        self.inner.lock().await.write_failure = failure;
    }

    /// Every successful write so far, one entry per write.
    pub async fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().await.written.clone()
    }

    pub async fn clear_written(&self) {
        self.inner.lock().await.written.clear();
    }

    /// Number of read calls so far.
    pub async fn reads(&self) -> u32 {
        self.inner.lock().await.reads
    }

    /// Number of status queries received so far.
    pub async fn status_queries(&self) -> usize {
        self.inner
            .lock()
            .await
            .written
            .iter()
            .filter(|w| w.as_slice() == command::STATUS_QUERY)
            .count()
    }
}

#[async_trait]
impl DeviceLink for EmulatedLink {
    async fn write(&mut self, data: &[u8]) -> Result<usize, io::Error> {
        let mut inner = self.inner.lock().await;

        if inner.write_failure {
            return Err(io::Error::Device(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "emulated write failure",
            )));
        }

        inner.deliver_late();
        inner.written.push(data.to_vec());

        if data == command::STATUS_QUERY && !inner.reply_silenced {
            let frame = inner.frame;

            match inner.cut.take() {
                Some((bytes, delay)) => {
                    inner.pending.extend(&frame[..bytes]);
                    inner.late = Some((Instant::now() + delay, frame[bytes..].to_vec()));
                }
                None => inner.pending.extend(frame),
            }

            inner.eofs_left = inner.spurious_eofs;
        }

        Ok(data.len())
    }

    async fn read(&mut self, data: &mut [u8]) -> Result<usize, io::Error> {
        let mut inner = self.inner.lock().await;
        inner.reads += 1;
        inner.deliver_late();

        if inner.eofs_left > 0 {
            inner.eofs_left -= 1;
            return Ok(0);
        }

        let count = data.len().min(inner.reply_chunk).min(inner.pending.len());

        for (slot, byte) in data.iter_mut().zip(inner.pending.drain(..count)) {
            *slot = byte;
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_to_status_queries_only() {
        let mut link = EmulatedLink::new();
        let mut buf = [0u8; FRAME_LEN];

        link.submit(&command::RESET).await.unwrap();
        assert_eq!(link.read(&mut buf).await.unwrap(), 0);

        link.submit(&command::STATUS_QUERY).await.unwrap();
        assert_eq!(link.read(&mut buf).await.unwrap(), FRAME_LEN);
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[4], HardwareVersion::PTP700.status_byte());

        assert_eq!(link.status_queries().await, 1);
        assert_eq!(link.written().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cut_replies_finish_late() {
        let mut link = EmulatedLink::new();
        let mut buf = [0u8; FRAME_LEN];
        link.cut_next_reply(5, Duration::from_secs(2)).await;

        link.submit(&command::STATUS_QUERY).await.unwrap();
        assert_eq!(link.read(&mut buf).await.unwrap(), 5);
        assert_eq!(link.read(&mut buf).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(link.read(&mut buf).await.unwrap(), FRAME_LEN - 5);
        assert_eq!(buf[0], 0x30);
    }

    #[tokio::test]
    async fn clones_share_the_device() {
        let mut link = EmulatedLink::new();
        let observer = link.clone();

        link.submit(&command::END_OF_PRINT).await.unwrap();
        assert_eq!(observer.written().await, vec![vec![0x1a]]);
    }
}
