use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to open printer device {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("An IO error has occurred on the printer device: {0}")]
    Device(#[from] std::io::Error),

    #[error("An USB error has occurred: {0}")]
    Usb(#[from] rusb::Error),

    #[error("The blocking USB transfer has been aborted: {0}")]
    Aborted(#[from] tokio::task::JoinError),

    #[error("Failed writing to the printer (expected {expected} bytes, wrote {written}).")]
    ShortWrite { expected: usize, written: usize },
}

/// A byte-stream connection to a printer.
///
/// The link is owned by exactly one task at a time; it is never shared for concurrent access.
#[async_trait]
pub trait DeviceLink: Send {
    /// Perform one write and report how many bytes the device took.
    async fn write(&mut self, data: &[u8]) -> Result<usize, Error>;

    /// Perform one read. `Ok(0)` means the device signalled end-of-stream.
    async fn read(&mut self, data: &mut [u8]) -> Result<usize, Error>;

    /// Write `data` as one discrete command. Anything less than the full slice is a failure.
    async fn submit(&mut self, data: &[u8]) -> Result<(), Error> {
        let written = self.write(data).await?;

        if written != data.len() {
            return Err(Error::ShortWrite {
                expected: data.len(),
                written,
            });
        }

        Ok(())
    }
}

/// A printer exposed as a character device by the kernel's usblp driver (e.g. `/dev/usb/lp1`).
///
/// Every transfer is exactly one `read(2)` or `write(2)` on tokio's blocking pool, so the byte
/// count reported is the one the kernel returned.
pub struct FileLink {
    file: Arc<File>,
}

impl FileLink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            file: Arc::new(file.into_std().await),
        })
    }
}

#[async_trait]
impl DeviceLink for FileLink {
    async fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let file = Arc::clone(&self.file);
        let data = data.to_vec();

        let written = tokio::task::spawn_blocking(move || (&*file).write(&data)).await??;

        Ok(written)
    }

    async fn read(&mut self, data: &mut [u8]) -> Result<usize, Error> {
        let file = Arc::clone(&self.file);
        let mut buf = vec![0u8; data.len()];

        let (read, buf) = tokio::task::spawn_blocking(move || {
            (&*file).read(&mut buf).map(|read| (read, buf))
        })
        .await??;

        data[..read].copy_from_slice(&buf[..read]);

        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `limit` bytes per write.
    struct Throttled {
        limit: usize,
    }

    #[async_trait]
    impl DeviceLink for Throttled {
        async fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
            Ok(data.len().min(self.limit))
        }

        async fn read(&mut self, _data: &mut [u8]) -> Result<usize, Error> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn submit_accepts_complete_writes() {
        let mut link = Throttled { limit: 16 };
        assert!(link.submit(&[0x1b, b'@']).await.is_ok());
    }

    #[tokio::test]
    async fn submit_reports_short_writes() {
        let mut link = Throttled { limit: 3 };

        match link.submit(&[0u8; 20]).await {
            Err(Error::ShortWrite { expected, written }) => {
                assert_eq!(expected, 20);
                assert_eq!(written, 3);
            }
            other => panic!("expected a short write, got {:?}", other),
        }
    }

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("ptlabel-{}-{}", std::process::id(), name))
    }

    #[tokio::test]
    async fn file_link_writes_each_command_once() {
        let path = scratch_path("commands");
        std::fs::write(&path, b"").unwrap();

        let mut link = FileLink::open(&path).await.unwrap();
        assert_eq!(link.write(&[0x1b, b'@']).await.unwrap(), 2);
        link.submit(&[0x1a]).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0x1b, b'@', 0x1a]);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn file_link_reads_what_is_there() {
        let path = scratch_path("reply");
        std::fs::write(&path, [0x80u8, 0x20, 0x42]).unwrap();

        let mut link = FileLink::open(&path).await.unwrap();
        let mut buf = [0u8; 32];

        assert_eq!(link.read(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], &[0x80, 0x20, 0x42]);
        assert_eq!(link.read(&mut buf).await.unwrap(), 0);
        std::fs::remove_file(&path).unwrap();
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn file_link_reports_failed_writes_right_away() {
        // Every write to /dev/full fails with ENOSPC.
        let mut link = FileLink::open("/dev/full").await.unwrap();

        assert!(matches!(link.write(&[0u8; 8]).await, Err(Error::Device(_))));
        assert!(matches!(link.submit(&[0u8; 8]).await, Err(Error::Device(_))));
    }

    #[tokio::test]
    async fn opening_a_missing_device_names_the_path() {
        let err = FileLink::open("/nonexistent/usb/lp9")
            .await
            .err()
            .expect("the device must not exist");

        assert!(err.to_string().contains("/nonexistent/usb/lp9"));
    }
}
