use super::{HardwareVersion, RetryPolicy};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to read the configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("The configuration is invalid: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where to find the printer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Device {
    /// A character device provided by the usblp kernel driver.
    Path { path: PathBuf },

    /// Raw USB access. If `model` is given, the first printer of this model is used.
    Usb { model: Option<HardwareVersion> },

    /// An in-memory printer for trying things out without hardware.
    Emulated,
}

impl Default for Device {
    fn default() -> Self {
        Device::Path {
            path: PathBuf::from("/dev/usb/lp1"),
        }
    }
}

/// What to do when a periodic status check fails.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollFailurePolicy {
    /// Stop the health monitor and report the error. The process is expected to exit.
    #[default]
    Terminate,

    /// Keep the last known state, flag it as degraded and try again on the next tick.
    Degrade,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PrinterConfig {
    pub device: Device,

    /// Seconds without traffic before the printer status is checked again.
    pub poll_interval_secs: u64,

    /// Retry policy for status frames the printer fails to deliver in one go.
    pub read_retry: RetryPolicy,

    pub on_poll_failure: PollFailurePolicy,

    /// Number of write requests that may wait for the health monitor before submitters block.
    pub submit_queue: usize,
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            device: Device::default(),
            poll_interval_secs: 10,
            read_retry: RetryPolicy::default(),
            on_poll_failure: PollFailurePolicy::default(),
            submit_queue: 1,
        }
    }
}

impl PrinterConfig {
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_toml(&text)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
