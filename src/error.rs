use std::io;
use thiserror::Error;

/// Errors surfaced by a probe pass or by the device adapters
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Read of {len} bytes at offset {offset} exceeds device size {size}")]
    OutOfRange { offset: u64, len: u64, size: u64 },

    #[error("Short read at offset {offset}: expected {expected}, got {actual}")]
    ShortRead {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid read request: {0}")]
    InvalidRequest(String),

    #[error("Ambivalent result: {} formats detected ({})", .0.len(), .0.join(", "))]
    Ambivalent(Vec<&'static str>),

    #[error("Invalid probe options: {0}")]
    InvalidOptions(String),

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),
}

impl ProbeError {
    /// True for failures that mean "the bytes are not there" rather than
    /// "the device could not be read". Probes treat these as a mismatch.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Self::OutOfRange { .. } | Self::ShortRead { .. } | Self::InvalidRequest(_)
        )
    }

    pub(crate) fn from_open(err: io::Error, path: &std::path::Path) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.display().to_string()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.display().to_string()),
            _ => Self::Io(err),
        }
    }
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidOptions(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
