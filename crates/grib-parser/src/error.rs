//! Error types for GRIB scanning and decoding.

use thiserror::Error;

/// Errors raised while scanning or decoding GRIB records.
#[derive(Error, Debug)]
pub enum GribError {
    /// The byte stream is not a GRIB message where one was expected.
    #[error("invalid GRIB format: {0}")]
    InvalidFormat(String),

    /// A section could not be parsed.
    #[error("invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    /// The stream ended in the middle of a record.
    #[error("truncated record at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// The declared message length does not land on an end marker.
    #[error("bad message length at offset {offset}: declared {declared} bytes")]
    BadLength { offset: u64, declared: u64 },

    #[error("unsupported GRIB edition {0}")]
    UnsupportedEdition(u8),

    /// A template or code value this decoder does not handle.
    #[error("unsupported {what} {value}")]
    UnsupportedTemplate { what: &'static str, value: u32 },

    #[error("failed to unpack data: {0}")]
    UnpackingError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GribError {
    /// Create an InvalidSection error.
    pub fn section(section: u8, reason: impl Into<String>) -> Self {
        Self::InvalidSection {
            section,
            reason: reason.into(),
        }
    }

    /// Create an UnpackingError.
    pub fn unpacking(msg: impl Into<String>) -> Self {
        Self::UnpackingError(msg.into())
    }

    /// True when the error describes a malformed or truncated record rather
    /// than an unsupported feature or an I/O failure.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidFormat(_)
                | Self::InvalidSection { .. }
                | Self::Truncated { .. }
                | Self::BadLength { .. }
        )
    }
}

/// Result type for GRIB operations.
pub type Result<T> = std::result::Result<T, GribError>;
