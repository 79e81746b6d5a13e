//! Error taxonomy for the NTFS access engine.

use thiserror::Error;

/// Errors produced while navigating an NTFS volume.
///
/// Variant names describe the kind of failure rather than naming any
/// particular on-disk structure; callers match on the kind of failure,
/// not on which component raised it.
#[derive(Debug, Error)]
pub enum NtfsError {
    #[error("invalid signature at offset {offset}: expected {expected:?}, found {found:?}")]
    InvalidSignature {
        offset: u64,
        expected: &'static [u8],
        found: Vec<u8>,
    },

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("torn write detected in multi-sector record at offset {offset}, sector {sector_index}")]
    TornWrite { offset: u64, sector_index: usize },

    #[error("requested {what} is out of bounds: {detail}")]
    OutOfBounds { what: &'static str, detail: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("stale file reference: expected sequence {expected}, found {found}")]
    StaleReference { expected: u16, found: u16 },

    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not found: {0}")]
    NotFound(String),
}

impl NtfsError {
    pub(crate) fn invalid_record(msg: impl Into<String>) -> Self {
        NtfsError::InvalidRecord(msg.into())
    }

    pub(crate) fn out_of_bounds(what: &'static str, detail: impl Into<String>) -> Self {
        NtfsError::OutOfBounds {
            what,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, NtfsError>;
