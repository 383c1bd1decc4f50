//! Error types for patch fitting.
//!
//! All fitting errors are fatal for the binary being processed: the pipeline
//! drops that binary from the output and moves on to the next one.

use thiserror::Error;

use crate::image::Protection;

/// Errors raised while fitting a patch set against a concrete image.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid protection {prot:#05b} in patch set '{name}'")]
    InvalidProtection { name: String, prot: u32 },

    #[error("image has no {prot} segment")]
    SegmentNotFound { prot: Protection },

    #[error("offset {offset:#x} is past the end of the {prot} segment (file size {file_size:#x})")]
    OffsetOutOfRange {
        prot: Protection,
        offset: u64,
        file_size: u64,
    },

    #[error("segment file size {file_size:#x} is smaller than match length {match_len}")]
    SegmentTooSmall { file_size: u64, match_len: u64 },

    #[error("cannot read image '{name}': {reason}")]
    ImageUnreadable { name: String, reason: String },
}

/// A specialized Result type for fitting operations.
pub type Result<T> = std::result::Result<T, Error>;
