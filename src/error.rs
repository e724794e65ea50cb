//! Error taxonomy shared by every layer of the engine.

use std::path::PathBuf;

/// Every fallible operation in this crate returns one of these. Nothing here
/// is exceptional in the panic sense; callers are expected to match on it.
#[derive(Debug, thiserror::Error)]
pub enum FsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sector {sector} out of range (device has {total} sectors)")]
    OutOfRange { sector: u64, total: u64 },

    #[error("not a FAT12 volume: {reason}")]
    NotFat12 { reason: &'static str },

    #[error("no free cluster available")]
    NoSpace,

    #[error("'{name}' not found")]
    NotFound { name: String },

    #[error("invalid argument: {reason}")]
    InvalidArg { reason: String },

    /// Raised when on-disk corruption is detected, so it is reported rather
    /// than looped over or panicked on.
    #[error("filesystem inconsistency: {reason}")]
    Inconsistent { reason: String },

    #[error("incompatible GRUB stage1/stage2: {reason}")]
    GrubIncompatible { reason: &'static str },

    #[error("could not read GRUB file {path}: {source}")]
    GrubMissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FsError>;
