//! Error types for the archive directory engine.

use std::io;
use thiserror::Error;

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error kinds produced by the scanner, entry record, and writer/copier.
///
/// Variant names are the error *kind* from spec §7, not a description of
/// where in the code it was raised.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A structural invariant of the on-disk format was violated: bad
    /// signature, inconsistent size fields, a missing Zip64 record where
    /// one was required. Fatal in regular scan mode, demoted to a
    /// per-entry diagnostic in salvage mode.
    #[error("format error: {0}")]
    FormatError(String),

    /// An underlying read returned fewer bytes than the field requires.
    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortData { expected: usize, actual: usize },

    /// An entry needs Zip64 but `force_zip64 = never`.
    #[error("entry {0:?} requires Zip64 but force_zip64 is set to never")]
    EntryTooBig(String),

    /// A Unicode-Path extra field's embedded CRC did not match the
    /// stored name's CRC-32.
    #[error("unicode path CRC mismatch for entry {0:?}")]
    UnicodeMismatch(String),

    /// A required volume could not be opened after `missing_volume`
    /// returned `Abort`.
    #[error("volume {0} is missing")]
    VolumeMissing(u32),

    /// A declared length was implausible given the remaining source
    /// size; the practical stand-in for an allocation-failure guard,
    /// since Rust's global allocator aborts rather than returning an
    /// error we could otherwise catch.
    #[error("out of memory: refused to allocate {0} bytes")]
    OutOfMemory(usize),

    /// Generic underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ArchiveError {
    /// True for errors that scanner salvage mode may downgrade to a
    /// per-entry diagnostic instead of aborting the whole scan.
    pub fn is_recoverable_in_salvage(&self) -> bool {
        matches!(
            self,
            ArchiveError::FormatError(_) | ArchiveError::ShortData { .. }
        )
    }
}
