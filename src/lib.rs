//! # zip-archive-core: a PKZIP directory engine
//!
//! `zip-archive-core` scans and rewrites the central-directory structure
//! of PKZIP-format archives — local headers, the central directory,
//! Zip64 overrides, split-volume trailers, and the handful of
//! widely-deployed extra-field records that carry Unicode names and
//! Unix metadata. It does not compress, decompress, encrypt, or decrypt
//! anything: those are the concern of a codec the caller supplies, this
//! crate only knows where a method id, a compressed size, and a header
//! belong.
//!
//! ## Quick start
//!
//! ### Scanning an existing archive
//!
//! ```no_run
//! use std::fs::File;
//! use zip_archive_core::{ArchiveContext, Config};
//!
//! let mut f = File::open("archive.zip")?;
//! let ctx = ArchiveContext::scan(&mut f, Config::new())?;
//! for entry in ctx.entries() {
//!     println!("{}: {} bytes", entry.display_name(), entry.uncompressed_size);
//! }
//! # Ok::<(), zip_archive_core::ArchiveError>(())
//! ```
//!
//! ### Building a new archive
//!
//! ```no_run
//! use zip_archive_core::{ArchiveContext, Config, Entry};
//! use zip_archive_core::volume::FsVolumeWriter;
//!
//! let mut ctx = ArchiveContext::new(Config::new());
//! ctx.add_entry(Entry::new(b"hello.txt".to_vec(), 0));
//!
//! let volume = FsVolumeWriter::new("output.zip", None);
//! ctx.write::<std::fs::File, _>(None, volume, |_entry| Some(b"Hello, World!".to_vec()))?;
//! # Ok::<(), zip_archive_core::ArchiveError>(())
//! ```

pub mod archive;
pub mod byteio;
pub mod config;
pub mod diagnostics;
pub mod entry;
pub mod error;
pub mod extra;
pub mod index;
pub mod scanner;
pub mod volume;
pub mod writer;

pub use archive::ArchiveContext;
pub use config::{CaseFold, Config, ForceZip64, PathPrefixMode, TranslateEol, UnicodeMismatchPolicy};
pub use diagnostics::{Diagnostic, DiagnosticChannel, Severity};
pub use entry::{Entry, SelectionMark};
pub use error::{ArchiveError, Result};
pub use scanner::ScanMode;
