//! The closed configuration surface (spec §6).

/// Whether to use Zip64 fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceZip64 {
    /// Promote only when an entry's sizes or offset actually need it, or
    /// when streaming with unknown size.
    Auto,
    /// Always write Zip64 records for every entry.
    Always,
    /// Never write Zip64; an entry that would need it is a hard error
    /// (`ArchiveError::EntryTooBig`).
    Never,
}

/// End-of-line translation mode; halves the Zip64 promotion threshold
/// because translating line endings can grow a stream by up to 2x in the
/// worst case (every byte becomes two).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateEol {
    Off,
    On,
}

/// Behavior when a Unicode-Path extra field's CRC does not match its
/// entry's stored name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicodeMismatchPolicy {
    /// Treat the mismatch as a fatal `ArchiveError::UnicodeMismatch`.
    Error,
    /// Keep scanning, but push a diagnostic and drop the UTF-8 name.
    Warn,
    /// Keep scanning, drop the UTF-8 name, no diagnostic.
    Silent,
    /// Disable Unicode-Path handling for the whole scan.
    Disable,
}

/// Where a configured `path_prefix` applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathPrefixMode {
    /// Apply to every entry, including ones loaded from an existing
    /// archive.
    All,
    /// Apply only to entries the caller adds as new.
    NewOnly,
}

/// Case-folding applied to newly added entry names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseFold {
    None,
    Upper,
    Lower,
}

/// The full, closed configuration surface for a scan/write session.
#[derive(Debug, Clone)]
pub struct Config {
    pub force_zip64: ForceZip64,
    pub translate_eol: TranslateEol,
    pub unicode_policy: UnicodeMismatchPolicy,
    pub path_prefix: Option<Vec<u8>>,
    pub path_prefix_mode: PathPrefixMode,
    pub case_fold: CaseFold,
    pub include_stream_ef: bool,
    pub adjust_sfx_prefix: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            force_zip64: ForceZip64::Auto,
            translate_eol: TranslateEol::Off,
            unicode_policy: UnicodeMismatchPolicy::Warn,
            path_prefix: None,
            path_prefix_mode: PathPrefixMode::NewOnly,
            case_fold: CaseFold::None,
            include_stream_ef: false,
            adjust_sfx_prefix: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_force_zip64(mut self, v: ForceZip64) -> Self {
        self.force_zip64 = v;
        self
    }

    pub fn with_translate_eol(mut self, v: TranslateEol) -> Self {
        self.translate_eol = v;
        self
    }

    pub fn with_unicode_policy(mut self, v: UnicodeMismatchPolicy) -> Self {
        self.unicode_policy = v;
        self
    }

    pub fn with_path_prefix(mut self, prefix: impl Into<Vec<u8>>, mode: PathPrefixMode) -> Self {
        self.path_prefix = Some(prefix.into());
        self.path_prefix_mode = mode;
        self
    }

    pub fn with_case_fold(mut self, v: CaseFold) -> Self {
        self.case_fold = v;
        self
    }

    pub fn with_stream_ef(mut self, on: bool) -> Self {
        self.include_stream_ef = on;
        self
    }

    pub fn with_adjust_sfx_prefix(mut self, on: bool) -> Self {
        self.adjust_sfx_prefix = on;
        self
    }

    /// Zip64 promotion threshold per spec §4.3: `(translate_eol ? 2GiB :
    /// 4GiB) - margin(method)`.
    pub fn zip64_threshold(&self, method: u16) -> u64 {
        let base: u64 = match self.translate_eol {
            TranslateEol::On => 2 * 1024 * 1024 * 1024,
            TranslateEol::Off => 4 * 1024 * 1024 * 1024,
        };
        base.saturating_sub(codec_margin(method))
    }
}

/// Worst-case expansion margin for a compression method, as documented
/// by the (external) codec collaborator. Store is near-zero; the others
/// are small method-dependent constants. These numbers are deliberately
/// conservative overestimates of each codec's stored-block / block-
/// header overhead, not a precise accounting of any one codec
/// implementation, since the actual codec lives outside this crate.
pub fn codec_margin(method: u16) -> u64 {
    match method {
        0 => 0,                 // store
        8 => 11 * 1024,         // deflate: ~11 bytes per 32KiB stored block
        12 => 4 * 1024,         // bzip2: block-level framing overhead
        14 => 2 * 1024,         // lzma: header + end marker
        98 => 4 * 1024,         // ppmd
        99 => 16 + 10,          // AES wrapper: salt + password-verify + auth code
        _ => 16 * 1024,         // unknown method: conservative default
    }
}
