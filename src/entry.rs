//! The in-memory entry record (spec §4.3) and Zip64 promotion policy.

use crate::config::{Config, ForceZip64};
use crate::error::{ArchiveError, Result};
use crate::extra::{self, PositionPolicy, TAG_PLACEHOLDER, TAG_UNICODE_PATH, TAG_ZIP64, Zip64Fields};

pub const SENTINEL_32: u32 = 0xFFFF_FFFF;
pub const SENTINEL_16: u16 = 0xFFFF;

/// General-purpose flag bits this crate cares about. The authoritative
/// mask is `0x001F | UTF8_BIT`; any other high bit is an advisory
/// warning, never fatal (spec §9).
pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_UTF8: u16 = 0x0800;
pub const FLAG_AUTHORITATIVE_MASK: u16 = 0x001F | FLAG_UTF8;

/// What the writer intends to do with an entry on the next write pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMark {
    #[default]
    Unseen,
    Keep,
    Replace,
    Delete,
    Copy,
}

/// One logical archive member: a file or directory.
#[derive(Debug, Clone)]
pub struct Entry {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags_central: u16,
    pub flags_local: u16,
    pub method: u16,
    pub dos_time: u32,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub local_offset: u64,
    pub disk_start: u32,
    pub internal_attr: u16,
    pub external_attr: u32,

    pub stored_name: Vec<u8>,
    pub utf8_name: Option<Vec<u8>>,
    pub comment: Vec<u8>,

    pub local_extras: Vec<u8>,
    pub central_extras: Vec<u8>,

    pub selection_mark: SelectionMark,

    /// False when salvage mode could only partially populate this entry
    /// (e.g. no central header was ever found for it).
    pub readable: bool,
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            version_made_by: 20,
            version_needed: 20,
            flags_central: 0,
            flags_local: 0,
            method: 0,
            dos_time: 0,
            crc32: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            local_offset: 0,
            disk_start: 0,
            internal_attr: 0,
            external_attr: 0,
            stored_name: Vec::new(),
            utf8_name: None,
            comment: Vec::new(),
            local_extras: Vec::new(),
            central_extras: Vec::new(),
            selection_mark: SelectionMark::Unseen,
            readable: true,
        }
    }
}

impl Entry {
    pub fn new(stored_name: Vec<u8>, method: u16) -> Self {
        Self {
            stored_name,
            method,
            ..Default::default()
        }
    }

    /// High byte of `version_made_by`: the host OS code.
    pub fn made_by_os(&self) -> u8 {
        (self.version_made_by >> 8) as u8
    }

    /// Low byte of `version_made_by`: spec version x10.
    pub fn made_by_spec(&self) -> u8 {
        (self.version_made_by & 0xFF) as u8
    }

    /// The display name: the UTF-8 name if known, else the stored name
    /// lossily decoded. Never serialized.
    pub fn display_name(&self) -> String {
        match &self.utf8_name {
            Some(u) => String::from_utf8_lossy(u).into_owned(),
            None => String::from_utf8_lossy(&self.stored_name).into_owned(),
        }
    }

    fn is_sentinel_compressed(&self) -> bool {
        self.compressed_size >= SENTINEL_32 as u64
    }
    fn is_sentinel_uncompressed(&self) -> bool {
        self.uncompressed_size >= SENTINEL_32 as u64
    }
    fn is_sentinel_offset(&self) -> bool {
        self.local_offset >= SENTINEL_32 as u64
    }
    fn is_sentinel_disk(&self) -> bool {
        self.disk_start >= SENTINEL_16 as u32
    }

    /// Whether this entry, as it currently stands, needs a Zip64 record
    /// (any primary field exceeds its classic width).
    pub fn needs_zip64(&self) -> bool {
        self.uncompressed_size > u32::MAX as u64
            || self.compressed_size > u32::MAX as u64
            || self.local_offset > u32::MAX as u64
            || self.disk_start > u16::MAX as u32
    }

    /// Masks the general-purpose flags to the authoritative bits,
    /// returning `(masked, had_advisory_bits)`.
    pub fn mask_flags(flags: u16) -> (u16, bool) {
        let masked = flags & FLAG_AUTHORITATIVE_MASK;
        (masked, flags & !FLAG_AUTHORITATIVE_MASK != 0)
    }

    /// Consumes Zip64 overrides from `central_extras` into the primary
    /// slots wherever a primary slot holds the sentinel (the "adjust"
    /// step, spec §4.3). Call once after building an `Entry` from a
    /// parsed central header.
    pub fn adjust_from_central_zip64(&mut self) -> Result<()> {
        if let Some(rec) = extra::find(TAG_ZIP64, &self.central_extras) {
            let fields = Zip64Fields::parse(
                rec.data,
                self.is_sentinel_uncompressed(),
                self.is_sentinel_compressed(),
                self.is_sentinel_offset(),
                self.is_sentinel_disk(),
            )?;
            if let Some(v) = fields.uncompressed_size {
                self.uncompressed_size = v;
            }
            if let Some(v) = fields.compressed_size {
                self.compressed_size = v;
            }
            if let Some(v) = fields.local_offset {
                self.local_offset = v;
            }
            if let Some(v) = fields.disk_start {
                self.disk_start = v;
            }
        }
        Ok(())
    }

    /// Reconciles the Unicode-Path extra field against `stored_name`,
    /// per `policy`. Returns `Ok(())` even on a mismatch unless the
    /// policy is `Error`.
    pub fn reconcile_unicode_path(
        &mut self,
        policy: crate::config::UnicodeMismatchPolicy,
    ) -> Result<Option<&'static str>> {
        use crate::config::UnicodeMismatchPolicy as P;
        if matches!(policy, P::Disable) {
            self.utf8_name = None;
            return Ok(None);
        }
        let Some(rec) = extra::find(TAG_UNICODE_PATH, &self.central_extras) else {
            return Ok(None);
        };
        let field = extra::UnicodePathField::parse(rec.data)?;
        let actual_crc = crc32fast::hash(&self.stored_name);
        if actual_crc == field.name_crc32 {
            self.utf8_name = Some(field.utf8_name);
            return Ok(None);
        }
        match policy {
            P::Error => Err(ArchiveError::UnicodeMismatch(self.display_name())),
            P::Warn => {
                self.utf8_name = None;
                Ok(Some("unicode path CRC mismatch; ignoring stale Unicode name"))
            }
            P::Silent => {
                self.utf8_name = None;
                Ok(None)
            }
            P::Disable => unreachable!(),
        }
    }

    /// Rewrites `stored_name` with a Unicode-Path fallback extra field
    /// whenever `utf8_name` cannot be represented as the stored bytes
    /// directly (the general "emit via extra-field fallback" path).
    pub fn set_unicode_fallback(&mut self, utf8_name: Vec<u8>) {
        let crc = crc32fast::hash(&self.stored_name);
        let field = extra::UnicodePathField::new(crc, utf8_name.clone());
        extra::insert_or_replace(
            TAG_UNICODE_PATH,
            &field.to_payload(),
            &mut self.local_extras,
            PositionPolicy::Back,
        );
        extra::insert_or_replace(
            TAG_UNICODE_PATH,
            &field.to_payload(),
            &mut self.central_extras,
            PositionPolicy::Back,
        );
        self.utf8_name = Some(utf8_name);
    }

    /// Zip64 promotion policy (spec §4.3). Called once, on first
    /// emission of the local header. `streaming` is true when the
    /// entry's final size is not known yet (unseekable sink). Mutates
    /// `local_extras` to carry either a real Zip64 record or a
    /// Placeholder of identical size, and bumps `version_needed` when a
    /// Zip64 record is (or may become) necessary.
    pub fn plan_zip64_for_local_header(
        &mut self,
        config: &Config,
        streaming: bool,
        sink_is_seekable: bool,
    ) -> Result<bool> {
        let forced_by_config = matches!(config.force_zip64, ForceZip64::Always);
        let threshold = config.zip64_threshold(self.method);
        let exceeds_known_size = !streaming && self.uncompressed_size >= threshold;
        let must_reserve = forced_by_config
            || streaming
            || exceeds_known_size
            || (!sink_is_seekable && !matches!(config.force_zip64, ForceZip64::Never));

        if matches!(config.force_zip64, ForceZip64::Never) {
            if streaming || exceeds_known_size || !sink_is_seekable {
                return Err(ArchiveError::EntryTooBig(self.display_name()));
            }
            return Ok(false);
        }

        if must_reserve {
            extra::insert_placeholder(&mut self.local_extras);
            self.version_needed = self.version_needed.max(45);
            if !sink_is_seekable {
                // Cannot come back and rewrite; commit to Zip64 now.
                self.promote_placeholder_to_real(true)?;
                return Ok(true);
            }
        }
        Ok(must_reserve)
    }

    /// After payload emission: if the entry truly exceeded 2^32-1 in
    /// either size (or `force`), replace the Placeholder with a real
    /// Zip64 record of identical byte length. Otherwise the Placeholder
    /// remains untouched — a valid no-op extra field other consumers
    /// must ignore.
    pub fn promote_placeholder_to_real(&mut self, force: bool) -> Result<bool> {
        let has_placeholder = extra::find(TAG_PLACEHOLDER, &self.local_extras).is_some();
        if !has_placeholder {
            return Ok(self.needs_zip64());
        }
        let needs_real = force || self.needs_zip64();
        if !needs_real {
            return Ok(false);
        }
        let fields = Zip64Fields {
            uncompressed_size: Some(self.uncompressed_size),
            compressed_size: Some(self.compressed_size),
            local_offset: None,
            disk_start: None,
        };
        let payload = fields.to_payload();
        debug_assert_eq!(payload.len(), 16, "placeholder size must match real record size");
        extra::remove(TAG_PLACEHOLDER, &mut self.local_extras);
        extra::insert_or_replace(TAG_ZIP64, &payload, &mut self.local_extras, PositionPolicy::Front);
        self.version_needed = self.version_needed.max(45);
        Ok(true)
    }

    /// Builds the Zip64 *central* extra field payload: the fields whose
    /// primary slot is currently a sentinel, in the fixed order, plus
    /// (when `force` is set) the two size fields regardless of
    /// magnitude — a committed local Zip64 record forces a matching
    /// central one even on an entry that stayed small (scenario:
    /// `force_zip64=always`). `local_offset`/`disk_start` are never
    /// forced this way since nothing else about the entry pins them.
    pub fn build_central_zip64_fields(&self, force: bool) -> Zip64Fields {
        Zip64Fields {
            uncompressed_size: (force || self.is_sentinel_uncompressed()).then_some(self.uncompressed_size),
            compressed_size: (force || self.is_sentinel_compressed()).then_some(self.compressed_size),
            local_offset: self.is_sentinel_offset().then_some(self.local_offset),
            disk_start: self.is_sentinel_disk().then_some(self.disk_start as u32),
        }
    }

    /// Applies the Zip64 central extra field to `central_extras`
    /// (front-inserted, replacing any record already there), returning
    /// whether a record was needed at all. A real (non-Placeholder)
    /// Zip64 record already committed to `local_extras` forces a
    /// matching central record even if this entry's sizes never grew
    /// past the classic limits.
    pub fn finalize_central_zip64(&mut self) -> bool {
        let force = extra::find(TAG_ZIP64, &self.local_extras).is_some();
        let fields = self.build_central_zip64_fields(force);
        if fields.is_empty() {
            extra::remove(TAG_ZIP64, &mut self.central_extras);
            return false;
        }
        let payload = fields.to_payload();
        extra::insert_or_replace(TAG_ZIP64, &payload, &mut self.central_extras, PositionPolicy::Front);
        self.version_needed = self.version_needed.max(45);
        true
    }
}
