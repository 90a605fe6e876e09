//! Directory scanner (spec §4.4): regular mode and salvage mode.

use crate::byteio::{read_bytes, read_u16, read_u32, read_u64};
use crate::config::{Config, UnicodeMismatchPolicy};
use crate::diagnostics::DiagnosticChannel;
use crate::entry::Entry;
use crate::error::{ArchiveError, Result};
use crate::extra;
use crate::volume::VolumeReader;
use std::io::{Read, Seek, SeekFrom};

pub const SIG_LOCAL: u32 = 0x0403_4b50;
pub const SIG_CENTRAL: u32 = 0x0201_4b50;
pub const SIG_EOCD: u32 = 0x0605_4b50;
pub const SIG_ZIP64_EOCD: u32 = 0x0606_4b50;
pub const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;
pub const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4b50;
pub const SIG_SPAN_MARKER: u32 = 0x0303_4b50;

const EOCD_FIXED_SIZE: u64 = 22;
const ZIP64_LOCATOR_SIZE: u64 = 20;
const ZIP64_EOCD_FIXED_SIZE: u64 = 56;
const CENTRAL_FIXED_SIZE: u64 = 46;

/// Which scan strategy produced an entry table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Regular,
    Salvage,
}

/// The result of a directory scan: a possibly-partial entry table plus
/// whatever diagnostics and the SFX-prefix delta were collected along
/// the way.
#[derive(Debug)]
pub struct ScanResult {
    pub entries: Vec<Entry>,
    pub mode: ScanMode,
    /// Bytes of SFX stub preceding the first header, if computed.
    pub sfx_adjustment: i64,
}

struct Eocd {
    disk_number: u16,
    cd_start_disk: u16,
    entries_this_disk: u16,
    total_entries: u16,
    cd_size: u32,
    cd_offset: u32,
    comment_len: u16,
    eocd_pos: u64,
}

struct Zip64EocdRecord {
    #[allow(dead_code)]
    version_made_by: u16,
    #[allow(dead_code)]
    version_needed: u16,
    disk_number: u32,
    cd_start_disk: u32,
    #[allow(dead_code)]
    entries_this_disk: u64,
    total_entries: u64,
    cd_size: u64,
    cd_offset: u64,
}

fn eocd_looks_zip64(e: &Eocd) -> bool {
    e.disk_number == 0xFFFF
        || e.cd_start_disk == 0xFFFF
        || e.entries_this_disk == 0xFFFF
        || e.total_entries == 0xFFFF
        || e.cd_size == 0xFFFF_FFFF
        || e.cd_offset == 0xFFFF_FFFF
}

/// Finds the last occurrence of the EOCD signature within the final
/// 128 KiB of `r` (spec step 1: repeated signatures inside the comment
/// are handled by keeping the last one found).
fn find_eocd<R: Read + Seek>(r: &mut R) -> Result<u64> {
    let file_len = r.seek(SeekFrom::End(0))?;
    let window = 128 * 1024u64;
    let start = file_len.saturating_sub(window);
    r.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;

    let sig = SIG_EOCD.to_le_bytes();
    let mut last_found = None;
    let mut i = 0usize;
    while i + 4 <= buf.len() {
        if buf[i..i + 4] == sig {
            last_found = Some(start + i as u64);
        }
        i += 1;
    }
    last_found.ok_or_else(|| ArchiveError::FormatError("EOCD signature not found".into()))
}

fn read_eocd<R: Read + Seek>(r: &mut R, pos: u64) -> Result<Eocd> {
    r.seek(SeekFrom::Start(pos))?;
    let sig = read_u32(r)?;
    if sig != SIG_EOCD {
        return Err(ArchiveError::FormatError("expected EOCD signature".into()));
    }
    let disk_number = read_u16(r)?;
    let cd_start_disk = read_u16(r)?;
    let entries_this_disk = read_u16(r)?;
    let total_entries = read_u16(r)?;
    let cd_size = read_u32(r)?;
    let cd_offset = read_u32(r)?;
    let comment_len = read_u16(r)?;
    Ok(Eocd {
        disk_number,
        cd_start_disk,
        entries_this_disk,
        total_entries,
        cd_size,
        cd_offset,
        comment_len,
        eocd_pos: pos,
    })
}

fn read_zip64_eocd<R: Read + Seek>(r: &mut R, pos: u64) -> Result<Zip64EocdRecord> {
    r.seek(SeekFrom::Start(pos))?;
    let sig = read_u32(r)?;
    if sig != SIG_ZIP64_EOCD {
        return Err(ArchiveError::FormatError(
            "expected Zip64 EOCD record signature".into(),
        ));
    }
    let _size = read_u64(r)?;
    let version_made_by = read_u16(r)?;
    let version_needed = read_u16(r)?;
    let disk_number = read_u32(r)?;
    let cd_start_disk = read_u32(r)?;
    let entries_this_disk = read_u64(r)?;
    let total_entries = read_u64(r)?;
    let cd_size = read_u64(r)?;
    let cd_offset = read_u64(r)?;
    Ok(Zip64EocdRecord {
        version_made_by,
        version_needed,
        disk_number,
        cd_start_disk,
        entries_this_disk,
        total_entries,
        cd_size,
        cd_offset,
    })
}

/// Tries to read a Zip64 EOCD Locator 20 bytes before `eocd_pos`. On
/// success, returns the resolved Zip64 EOCD record and the disk it
/// lives on.
fn try_read_zip64_locator<R: Read + Seek>(
    r: &mut R,
    eocd_pos: u64,
) -> Result<Option<(u32, Zip64EocdRecord)>> {
    if eocd_pos < ZIP64_LOCATOR_SIZE {
        return Ok(None);
    }
    let locator_pos = eocd_pos - ZIP64_LOCATOR_SIZE;
    r.seek(SeekFrom::Start(locator_pos))?;
    let sig = read_u32(r)?;
    if sig != SIG_ZIP64_LOCATOR {
        return Ok(None);
    }
    let disk_with_record = read_u32(r)?;
    let record_offset = read_u64(r)?;
    let _total_disks = read_u32(r)?;

    r.seek(SeekFrom::Start(record_offset))?;
    let record = read_zip64_eocd(r, record_offset)?;
    Ok(Some((disk_with_record, record)))
}

/// Regular-mode central-directory scan against the last (highest-
/// numbered) volume, which is where the EOCD, the Zip64 EOCD
/// Record/Locator, and — in every archive this crate writes or expects
/// to read — the whole contiguous central directory live. Individual
/// entries' *local* headers may still live on earlier disks; resolving
/// those is the copier's job ([`crate::writer::copy_entry_split`]), not
/// this scan.
pub fn scan_regular<R: Read + Seek>(
    r: &mut R,
    config: &Config,
    diagnostics: &mut DiagnosticChannel,
) -> Result<ScanResult> {
    let eocd_pos = find_eocd(r)?;
    let eocd = read_eocd(r, eocd_pos)?;

    let mut total_entries = eocd.total_entries as u64;
    let mut cd_offset = eocd.cd_offset as u64;
    let mut cd_size = eocd.cd_size as u64;

    if eocd_looks_zip64(&eocd) {
        if let Some((_, rec)) = try_read_zip64_locator(r, eocd_pos)? {
            total_entries = rec.total_entries;
            cd_offset = rec.cd_offset;
            cd_size = rec.cd_size;
            let _ = (rec.disk_number, rec.cd_start_disk);
        } else {
            return Err(ArchiveError::FormatError(
                "EOCD indicated Zip64 but no locator was found".into(),
            ));
        }
    }

    let sfx_adjustment = if config.adjust_sfx_prefix {
        compute_sfx_adjustment(r, eocd_pos, cd_offset, cd_size, eocd_looks_zip64(&eocd))?
    } else {
        0
    };

    r.seek(SeekFrom::Start((cd_offset as i64 + sfx_adjustment) as u64))?;
    let mut entries = Vec::with_capacity(total_entries.min(1 << 20) as usize);
    loop {
        let mut probe = [0u8; 4];
        let n = read_partial(r, &mut probe)?;
        if n < 4 {
            break;
        }
        let sig = u32::from_le_bytes(probe);
        if sig != SIG_CENTRAL {
            r.seek(SeekFrom::Current(-(n as i64)))?;
            break;
        }
        let mut entry = parse_central_header(r)?;
        // Resolve the Zip64 override first so the sentinel check inside it
        // sees the as-parsed 32-bit value, then apply the SFX delta once to
        // whichever value (32-bit or Zip64) ends up in `local_offset` —
        // both are nominal offsets from the start of the zip data and need
        // the same correction.
        entry.adjust_from_central_zip64()?;
        entry.local_offset = ((entry.local_offset as i64) + sfx_adjustment) as u64;
        reconcile_entry_unicode(&mut entry, config, diagnostics);
        entries.push(entry);
    }

    let observed = entries.len() as u64;
    if observed != total_entries && (observed % (1 << 16)) != (total_entries % (1 << 16)) {
        diagnostics.warn(
            None,
            None,
            format!(
                "central directory entry count mismatch: header says {total_entries}, found {observed}"
            ),
        );
    }

    Ok(ScanResult {
        entries,
        mode: ScanMode::Regular,
        sfx_adjustment,
    })
}

fn read_partial<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Computes the SFX-prefix adjustment (spec step 4): the nominal CD
/// start is computed from the EOCD fields, then compared against where
/// the Zip64 EOCD record (or, lacking Zip64, nothing further) is
/// actually found, via a signature walk. The delta is what every
/// entry's `local_offset` must be corrected by.
fn compute_sfx_adjustment<R: Read + Seek>(
    r: &mut R,
    eocd_pos: u64,
    cd_offset: u64,
    cd_size: u64,
    is_zip64: bool,
) -> Result<i64> {
    let trailer_size = if is_zip64 {
        ZIP64_LOCATOR_SIZE + ZIP64_EOCD_FIXED_SIZE
    } else {
        0
    };
    let nominal_cd_start = eocd_pos.saturating_sub(cd_size + trailer_size);

    // The common case: the archive is internally consistent (CD, optional
    // Zip64 trailer, EOCD are physically contiguous), so `nominal_cd_start`
    // is the real, verified physical start of the central directory. The
    // recorded `cd_offset` is whatever the archive creator wrote assuming
    // no prefix; the gap between the two is exactly the SFX stub length
    // that must be added to every entry's `local_offset`.
    r.seek(SeekFrom::Start(nominal_cd_start))?;
    let mut probe = [0u8; 4];
    let n = read_partial(r, &mut probe)?;
    if n == 4 && u32::from_le_bytes(probe) == SIG_CENTRAL {
        return Ok(nominal_cd_start as i64 - cd_offset as i64);
    }

    // The CD isn't where the EOCD's own fixed-size trailer arithmetic
    // said it would be (e.g. a salvage-adjacent corruption, or trailing
    // bytes between the CD and its trailer). Fall back to a genuine
    // signature walk from the start of the file up to the EOCD, taking
    // the first central-header signature found as the real CD start.
    r.seek(SeekFrom::Start(0))?;
    let mut scanner = SignatureScanner::new();
    let mut pos = 0u64;
    let mut byte = [0u8; 1];
    while pos < eocd_pos {
        let n = read_partial(r, &mut byte)?;
        if n == 0 {
            break;
        }
        pos += 1;
        if let Some(sig) = scanner.feed(byte[0]) {
            if u32::from_le_bytes(sig) == SIG_CENTRAL {
                let actual_cd_start = pos - 4;
                return Ok(actual_cd_start as i64 - cd_offset as i64);
            }
        }
    }

    Err(ArchiveError::FormatError(
        "could not locate the central directory while computing the SFX-prefix adjustment".into(),
    ))
}

fn reconcile_entry_unicode(entry: &mut Entry, config: &Config, diagnostics: &mut DiagnosticChannel) {
    match entry.reconcile_unicode_path(config.unicode_policy) {
        Ok(Some(msg)) => diagnostics.warn(None, Some(entry.display_name()), msg),
        Ok(None) => {}
        Err(e) => {
            if matches!(config.unicode_policy, UnicodeMismatchPolicy::Error) {
                diagnostics.push(crate::diagnostics::Diagnostic {
                    severity: crate::diagnostics::Severity::Fatal,
                    entry_index: None,
                    entry_name: Some(entry.display_name()),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Parses the 46-byte fixed central header portion plus its variable
/// name/extras/comment fields, starting right after the signature has
/// already been consumed by the caller... actually the caller leaves
/// the cursor right after reading the 4-byte signature probe, so this
/// reads the remaining 42 fixed bytes.
fn parse_central_header<R: Read + Seek>(r: &mut R) -> Result<Entry> {
    let version_made_by = read_u16(r)?;
    let version_needed = read_u16(r)?;
    let flags_raw = read_u16(r)?;
    let method = read_u16(r)?;
    let mod_time = read_u16(r)?;
    let mod_date = read_u16(r)?;
    let crc32 = read_u32(r)?;
    let compressed_size = read_u32(r)? as u64;
    let uncompressed_size = read_u32(r)? as u64;
    let name_len = read_u16(r)? as usize;
    let extra_len = read_u16(r)? as usize;
    let comment_len = read_u16(r)? as usize;
    let disk_start = read_u16(r)? as u32;
    let internal_attr = read_u16(r)?;
    let external_attr = read_u32(r)?;
    let local_offset = read_u32(r)? as u64;

    let stored_name = read_bytes(r, name_len)?;
    let central_extras = read_bytes(r, extra_len)?;
    let comment = read_bytes(r, comment_len)?;

    let (flags_central, advisory) = Entry::mask_flags(flags_raw);
    if advisory {
        log::debug!("entry {:?}: advisory flag bits ignored", String::from_utf8_lossy(&stored_name));
    }

    let utf8_name = if flags_central & crate::entry::FLAG_UTF8 != 0 {
        Some(stored_name.clone())
    } else {
        None
    };

    Ok(Entry {
        version_made_by,
        version_needed,
        flags_central,
        flags_local: flags_central,
        method,
        dos_time: ((mod_date as u32) << 16) | mod_time as u32,
        crc32,
        compressed_size,
        uncompressed_size,
        local_offset,
        disk_start,
        internal_attr,
        external_attr,
        stored_name,
        utf8_name,
        comment,
        local_extras: Vec::new(),
        central_extras,
        selection_mark: crate::entry::SelectionMark::Keep,
        readable: true,
    })
}

// --- Salvage mode -----------------------------------------------------

/// The explicit 3-state signature matcher the REDESIGN FLAGS section
/// asks for, replacing the original's nested `getc`/`ungetc` loops. Call
/// [`SignatureScanner::feed`] one byte at a time; it returns the
/// complete 4-byte signature once one is recognized.
#[derive(Debug, Default)]
pub struct SignatureScanner {
    state: SigState,
    bytes: [u8; 4],
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum SigState {
    #[default]
    LookForP,
    LookForK,
    ConsumeRest(u8),
}

impl SignatureScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte; returns `Some(signature_bytes)` once a full
    /// `P K b c` with `b, c < 16` has been matched (the second `P` in
    /// `P P K b c` restarts the match at the new `P`, matching the
    /// original's "not a signature but maybe start of new one" case).
    pub fn feed(&mut self, byte: u8) -> Option<[u8; 4]> {
        loop {
            match self.state {
                SigState::LookForP => {
                    if byte == 0x50 {
                        self.bytes[0] = byte;
                        self.state = SigState::LookForK;
                    }
                    return None;
                }
                SigState::LookForK => {
                    if byte == 0x4b {
                        self.bytes[1] = byte;
                        self.state = SigState::ConsumeRest(2);
                        return None;
                    }
                    self.state = SigState::LookForP;
                    if byte == 0x50 {
                        continue;
                    }
                    return None;
                }
                SigState::ConsumeRest(filled) => {
                    if byte == 0x50 {
                        self.state = SigState::LookForK;
                        self.bytes[0] = byte;
                        return None;
                    }
                    if byte >= 16 {
                        self.state = SigState::LookForP;
                        continue;
                    }
                    self.bytes[filled as usize] = byte;
                    if filled == 3 {
                        let sig = self.bytes;
                        self.state = SigState::LookForP;
                        return Some(sig);
                    }
                    self.state = SigState::ConsumeRest(filled + 1);
                    return None;
                }
            }
        }
    }
}

/// Salvage-mode scan: walks every byte of `r` looking for known
/// signatures, building partial entries from local headers and merging
/// in central-only fields when a matching central header is found by
/// name.
pub fn scan_salvage<R: Read + Seek>(
    r: &mut R,
    config: &Config,
    diagnostics: &mut DiagnosticChannel,
) -> Result<ScanResult> {
    r.seek(SeekFrom::Start(0))?;
    let mut entries: Vec<Entry> = Vec::new();
    let mut scanner = SignatureScanner::new();
    let mut byte_buf = [0u8; 1];

    loop {
        let n = read_partial(r, &mut byte_buf)?;
        if n == 0 {
            break;
        }
        let Some(sig_bytes) = scanner.feed(byte_buf[0]) else {
            continue;
        };
        let sig = u32::from_le_bytes(sig_bytes);
        let here = r.stream_position()?; // just after the 4 signature bytes

        match sig {
            SIG_LOCAL => {
                r.seek(SeekFrom::Start(here - 4))?;
                match parse_local_header_salvage(r) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => diagnostics.warn(None, None, format!("malformed local header: {e}")),
                }
            }
            SIG_CENTRAL => {
                r.seek(SeekFrom::Start(here - 4))?;
                match parse_central_header(r) {
                    Ok(mut central) => {
                        if let Err(e) = central.adjust_from_central_zip64() {
                            diagnostics.warn(None, None, format!("malformed Zip64 field: {e}"));
                        }
                        reconcile_entry_unicode(&mut central, config, diagnostics);
                        if let Some(existing) =
                            entries.iter_mut().find(|e| e.stored_name == central.stored_name)
                        {
                            merge_central_into_local(existing, central);
                        } else {
                            entries.push(central);
                        }
                    }
                    Err(e) => diagnostics.warn(None, None, format!("malformed central header: {e}")),
                }
            }
            _ => {
                // EOCD / Zip64 EOCD / Zip64 locator / span markers / data
                // descriptor: salvage mode doesn't need their contents (the
                // entry table is rebuilt purely from headers found by
                // signature), only to not get stuck re-matching inside them.
            }
        }
        r.seek(SeekFrom::Start(here))?;
    }

    Ok(ScanResult {
        entries,
        mode: ScanMode::Salvage,
        sfx_adjustment: 0,
    })
}

fn merge_central_into_local(local: &mut Entry, central: Entry) {
    local.version_made_by = central.version_made_by;
    local.comment = central.comment;
    local.external_attr = central.external_attr;
    local.internal_attr = central.internal_attr;
    local.central_extras = central.central_extras;
    local.disk_start = central.disk_start;
    local.utf8_name = central.utf8_name.or(local.utf8_name.take());
    if central.uncompressed_size > 0 {
        local.uncompressed_size = central.uncompressed_size;
    }
    if central.compressed_size > 0 {
        local.compressed_size = central.compressed_size;
    }
}

/// Parses just enough of a local header to build a partial `Entry`
/// (salvage mode never trusts a data descriptor that might follow, so
/// the sizes here may be placeholders/zero when bit 3 is set).
fn parse_local_header_salvage<R: Read + Seek>(r: &mut R) -> Result<Entry> {
    let sig = read_u32(r)?;
    if sig != SIG_LOCAL {
        return Err(ArchiveError::FormatError("expected local header signature".into()));
    }
    let local_offset = r.stream_position()? - 4;
    let version_needed = read_u16(r)?;
    let flags_raw = read_u16(r)?;
    let method = read_u16(r)?;
    let mod_time = read_u16(r)?;
    let mod_date = read_u16(r)?;
    let crc32 = read_u32(r)?;
    let compressed_size = read_u32(r)? as u64;
    let uncompressed_size = read_u32(r)? as u64;
    let name_len = read_u16(r)? as usize;
    let extra_len = read_u16(r)? as usize;

    let stored_name = read_bytes(r, name_len)?;
    let local_extras = read_bytes(r, extra_len)?;

    let (flags_local, _advisory) = Entry::mask_flags(flags_raw);
    let utf8_name = if flags_local & crate::entry::FLAG_UTF8 != 0 {
        Some(stored_name.clone())
    } else {
        None
    };

    let mut entry = Entry {
        version_made_by: 0,
        version_needed,
        flags_central: flags_local,
        flags_local,
        method,
        dos_time: ((mod_date as u32) << 16) | mod_time as u32,
        crc32,
        compressed_size,
        uncompressed_size,
        local_offset,
        disk_start: 0,
        internal_attr: 0,
        external_attr: 0,
        stored_name,
        utf8_name,
        comment: Vec::new(),
        local_extras,
        central_extras: Vec::new(),
        selection_mark: crate::entry::SelectionMark::Keep,
        readable: true,
    };
    if extra::find(extra::TAG_ZIP64, &entry.local_extras).is_some() {
        // `adjust_from_central_zip64` reads `central_extras`; the local
        // header carries its own Zip64 record under the same tag, so swap
        // it in for the call and back out again.
        let saved_central = std::mem::replace(&mut entry.central_extras, entry.local_extras.clone());
        let _ = entry.adjust_from_central_zip64();
        entry.central_extras = saved_central;
    }
    Ok(entry)
}
