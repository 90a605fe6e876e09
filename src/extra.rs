//! Extra-field registry (spec §4.2).
//!
//! An extra-field block is a concatenation of records
//! `{tag:2, data_size:2, data:data_size}`. This module is a pure-function
//! registry over `&[u8]`/`Vec<u8>` — it never owns the block; the
//! `Entry` does (per the spec's "stringly-typed extra fields" redesign
//! note: model as `{bytes, len}` plus pure functions, the entry owns the
//! block).

use crate::byteio::{slice_u16, slice_u32, slice_u64};
use crate::error::{ArchiveError, Result};

pub const TAG_ZIP64: u16 = 0x0001;
pub const TAG_EXTENDED_TIMESTAMP: u16 = 0x5455;
pub const TAG_UNIX_LEGACY: u16 = 0x5855;
pub const TAG_UNIX_UID_GID: u16 = 0x7855;
pub const TAG_UNICODE_PATH: u16 = 0x7075;
pub const TAG_AES_WG: u16 = 0x9901;
pub const TAG_STREAM_INFO: u16 = 0x6C78;
pub const TAG_PLACEHOLDER: u16 = 0x9999;

const RECORD_HEADER_SIZE: usize = 4;

/// Where a newly inserted record goes relative to existing ones.
/// Zip64 requires `Front` (a documented consumer bug expects it to be
/// the first record); everything else uses `Back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionPolicy {
    Front,
    Back,
}

/// A borrowed view of one `{tag, data}` record and the byte range in the
/// owning block it occupies (for in-place overwrite / splice).
#[derive(Debug, Clone, Copy)]
pub struct RecordRef<'a> {
    pub tag: u16,
    pub data: &'a [u8],
    pub record_start: usize,
    pub record_end: usize,
}

/// Linear scan for the first record matching `tag`. Stops safely once
/// fewer than 4 bytes remain; malformed trailing bytes are ignored
/// rather than erroring, matching spec §4.2.
pub fn find(tag: u16, block: &[u8]) -> Option<RecordRef<'_>> {
    let mut i = 0usize;
    while i + RECORD_HEADER_SIZE <= block.len() {
        let this_tag = slice_u16(block, i).ok()?;
        let data_size = slice_u16(block, i + 2).ok()? as usize;
        let data_start = i + RECORD_HEADER_SIZE;
        let data_end = data_start.checked_add(data_size)?;
        if data_end > block.len() {
            // Truncated trailing record: stop scanning, nothing more to find.
            return None;
        }
        if this_tag == tag {
            return Some(RecordRef {
                tag: this_tag,
                data: &block[data_start..data_end],
                record_start: i,
                record_end: data_end,
            });
        }
        i = data_end;
    }
    None
}

/// Iterates every well-formed record in `block`, tolerating and
/// stopping cleanly at a malformed trailing remainder.
pub fn iter(block: &[u8]) -> impl Iterator<Item = RecordRef<'_>> {
    let mut i = 0usize;
    std::iter::from_fn(move || {
        if i + RECORD_HEADER_SIZE > block.len() {
            return None;
        }
        let tag = slice_u16(block, i).ok()?;
        let data_size = slice_u16(block, i + 2).ok()? as usize;
        let data_start = i + RECORD_HEADER_SIZE;
        let data_end = data_start.checked_add(data_size)?;
        if data_end > block.len() {
            i = block.len();
            return None;
        }
        let rec = RecordRef {
            tag,
            data: &block[data_start..data_end],
            record_start: i,
            record_end: data_end,
        };
        i = data_end;
        Some(rec)
    })
}

fn encode_record(tag: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + payload.len());
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// If a record with `tag` exists and has the same payload length,
/// overwrite its payload in place. Otherwise delete any existing record
/// with that tag and place the new record at `position`.
pub fn insert_or_replace(tag: u16, new_payload: &[u8], block: &mut Vec<u8>, position: PositionPolicy) {
    if let Some(existing) = find(tag, block) {
        if existing.data.len() == new_payload.len() {
            let start = existing.record_start + RECORD_HEADER_SIZE;
            block[start..start + new_payload.len()].copy_from_slice(new_payload);
            return;
        }
    }
    remove(tag, block);
    let record = encode_record(tag, new_payload);
    match position {
        PositionPolicy::Front => {
            let mut out = record;
            out.extend_from_slice(block);
            *block = out;
        }
        PositionPolicy::Back => {
            block.extend_from_slice(&record);
        }
    }
}

/// Splices out the record (and its 4-byte header) matching `tag`, if any.
pub fn remove(tag: u16, block: &mut Vec<u8>) {
    if let Some(rec) = find(tag, block) {
        block.drain(rec.record_start..rec.record_end);
    }
}

/// Produces a block containing every record from `new_block`, followed
/// by every record from `old_block` whose tag does not appear in
/// `new_block`. Idempotent: `merge_nondup(a, merge_nondup(a, b)) ==
/// merge_nondup(a, b)` because the first pass already carries forward
/// only tags absent from `a`.
pub fn merge_nondup(old_block: &[u8], new_block: &[u8]) -> Vec<u8> {
    let new_tags: std::collections::HashSet<u16> = iter(new_block).map(|r| r.tag).collect();
    let mut out = Vec::with_capacity(new_block.len() + old_block.len());
    out.extend_from_slice(new_block);
    for rec in iter(old_block) {
        if !new_tags.contains(&rec.tag) {
            out.extend_from_slice(&encode_record(rec.tag, rec.data));
        }
    }
    out
}

/// Size, in bytes including the 4-byte tag+size header, a Zip64 local
/// record occupies when it carries both size fields (20 bytes total:
/// header + 2*8). This is also the fixed size reserved by the
/// Placeholder record (spec §4.3).
pub const ZIP64_LOCAL_RECORD_SIZE: usize = RECORD_HEADER_SIZE + 16;

/// Inserts an all-zero Placeholder record of `ZIP64_LOCAL_RECORD_SIZE`
/// bytes at the front of `block`, reserving room for a future Zip64
/// record.
pub fn insert_placeholder(block: &mut Vec<u8>) {
    let payload = [0u8; 16];
    insert_or_replace(TAG_PLACEHOLDER, &payload, block, PositionPolicy::Front);
}

/// The fields a Zip64 extra field may carry, in the fixed order the
/// format mandates: uncompressed_size, compressed_size, local_offset,
/// disk_start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zip64Fields {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64Fields {
    pub fn is_empty(&self) -> bool {
        self.uncompressed_size.is_none()
            && self.compressed_size.is_none()
            && self.local_offset.is_none()
            && self.disk_start.is_none()
    }

    pub fn to_payload(self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(v) = self.uncompressed_size {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.compressed_size {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.local_offset {
            out.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.disk_start {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Parses a Zip64 extra field payload, consuming fields in the
    /// fixed order, gated by which primary slots hold the sentinel
    /// value (the "adjust" step, spec §4.3).
    pub fn parse(
        payload: &[u8],
        uncompressed_is_sentinel: bool,
        compressed_is_sentinel: bool,
        offset_is_sentinel: bool,
        disk_is_sentinel: bool,
    ) -> Result<Self> {
        let mut cursor = 0usize;
        let mut out = Zip64Fields::default();
        if uncompressed_is_sentinel {
            out.uncompressed_size = Some(slice_u64(payload, cursor)?);
            cursor += 8;
        }
        if compressed_is_sentinel {
            out.compressed_size = Some(slice_u64(payload, cursor)?);
            cursor += 8;
        }
        if offset_is_sentinel {
            out.local_offset = Some(slice_u64(payload, cursor)?);
            cursor += 8;
        }
        if disk_is_sentinel {
            out.disk_start = Some(slice_u32(payload, cursor)?);
        }
        Ok(out)
    }
}

/// Unicode-Path (and -Comment) extra field payload: version byte 1,
/// CRC-32 of the associated non-Unicode bytes, then UTF-8 bytes.
#[derive(Debug, Clone)]
pub struct UnicodePathField {
    pub version: u8,
    pub name_crc32: u32,
    pub utf8_name: Vec<u8>,
}

impl UnicodePathField {
    pub fn new(name_crc32: u32, utf8_name: Vec<u8>) -> Self {
        Self {
            version: 1,
            name_crc32,
            utf8_name,
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 5 {
            return Err(ArchiveError::FormatError(
                "Unicode-Path extra field shorter than 5 bytes".into(),
            ));
        }
        Ok(Self {
            version: payload[0],
            name_crc32: slice_u32(payload, 1)?,
            utf8_name: payload[5..].to_vec(),
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.utf8_name.len());
        out.push(self.version);
        out.extend_from_slice(&self.name_crc32.to_le_bytes());
        out.extend_from_slice(&self.utf8_name);
        out
    }
}

/// Extended-Timestamp (0x5455) payload: a flags byte gating up to three
/// little-endian i32 Unix times (access, modify, create). The local
/// header may carry all three; the central header carries modify-time
/// only, per spec §9 Open Question resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedTimestamp {
    pub modify_time: Option<i32>,
    pub access_time: Option<i32>,
    pub create_time: Option<i32>,
}

impl ExtendedTimestamp {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.is_empty() {
            return Err(ArchiveError::FormatError(
                "Extended Timestamp extra field is empty".into(),
            ));
        }
        let flags = payload[0];
        let mut cursor = 1usize;
        let mut out = ExtendedTimestamp::default();
        if flags & 0x01 != 0 && payload.len() >= cursor + 4 {
            out.modify_time = Some(i32::from_le_bytes(
                payload[cursor..cursor + 4].try_into().unwrap(),
            ));
            cursor += 4;
        }
        if flags & 0x02 != 0 && payload.len() >= cursor + 4 {
            out.access_time = Some(i32::from_le_bytes(
                payload[cursor..cursor + 4].try_into().unwrap(),
            ));
            cursor += 4;
        }
        if flags & 0x04 != 0 && payload.len() >= cursor + 4 {
            out.create_time = Some(i32::from_le_bytes(
                payload[cursor..cursor + 4].try_into().unwrap(),
            ));
        }
        Ok(out)
    }

    /// Central-header emission: modify-time only, per the Open Question
    /// resolution in spec §9.
    pub fn to_central_payload(self) -> Option<Vec<u8>> {
        let mtime = self.modify_time?;
        let mut out = vec![0x01u8];
        out.extend_from_slice(&mtime.to_le_bytes());
        Some(out)
    }

    /// Local-header emission: all three times present at encode time.
    pub fn to_local_payload(self) -> Vec<u8> {
        let mut flags = 0u8;
        let mut data = Vec::new();
        if let Some(v) = self.modify_time {
            flags |= 0x01;
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.access_time {
            flags |= 0x02;
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = self.create_time {
            flags |= 0x04;
            data.extend_from_slice(&v.to_le_bytes());
        }
        let mut out = Vec::with_capacity(1 + data.len());
        out.push(flags);
        out.extend_from_slice(&data);
        out
    }
}

/// Legacy Info-Zip Unix extra field (0x5855), consulted only when
/// Extended Timestamp (0x5455) is absent.
#[derive(Debug, Clone, Copy)]
pub struct LegacyUnixTimes {
    pub access_time: i32,
    pub modify_time: i32,
}

impl LegacyUnixTimes {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 8 {
            return Err(ArchiveError::FormatError(
                "legacy Unix extra field shorter than 8 bytes".into(),
            ));
        }
        Ok(Self {
            access_time: i32::from_le_bytes(payload[0..4].try_into().unwrap()),
            modify_time: i32::from_le_bytes(payload[4..8].try_into().unwrap()),
        })
    }
}

/// WinZip AES-WG metadata record (0x9901): vendor version, vendor id
/// (`"AE"`), strength code, and the *actual* wrapped compression method.
/// This is header metadata only — the core never derives a key or
/// touches ciphertext (spec §1: codecs are an external collaborator).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AesWgField {
    pub vendor_version: u16,
    pub vendor_id: [u8; 2],
    pub strength: u8,
    pub actual_method: u16,
}

impl AesWgField {
    pub fn new(strength: u8, actual_method: u16) -> Self {
        Self {
            vendor_version: 2,
            vendor_id: *b"AE",
            strength,
            actual_method,
        }
    }

    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 7 {
            return Err(ArchiveError::FormatError(
                "AES-WG extra field shorter than 7 bytes".into(),
            ));
        }
        Ok(Self {
            vendor_version: slice_u16(payload, 0)?,
            vendor_id: [payload[2], payload[3]],
            strength: payload[4],
            actual_method: slice_u16(payload, 5)?,
        })
    }

    pub fn to_payload(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7);
        out.extend_from_slice(&self.vendor_version.to_le_bytes());
        out.extend_from_slice(&self.vendor_id);
        out.push(self.strength);
        out.extend_from_slice(&self.actual_method.to_le_bytes());
        out
    }
}

/// Stream-info extra field (0x6C78): carries version_made_by,
/// attributes, and an optional comment, for streaming consumers that
/// cannot read the central directory.
#[derive(Debug, Clone)]
pub struct StreamInfoField {
    pub version_made_by: u16,
    pub attributes: u32,
    pub comment: Vec<u8>,
}

impl StreamInfoField {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ArchiveError::FormatError(
                "Stream-info extra field shorter than 6 bytes".into(),
            ));
        }
        Ok(Self {
            version_made_by: slice_u16(payload, 0)?,
            attributes: slice_u32(payload, 2)?,
            comment: payload[6..].to_vec(),
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.comment.len());
        out.extend_from_slice(&self.version_made_by.to_le_bytes());
        out.extend_from_slice(&self.attributes.to_le_bytes());
        out.extend_from_slice(&self.comment);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: u16, payload: &[u8]) -> Vec<u8> {
        encode_record(tag, payload)
    }

    #[test]
    fn find_locates_tag() {
        let mut block = record(0x0001, &[1, 2, 3, 4]);
        block.extend(record(0x5455, &[5]));
        let found = find(0x5455, &block).unwrap();
        assert_eq!(found.data, &[5]);
    }

    #[test]
    fn find_ignores_truncated_trailer() {
        let mut block = record(0x0001, &[1, 2]);
        block.extend_from_slice(&[0x75, 0x70]); // dangling 2-byte tag, no size/data
        assert!(find(0x7075, &block).is_none());
        assert!(find(0x0001, &block).is_some());
    }

    #[test]
    fn insert_or_replace_overwrites_same_length() {
        let mut block = record(TAG_ZIP64, &[0u8; 16]);
        let payload = [1u8; 16];
        insert_or_replace(TAG_ZIP64, &payload, &mut block, PositionPolicy::Front);
        assert_eq!(block.len(), RECORD_HEADER_SIZE + 16);
        assert_eq!(find(TAG_ZIP64, &block).unwrap().data, &payload);
    }

    #[test]
    fn insert_or_replace_moves_to_front_on_resize() {
        let mut block = record(0x5455, &[9]);
        block.extend(record(TAG_ZIP64, &[0u8; 8]));
        insert_or_replace(TAG_ZIP64, &[0u8; 16], &mut block, PositionPolicy::Front);
        let first = iter(&block).next().unwrap();
        assert_eq!(first.tag, TAG_ZIP64);
        assert_eq!(first.data.len(), 16);
    }

    #[test]
    fn remove_splices_out_record() {
        let mut block = record(0x5455, &[1]);
        block.extend(record(TAG_ZIP64, &[2, 3]));
        block.extend(record(0x7075, &[4]));
        remove(TAG_ZIP64, &mut block);
        let tags: Vec<u16> = iter(&block).map(|r| r.tag).collect();
        assert_eq!(tags, vec![0x5455, 0x7075]);
    }

    #[test]
    fn merge_nondup_prefers_new_and_is_idempotent() {
        let old = {
            let mut b = record(0x5455, &[1]);
            b.extend(record(TAG_ZIP64, &[9, 9]));
            b
        };
        let new = record(TAG_ZIP64, &[2, 2]);

        let once = merge_nondup(&old, &new);
        let twice = merge_nondup(&old, &once);
        assert_eq!(once, twice);

        let tags: Vec<u16> = iter(&once).map(|r| r.tag).collect();
        assert_eq!(tags, vec![TAG_ZIP64, 0x5455]);
    }

    #[test]
    fn zip64_fields_roundtrip_sentinel_gated() {
        let fields = Zip64Fields {
            uncompressed_size: Some(5_000_000_000),
            compressed_size: None,
            local_offset: Some(123),
            disk_start: None,
        };
        let payload = fields.to_payload();
        let parsed = Zip64Fields::parse(&payload, true, false, true, false).unwrap();
        assert_eq!(parsed.uncompressed_size, Some(5_000_000_000));
        assert_eq!(parsed.compressed_size, None);
        assert_eq!(parsed.local_offset, Some(123));
    }

    #[test]
    fn unicode_path_field_roundtrip() {
        let crc = crc32fast::hash(b"hello.txt");
        let f = UnicodePathField::new(crc, b"hello.txt".to_vec());
        let payload = f.to_payload();
        let parsed = UnicodePathField::parse(&payload).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.name_crc32, crc);
        assert_eq!(parsed.utf8_name, b"hello.txt");
    }

    #[test]
    fn aes_wg_field_roundtrip() {
        let f = AesWgField::new(3, 8);
        let payload = f.to_payload();
        let parsed = AesWgField::parse(&payload).unwrap();
        assert_eq!(parsed, f);
    }
}
