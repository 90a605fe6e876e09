//! Local/central header emission, trailer emission, and the copier
//! (spec §4.5).
//!
//! Every multi-byte field goes out little-endian via [`GrowBuffer`]; the
//! writer never holds more than one entry's header in memory at a time.
//! Splitting policy: a local header (plus its name and extras) is never
//! split across a volume boundary, but the payload that follows it may
//! straddle one freely. The central directory and the Zip64 trailer are
//! written as a single contiguous run starting wherever the writer's
//! cursor happens to be when `finish` is called.

use crate::byteio::GrowBuffer;
use crate::config::Config;
use crate::entry::{Entry, FLAG_DATA_DESCRIPTOR, SENTINEL_16, SENTINEL_32};
use crate::error::{ArchiveError, Result};
use crate::scanner::{SIG_CENTRAL, SIG_DATA_DESCRIPTOR, SIG_LOCAL, SIG_ZIP64_EOCD, SIG_ZIP64_LOCATOR};
use crate::volume::{VolumeReader, VolumeWriter};
use std::io::{Read, Seek, SeekFrom};

const LOCAL_FIXED_SIZE: usize = 30;
const CENTRAL_FIXED_SIZE: usize = 46;
const EOCD_FIXED_SIZE: usize = 22;

/// State carried between `begin_entry` and `finish_entry` for a single
/// streamed-in-place write (size unknown until the payload is done).
pub struct EntryWriteState {
    header_disk: u32,
    extras_offset_in_volume: u64,
    streaming: bool,
    force_zip64: bool,
}

/// Writes a fresh local header for `entry`, reserving a Zip64
/// placeholder or committing a real record as the promotion policy
/// dictates. Call [`finish_entry`] once the payload has been streamed
/// and `entry`'s crc/sizes are final.
pub fn begin_entry<V: VolumeWriter>(
    volume: &mut V,
    entry: &mut Entry,
    config: &Config,
    streaming: bool,
) -> Result<EntryWriteState> {
    entry.disk_start = volume.current_disk();
    entry.local_offset = volume.position_in_current_volume();
    if streaming {
        entry.flags_local |= FLAG_DATA_DESCRIPTOR;
    }

    let reserved = entry.plan_zip64_for_local_header(config, streaming, volume.is_seekable())?;
    if reserved && !streaming {
        // The final sizes are already known; commit the real Zip64 record
        // instead of leaving a placeholder nothing will come back to fix.
        entry.promote_placeholder_to_real(true)?;
    }

    let header = encode_local_header(entry);
    let extras_offset_in_volume = entry.local_offset + LOCAL_FIXED_SIZE as u64 + entry.stored_name.len() as u64;
    volume.append(header.as_slice())?;

    Ok(EntryWriteState {
        header_disk: entry.disk_start,
        extras_offset_in_volume,
        streaming,
        force_zip64: matches!(config.force_zip64, crate::config::ForceZip64::Always),
    })
}

/// Completes a streamed entry: promotes its Zip64 placeholder to a real
/// record if the final sizes turned out to need one (rewriting the
/// already-emitted header in place), then emits the trailing data
/// descriptor when `flags_local` calls for one.
pub fn finish_entry<V: VolumeWriter>(
    volume: &mut V,
    entry: &mut Entry,
    state: EntryWriteState,
) -> Result<()> {
    if state.streaming {
        let promoted = entry.promote_placeholder_to_real(state.force_zip64)?;
        if promoted {
            if !volume.is_seekable() {
                return Err(ArchiveError::FormatError(
                    "entry grew past the Zip64 threshold on a non-seekable sink".into(),
                ));
            }
            if volume.current_disk() != state.header_disk {
                return Err(ArchiveError::FormatError(
                    "cannot rewrite a local header that was already rolled onto a later volume".into(),
                ));
            }
            volume.rewrite_at(state.extras_offset_in_volume, &entry.local_extras)?;
        }
    }

    if entry.flags_local & FLAG_DATA_DESCRIPTOR != 0 {
        write_data_descriptor(volume, entry)?;
    }
    Ok(())
}

fn encode_local_header(entry: &Entry) -> GrowBuffer {
    let mut buf = GrowBuffer::with_capacity(LOCAL_FIXED_SIZE + entry.stored_name.len() + entry.local_extras.len());
    buf.put_u32(SIG_LOCAL);
    buf.put_u16(entry.version_needed);
    buf.put_u16(entry.flags_local);
    buf.put_u16(entry.method);
    buf.put_u16((entry.dos_time & 0xFFFF) as u16);
    buf.put_u16((entry.dos_time >> 16) as u16);

    let streaming_unknown = entry.flags_local & FLAG_DATA_DESCRIPTOR != 0 && entry.crc32 == 0 && entry.compressed_size == 0;
    if streaming_unknown {
        buf.put_u32(0);
        buf.put_u32(0);
        buf.put_u32(0);
    } else {
        // A committed local Zip64 record sentinels the primary slots
        // regardless of magnitude: `force_zip64=always` can promote a
        // real 0x0001 record on an entry whose sizes never cross the
        // threshold, and the primary slots still have to point the
        // reader at that record rather than show the true small sizes.
        let has_local_zip64 = crate::extra::find(crate::extra::TAG_ZIP64, &entry.local_extras).is_some();
        buf.put_u32(entry.crc32);
        buf.put_u32(sentinel_u32(entry.compressed_size, has_local_zip64));
        buf.put_u32(sentinel_u32(entry.uncompressed_size, has_local_zip64));
    }

    buf.put_u16(entry.stored_name.len() as u16);
    buf.put_u16(entry.local_extras.len() as u16);
    buf.put_bytes(&entry.stored_name);
    buf.put_bytes(&entry.local_extras);
    buf
}

fn clamp_u32_sentinel(v: u64) -> u32 {
    if v > u32::MAX as u64 {
        SENTINEL_32
    } else {
        v as u32
    }
}

/// Like [`clamp_u32_sentinel`], but also sentinels when `force` is set —
/// i.e. a real Zip64 record already exists for this slot and the header
/// must point at it even though the value itself still fits in 32 bits.
fn sentinel_u32(v: u64, force: bool) -> u32 {
    if force || v > u32::MAX as u64 {
        SENTINEL_32
    } else {
        v as u32
    }
}

fn clamp_u16_sentinel(v: u32) -> u16 {
    if v > u16::MAX as u32 {
        SENTINEL_16
    } else {
        v as u16
    }
}

fn write_data_descriptor<V: VolumeWriter>(volume: &mut V, entry: &Entry) -> Result<()> {
    // Sizes are 8 bytes wide exactly when a real Zip64 local record was
    // committed, not merely when the sizes happen to be large — a
    // `force_zip64=always` entry gets a wide descriptor even if it ends up
    // tiny, while an un-promoted placeholder keeps the classic 4-byte width.
    let wide = crate::extra::find(crate::extra::TAG_ZIP64, &entry.local_extras).is_some();
    let mut buf = GrowBuffer::with_capacity(24);
    buf.put_u32(SIG_DATA_DESCRIPTOR);
    buf.put_u32(entry.crc32);
    if wide {
        buf.put_u64(entry.compressed_size);
        buf.put_u64(entry.uncompressed_size);
    } else {
        buf.put_u32(entry.compressed_size as u32);
        buf.put_u32(entry.uncompressed_size as u32);
    }
    volume.append(buf.as_slice())
}

fn encode_central_header(entry: &Entry) -> GrowBuffer {
    let mut buf = GrowBuffer::with_capacity(
        CENTRAL_FIXED_SIZE + entry.stored_name.len() + entry.central_extras.len() + entry.comment.len(),
    );
    buf.put_u32(SIG_CENTRAL);
    buf.put_u16(entry.version_made_by);
    buf.put_u16(entry.version_needed);
    buf.put_u16(entry.flags_central);
    buf.put_u16(entry.method);
    buf.put_u16((entry.dos_time & 0xFFFF) as u16);
    buf.put_u16((entry.dos_time >> 16) as u16);
    // A committed local Zip64 record forces the matching central size
    // slots to sentinel too, even when the sizes themselves never left
    // 32-bit range (`force_zip64=always` on a small entry) — the central
    // Zip64 record [`Entry::finalize_central_zip64`] builds carries those
    // same two fields in that case, so the primary slots must point at
    // it. `local_offset` only sentinels by magnitude: nothing forces it.
    let force = crate::extra::find(crate::extra::TAG_ZIP64, &entry.local_extras).is_some();
    buf.put_u32(entry.crc32);
    buf.put_u32(sentinel_u32(entry.compressed_size, force));
    buf.put_u32(sentinel_u32(entry.uncompressed_size, force));
    buf.put_u16(entry.stored_name.len() as u16);
    buf.put_u16(entry.central_extras.len() as u16);
    buf.put_u16(entry.comment.len() as u16);
    buf.put_u16(clamp_u16_sentinel(entry.disk_start));
    buf.put_u16(entry.internal_attr);
    buf.put_u32(entry.external_attr);
    buf.put_u32(clamp_u32_sentinel(entry.local_offset));
    buf.put_bytes(&entry.stored_name);
    buf.put_bytes(&entry.central_extras);
    buf.put_bytes(&entry.comment);
    buf
}

/// Writes the central directory for every surviving entry (the caller
/// has already dropped `Delete`-marked ones from the slice), finalizing
/// each entry's Zip64 central extra field first. Returns
/// `(cd_start_disk, cd_offset, cd_size, any_entry_needed_zip64)`, the
/// last of which folds in any entry that committed a real local or
/// central Zip64 record regardless of magnitude (e.g.
/// `force_zip64=always` on an entry that stayed small) — the caller
/// must OR this into its own Zip64-trailer decision.
pub fn write_central_directory<V: VolumeWriter>(
    volume: &mut V,
    entries: &mut [Entry],
) -> Result<(u32, u64, u64, bool)> {
    let cd_start_disk = volume.current_disk();
    let cd_offset = volume.position_in_current_volume();
    let mut size = 0u64;
    let mut any_zip64 = false;
    for entry in entries.iter_mut() {
        if entry.finalize_central_zip64() {
            any_zip64 = true;
        }
        let header = encode_central_header(entry);
        size += header.len() as u64;
        volume.append(header.as_slice())?;
    }
    Ok((cd_start_disk, cd_offset, size, any_zip64))
}

/// Writes the Zip64 EOCD Record + Locator (only when needed) followed
/// by the classic EOCD, per spec §4.5's sentinel rules. `any_entry_zip64`
/// is the flag [`write_central_directory`] returned: even a single small
/// forced-Zip64 entry must still produce the Zip64 trailer.
pub fn write_trailer<V: VolumeWriter>(
    volume: &mut V,
    entry_count: usize,
    cd_start_disk: u32,
    cd_offset: u64,
    cd_size: u64,
    any_entry_zip64: bool,
    comment: &[u8],
) -> Result<()> {
    let total_disk = volume.current_disk();
    let needs_zip64 = any_entry_zip64
        || entry_count > SENTINEL_16 as usize
        || cd_size >= SENTINEL_32 as u64
        || cd_offset >= SENTINEL_32 as u64
        || cd_start_disk >= SENTINEL_16 as u32
        || total_disk >= SENTINEL_16 as u32;

    if needs_zip64 {
        let zip64_eocd_offset = volume.position_in_current_volume();
        let mut rec = GrowBuffer::with_capacity(56);
        rec.put_u32(SIG_ZIP64_EOCD);
        rec.put_u64(44); // size of remaining record: fixed fields only, no extensible data
        rec.put_u16(45); // version made by
        rec.put_u16(45); // version needed
        rec.put_u32(total_disk);
        rec.put_u32(cd_start_disk);
        rec.put_u64(entry_count as u64);
        rec.put_u64(entry_count as u64);
        rec.put_u64(cd_size);
        rec.put_u64(cd_offset);
        volume.append(rec.as_slice())?;

        let mut locator = GrowBuffer::with_capacity(20);
        locator.put_u32(SIG_ZIP64_LOCATOR);
        locator.put_u32(total_disk);
        locator.put_u64(zip64_eocd_offset);
        locator.put_u32(total_disk + 1);
        volume.append(locator.as_slice())?;
    }

    let mut eocd = GrowBuffer::with_capacity(EOCD_FIXED_SIZE + comment.len());
    eocd.put_u32(crate::scanner::SIG_EOCD);
    eocd.put_u16(clamp_u16_sentinel(total_disk));
    eocd.put_u16(clamp_u16_sentinel(cd_start_disk));
    eocd.put_u16(clamp_u16_sentinel(entry_count as u32));
    eocd.put_u16(clamp_u16_sentinel(entry_count as u32));
    eocd.put_u32(clamp_u32_sentinel(cd_size));
    eocd.put_u32(clamp_u32_sentinel(cd_offset));
    eocd.put_u16(comment.len() as u16);
    eocd.put_bytes(comment);
    volume.append(eocd.as_slice())
}

// --- Copier -------------------------------------------------------------

/// Re-streams one entry's payload from an existing archive into the
/// destination volume, re-emitting a fresh local header built from the
/// (authoritative) central-directory fields rather than trusting
/// whatever the old local header said. `entry.local_offset` /
/// `entry.disk_start` are updated to the new position on success.
pub fn copy_entry<R: Read + Seek, V: VolumeWriter>(
    source: &mut R,
    entry: &mut Entry,
    volume: &mut V,
    config: &Config,
) -> Result<()> {
    source.seek(SeekFrom::Start(entry.local_offset))?;
    let local = parse_local_header_for_copy(source)?;

    if local.stored_name != entry.stored_name {
        return Err(ArchiveError::FormatError(format!(
            "local header name {:?} does not match central directory name {:?}",
            String::from_utf8_lossy(&local.stored_name),
            entry.display_name(),
        )));
    }
    if local.method != entry.method {
        return Err(ArchiveError::FormatError(format!(
            "local header method {} does not match central directory method {} for {:?}",
            local.method,
            entry.method,
            entry.display_name(),
        )));
    }

    let payload_start = source.stream_position()?;
    let state = begin_entry(volume, entry, config, false)?;

    let mut remaining = entry.compressed_size;
    source.seek(SeekFrom::Start(payload_start))?;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        source.read_exact(&mut buf[..want])?;
        volume.append(&buf[..want])?;
        remaining -= want as u64;
    }

    finish_entry(volume, entry, state)
}

/// Like [`copy_entry`], but for the split-archive case (spec §8 scenario
/// 5): the entry's local header and payload live on `entry.disk_start`,
/// which may not be the disk the caller currently has open, and the
/// payload itself may straddle the boundary into the following disk.
/// Re-emits a fresh local header from the authoritative central fields
/// and streams exactly `compressed_size` bytes, opening additional
/// volumes on `source` as needed.
pub fn copy_entry_split<R: VolumeReader, V: VolumeWriter>(
    source: &mut R,
    entry: &mut Entry,
    volume: &mut V,
    config: &Config,
) -> Result<()> {
    let mut disk = entry.disk_start;
    let offset = entry.local_offset;

    let local = {
        let handle = source.open(disk)?;
        handle.seek(SeekFrom::Start(offset))?;
        parse_local_header_for_copy(handle)?
    };

    if local.stored_name != entry.stored_name {
        return Err(ArchiveError::FormatError(format!(
            "local header name {:?} does not match central directory name {:?}",
            String::from_utf8_lossy(&local.stored_name),
            entry.display_name(),
        )));
    }
    if local.method != entry.method {
        return Err(ArchiveError::FormatError(format!(
            "local header method {} does not match central directory method {} for {:?}",
            local.method,
            entry.method,
            entry.display_name(),
        )));
    }

    let state = begin_entry(volume, entry, config, false)?;

    let mut remaining = entry.compressed_size;
    let mut buf = [0u8; 64 * 1024];
    while remaining > 0 {
        let disk_size = source.size(disk)?;
        let pos = {
            let handle = source.open(disk)?;
            handle.stream_position()?
        };
        if pos >= disk_size {
            disk += 1;
            let handle = source.open(disk)?;
            handle.seek(SeekFrom::Start(0))?;
            continue;
        }
        let avail_on_disk = disk_size - pos;
        let want = remaining.min(avail_on_disk).min(buf.len() as u64) as usize;
        let handle = source.open(disk)?;
        handle.read_exact(&mut buf[..want])?;
        volume.append(&buf[..want])?;
        remaining -= want as u64;
    }

    finish_entry(volume, entry, state)
}

struct CopiedLocalHeader {
    stored_name: Vec<u8>,
    method: u16,
}

fn parse_local_header_for_copy<R: Read + Seek>(r: &mut R) -> Result<CopiedLocalHeader> {
    use crate::byteio::{read_bytes, read_u16, read_u32};
    let sig = read_u32(r)?;
    if sig != SIG_LOCAL {
        return Err(ArchiveError::FormatError("expected local header signature at copy source".into()));
    }
    let _version_needed = read_u16(r)?;
    let _flags = read_u16(r)?;
    let method = read_u16(r)?;
    let _mod_time = read_u16(r)?;
    let _mod_date = read_u16(r)?;
    let _crc32 = read_u32(r)?;
    let _compressed_size = read_u32(r)?;
    let _uncompressed_size = read_u32(r)?;
    let name_len = read_u16(r)? as usize;
    let extra_len = read_u16(r)? as usize;
    let stored_name = read_bytes(r, name_len)?;
    let _extras = read_bytes(r, extra_len)?;
    Ok(CopiedLocalHeader { stored_name, method })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::volume::VolumeWriter;
    use std::io::Write;

    /// A minimal in-memory single-volume writer for exercising the header
    /// emission paths without touching the filesystem.
    struct MemVolume {
        buf: Vec<u8>,
    }

    impl VolumeWriter for MemVolume {
        fn open_volume(&mut self, _disk: u32) -> Result<()> {
            Ok(())
        }
        fn append(&mut self, bytes: &[u8]) -> Result<()> {
            self.buf.write_all(bytes)?;
            Ok(())
        }
        fn close_volume(&mut self) -> Result<()> {
            Ok(())
        }
        fn position_in_current_volume(&self) -> u64 {
            self.buf.len() as u64
        }
        fn current_disk(&self) -> u32 {
            0
        }
        fn is_seekable(&self) -> bool {
            true
        }
        fn rewrite_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
            let start = offset as usize;
            self.buf[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }
    }

    #[test]
    fn round_trip_store_entry_no_zip64() {
        let mut vol = MemVolume { buf: Vec::new() };
        let config = Config::new();
        let mut entry = Entry::new(b"hello.txt".to_vec(), 0);
        entry.crc32 = 0x1234_5678;
        entry.compressed_size = 11;
        entry.uncompressed_size = 11;

        let state = begin_entry(&mut vol, &mut entry, &config, false).unwrap();
        vol.append(b"hello world").unwrap();
        finish_entry(&mut vol, &mut entry, state).unwrap();

        let (cd_start_disk, cd_offset, cd_size, any_zip64) =
            write_central_directory(&mut vol, std::slice::from_mut(&mut entry)).unwrap();
        write_trailer(&mut vol, 1, cd_start_disk, cd_offset, cd_size, any_zip64, b"").unwrap();

        assert_eq!(&vol.buf[0..4], &SIG_LOCAL.to_le_bytes());
        let eocd_pos = vol.buf.len() - EOCD_FIXED_SIZE;
        assert_eq!(&vol.buf[eocd_pos..eocd_pos + 4], &crate::scanner::SIG_EOCD.to_le_bytes());
    }

    #[test]
    fn forced_zip64_streaming_commits_real_record_on_finish() {
        let mut vol = MemVolume { buf: Vec::new() };
        let config = Config::new().with_force_zip64(crate::config::ForceZip64::Always);
        let mut entry = Entry::new(b"stream.bin".to_vec(), 0);

        let state = begin_entry(&mut vol, &mut entry, &config, true).unwrap();
        assert!(entry.flags_local & FLAG_DATA_DESCRIPTOR != 0);
        assert!(crate::extra::find(crate::extra::TAG_PLACEHOLDER, &entry.local_extras).is_some());

        entry.crc32 = 0xAAAA_BBBB;
        entry.compressed_size = 5;
        entry.uncompressed_size = 5;
        vol.append(b"hello").unwrap();
        finish_entry(&mut vol, &mut entry, state).unwrap();

        assert!(crate::extra::find(crate::extra::TAG_ZIP64, &entry.local_extras).is_some());
        assert!(crate::extra::find(crate::extra::TAG_PLACEHOLDER, &entry.local_extras).is_none());

        // The trailing data descriptor widens to 8-byte sizes once a real
        // Zip64 record is committed.
        let dd_pos = vol.buf.len() - 24;
        assert_eq!(&vol.buf[dd_pos..dd_pos + 4], &SIG_DATA_DESCRIPTOR.to_le_bytes());
    }

    /// A two-volume in-memory `VolumeReader`, standing in for `a.z01`/
    /// `a.z02` in the split-archive copy scenario (spec §8 scenario 5).
    struct TwoDiskReader {
        disks: Vec<std::io::Cursor<Vec<u8>>>,
    }

    impl VolumeReader for TwoDiskReader {
        type Handle = std::io::Cursor<Vec<u8>>;

        fn open(&mut self, disk: u32) -> Result<&mut Self::Handle> {
            self.disks
                .get_mut(disk as usize)
                .ok_or(ArchiveError::VolumeMissing(disk))
        }

        fn size(&mut self, disk: u32) -> Result<u64> {
            Ok(self.disks[disk as usize].get_ref().len() as u64)
        }
    }

    #[test]
    fn copy_entry_split_streams_payload_across_a_disk_boundary() {
        // Disk 0 holds the local header and the first half of the payload;
        // disk 1 holds the remainder. The central directory (not modeled
        // here) already told us disk_start=0, local_offset=0, and the true
        // compressed_size spanning both disks.
        let payload = vec![0x42u8; 20];
        let mut local_header = GrowBuffer::new();
        local_header.put_u32(SIG_LOCAL);
        local_header.put_u16(20); // version needed
        local_header.put_u16(0); // flags
        local_header.put_u16(0); // method: store
        local_header.put_u16(0); // mod time
        local_header.put_u16(0); // mod date
        local_header.put_u32(crc32fast::hash(&payload));
        local_header.put_u32(payload.len() as u32);
        local_header.put_u32(payload.len() as u32);
        local_header.put_u16(6); // name len
        local_header.put_u16(0); // extra len
        local_header.put_bytes(b"big.bi");

        let mut disk0 = local_header.into_vec();
        disk0.extend_from_slice(&payload[..12]);
        let disk1 = payload[12..].to_vec();

        let mut reader = TwoDiskReader {
            disks: vec![std::io::Cursor::new(disk0), std::io::Cursor::new(disk1)],
        };

        let mut entry = Entry::new(b"big.bi".to_vec(), 0);
        entry.disk_start = 0;
        entry.local_offset = 0;
        entry.compressed_size = payload.len() as u64;
        entry.uncompressed_size = payload.len() as u64;
        entry.crc32 = crc32fast::hash(&payload);

        let mut out = MemVolume { buf: Vec::new() };
        let config = Config::new();
        copy_entry_split(&mut reader, &mut entry, &mut out, &config).unwrap();

        assert_eq!(entry.disk_start, 0);
        assert_eq!(entry.local_offset, 0);
        let name_start = LOCAL_FIXED_SIZE;
        assert_eq!(&out.buf[name_start..name_start + 6], b"big.bi");
        assert_eq!(&out.buf[out.buf.len() - 20..], payload.as_slice());
    }
}
