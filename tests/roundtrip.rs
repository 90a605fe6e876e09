//! End-to-end scenarios against the public `ArchiveContext` API.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use tempfile::tempdir;
use zip_archive_core::config::{ForceZip64, UnicodeMismatchPolicy};
use zip_archive_core::entry::SelectionMark;
use zip_archive_core::extra::{self, PositionPolicy, TAG_UNICODE_PATH, UnicodePathField};
use zip_archive_core::volume::FsVolumeWriter;
use zip_archive_core::{ArchiveContext, Config, Entry};

#[test]
fn single_store_entry_round_trips_byte_exact() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("single.zip");

    let mut ctx = ArchiveContext::new(Config::new());
    ctx.add_entry(Entry::new(b"hello.txt".to_vec(), 0));
    let volume = FsVolumeWriter::new(&path, None);
    ctx.write::<File, _>(None, volume, |_| Some(b"hello world".to_vec()))
        .unwrap();

    let mut f = File::open(&path).unwrap();
    let scanned = ArchiveContext::scan(&mut f, Config::new()).unwrap();
    assert_eq!(scanned.entries().len(), 1);
    let entry = &scanned.entries()[0];
    assert_eq!(entry.display_name(), "hello.txt");
    assert_eq!(entry.uncompressed_size, 11);
    assert_eq!(entry.crc32, crc32fast::hash(b"hello world"));
    assert!(scanned.diagnostics().events().is_empty());
}

#[test]
fn forced_zip64_small_entry_still_bumps_version_needed() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("forced.zip");

    let config = Config::new().with_force_zip64(ForceZip64::Always);
    let mut ctx = ArchiveContext::new(config);
    ctx.add_entry(Entry::new(b"tiny.bin".to_vec(), 0));
    let volume = FsVolumeWriter::new(&path, None);
    ctx.write::<File, _>(None, volume, |_| Some(vec![1, 2, 3, 4]))
        .unwrap();

    let mut f = File::open(&path).unwrap();
    let scanned = ArchiveContext::scan(&mut f, Config::new()).unwrap();
    let entry = &scanned.entries()[0];
    // The entry's sizes stayed tiny, so nothing in it actually needs
    // Zip64 — but forcing still commits a real local Zip64 record and
    // bumps version_needed, which the central header carries forward
    // even though the small sizes mean no central Zip64 override field
    // is needed.
    assert!(!entry.needs_zip64());
    assert_eq!(entry.version_needed, 45);

    // The `scan` above already folds Zip64 overrides back into the
    // primary slots (the "adjust" step), so it can't tell us what bytes
    // were actually written. Read the raw file to confirm the local
    // header's primary size slots are the 0xFFFFFFFF sentinel (scenario:
    // a forced-but-small entry still sentinels those slots, spec
    // scenario 2) and that a Zip64 EOCD Record trailer was emitted.
    let raw = std::fs::read(&path).unwrap();
    assert!(raw.len() >= 30, "archive too short to hold a local header");
    let local_compressed_size = u32::from_le_bytes(raw[18..22].try_into().unwrap());
    let local_uncompressed_size = u32::from_le_bytes(raw[22..26].try_into().unwrap());
    assert_eq!(local_compressed_size, 0xFFFF_FFFF);
    assert_eq!(local_uncompressed_size, 0xFFFF_FFFF);

    let zip64_eocd_sig = [0x50, 0x4B, 0x06, 0x06];
    assert!(
        raw.windows(4).any(|w| w == zip64_eocd_sig),
        "expected a Zip64 EOCD Record signature somewhere in the archive"
    );
}

fn unicode_path_block(name: &[u8]) -> Vec<u8> {
    let field = UnicodePathField::new(crc32fast::hash(name), name.to_vec());
    let mut block = Vec::new();
    extra::insert_or_replace(TAG_UNICODE_PATH, &field.to_payload(), &mut block, PositionPolicy::Back);
    block
}

#[test]
fn unicode_mismatch_detection_respects_policy() {
    let mut entry = Entry::new(b"original.txt".to_vec(), 0);
    entry.central_extras = unicode_path_block(b"original.txt");
    let note = entry.reconcile_unicode_path(UnicodeMismatchPolicy::Warn).unwrap();
    assert!(note.is_none());
    assert_eq!(entry.utf8_name.as_deref(), Some(b"original.txt".as_slice()));

    // Simulate a rename that left the Unicode-Path field stale: the
    // stored name changed but the field's CRC still covers the old name.
    let mut renamed = Entry::new(b"renamed.txt".to_vec(), 0);
    renamed.central_extras = unicode_path_block(b"original.txt");
    let warned = renamed.reconcile_unicode_path(UnicodeMismatchPolicy::Warn).unwrap();
    assert!(warned.is_some());
    assert!(renamed.utf8_name.is_none());

    let mut renamed_err = Entry::new(b"renamed.txt".to_vec(), 0);
    renamed_err.central_extras = unicode_path_block(b"original.txt");
    let err = renamed_err.reconcile_unicode_path(UnicodeMismatchPolicy::Error);
    assert!(err.is_err());
}

#[test]
fn placeholder_promotes_only_when_the_final_size_crosses_the_threshold() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stream.zip");

    let mut ctx = ArchiveContext::new(Config::new());
    ctx.add_entry(Entry::new(b"small-stream.bin".to_vec(), 0));
    let volume = FsVolumeWriter::new(&path, None);
    // `ArchiveContext::write` always knows the final size up front (the
    // payload closure returns a complete `Vec<u8>`), so this pins that a
    // small, non-streamed entry never reserves a Placeholder at all.
    ctx.write::<File, _>(None, volume, |_| Some(vec![0u8; 64]))
        .unwrap();

    let mut f = File::open(&path).unwrap();
    let scanned = ArchiveContext::scan(&mut f, Config::new()).unwrap();
    let entry = &scanned.entries()[0];
    assert_eq!(entry.uncompressed_size, 64);
    assert!(entry.version_needed < 45);
}

#[test]
fn deflate_entry_keeps_caller_supplied_crc_and_uncompressed_size() {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let dir = tempdir().unwrap();
    let path = dir.path().join("deflated.zip");

    let original = b"hello hello hello hello hello world world world".to_vec();
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&original).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut ctx = ArchiveContext::new(Config::new());
    let mut entry = Entry::new(b"message.txt".to_vec(), 8); // method 8: deflate
    entry.crc32 = crc32fast::hash(&original);
    entry.uncompressed_size = original.len() as u64;
    ctx.add_entry(entry);

    let volume = FsVolumeWriter::new(&path, None);
    ctx.write::<File, _>(None, volume, |_| Some(compressed.clone()))
        .unwrap();

    let mut f = File::open(&path).unwrap();
    let scanned = ArchiveContext::scan(&mut f, Config::new()).unwrap();
    let scanned_entry = &scanned.entries()[0];
    assert_eq!(scanned_entry.method, 8);
    assert_eq!(scanned_entry.crc32, crc32fast::hash(&original));
    assert_eq!(scanned_entry.uncompressed_size, original.len() as u64);
    assert_eq!(scanned_entry.compressed_size, compressed.len() as u64);
    assert_ne!(scanned_entry.uncompressed_size, scanned_entry.compressed_size);
}

#[test]
fn mark_deleted_entry_is_absent_from_the_rewritten_archive() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("deleted.zip");

    let mut ctx = ArchiveContext::new(Config::new());
    ctx.add_entry(Entry::new(b"keep.txt".to_vec(), 0));
    ctx.add_entry(Entry::new(b"drop.txt".to_vec(), 0));
    assert!(ctx.mark_deleted(b"drop.txt"));

    let volume = FsVolumeWriter::new(&path, None);
    ctx.write::<File, _>(None, volume, |e| {
        Some(if e.display_name() == "keep.txt" {
            b"keep".to_vec()
        } else {
            b"drop".to_vec()
        })
    })
    .unwrap();

    let mut f = File::open(&path).unwrap();
    let scanned = ArchiveContext::scan(&mut f, Config::new()).unwrap();
    assert_eq!(scanned.entries().len(), 1);
    assert_eq!(scanned.entries()[0].display_name(), "keep.txt");
}

#[test]
fn salvage_mode_recovers_entries_when_the_eocd_is_missing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("damaged.zip");

    {
        let mut ctx = ArchiveContext::new(Config::new());
        ctx.add_entry(Entry::new(b"one.txt".to_vec(), 0));
        ctx.add_entry(Entry::new(b"two.txt".to_vec(), 0));
        let volume = FsVolumeWriter::new(&path, None);
        ctx.write::<File, _>(None, volume, |e| {
            Some(if e.display_name() == "one.txt" {
                b"first".to_vec()
            } else {
                b"second".to_vec()
            })
        })
        .unwrap();
    }

    // Truncate away everything from the central directory onward, so a
    // regular-mode scan (which requires a valid EOCD) cannot succeed.
    let central_dir_start = {
        let mut f = File::open(&path).unwrap();
        let len = f.seek(SeekFrom::End(0)).unwrap();
        let mut buf = vec![0u8; len as usize];
        f.seek(SeekFrom::Start(0)).unwrap();
        f.read_exact(&mut buf).unwrap();
        let sig = [0x50, 0x4b, 0x01, 0x02];
        buf.windows(4).position(|w| w == sig).unwrap() as u64
    };
    {
        let f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(central_dir_start).unwrap();
    }

    let mut f = File::open(&path).unwrap();
    assert!(ArchiveContext::scan(&mut f, Config::new()).is_err());

    let mut f = File::open(&path).unwrap();
    let salvaged = ArchiveContext::scan_salvage(&mut f, Config::new()).unwrap();
    let names: Vec<String> = salvaged.entries().iter().map(|e| e.display_name()).collect();
    assert_eq!(names, vec!["one.txt".to_string(), "two.txt".to_string()]);
    for entry in salvaged.entries() {
        assert_eq!(entry.selection_mark, SelectionMark::Keep);
    }
}

#[test]
fn split_archive_copy_rolls_onto_the_next_volume() {
    use zip_archive_core::volume::VolumeWriter;
    use zip_archive_core::writer;

    let dir = tempdir().unwrap();
    let base = dir.path().join("split.zip");

    /// Wraps `FsVolumeWriter` to track the current disk number the way a
    /// real multi-volume driver would: the inner writer always names a
    /// volume as non-final, so this wrapper is only responsible for
    /// deciding *when* to roll and for reporting `current_disk()`
    /// correctly afterward.
    struct TinyVolumeWriter {
        inner: FsVolumeWriter,
        disk: u32,
    }

    impl VolumeWriter for TinyVolumeWriter {
        fn open_volume(&mut self, disk: u32) -> zip_archive_core::Result<()> {
            self.disk = disk;
            self.inner.open_volume(disk)
        }
        fn append(&mut self, bytes: &[u8]) -> zip_archive_core::Result<()> {
            self.inner.append(bytes)
        }
        fn close_volume(&mut self) -> zip_archive_core::Result<()> {
            self.inner.close_volume()
        }
        fn position_in_current_volume(&self) -> u64 {
            self.inner.position_in_current_volume()
        }
        fn current_disk(&self) -> u32 {
            self.disk
        }
        fn is_seekable(&self) -> bool {
            true
        }
        fn rewrite_at(&mut self, offset: u64, bytes: &[u8]) -> zip_archive_core::Result<()> {
            self.inner.rewrite_at(offset, bytes)
        }
    }

    let mut vol = TinyVolumeWriter {
        inner: FsVolumeWriter::new(&base, Some(64)),
        disk: 0,
    };
    vol.open_volume(0).unwrap();

    let config = Config::new();
    let mut e1 = Entry::new(b"a.bin".to_vec(), 0);
    let payload1 = vec![0xABu8; 10];
    e1.crc32 = crc32fast::hash(&payload1);
    e1.compressed_size = payload1.len() as u64;
    e1.uncompressed_size = payload1.len() as u64;
    let state1 = writer::begin_entry(&mut vol, &mut e1, &config, false).unwrap();
    vol.append(&payload1).unwrap();
    writer::finish_entry(&mut vol, &mut e1, state1).unwrap();

    // Roll onto the next volume once the first is past its tiny budget.
    if vol.inner.remaining_budget() < 64 {
        vol.open_volume(1).unwrap();
    }

    let mut e2 = Entry::new(b"b.bin".to_vec(), 0);
    let payload2 = vec![0xCDu8; 10];
    e2.crc32 = crc32fast::hash(&payload2);
    e2.compressed_size = payload2.len() as u64;
    e2.uncompressed_size = payload2.len() as u64;
    let state2 = writer::begin_entry(&mut vol, &mut e2, &config, false).unwrap();
    vol.append(&payload2).unwrap();
    writer::finish_entry(&mut vol, &mut e2, state2).unwrap();

    let mut entries = vec![e1, e2];
    let (cd_start_disk, cd_offset, cd_size, any_zip64) =
        writer::write_central_directory(&mut vol, &mut entries).unwrap();
    writer::write_trailer(
        &mut vol,
        entries.len(),
        cd_start_disk,
        cd_offset,
        cd_size,
        any_zip64,
        b"",
    )
    .unwrap();
    vol.close_volume().unwrap();

    assert_eq!(entries[0].disk_start, 0);
    assert_eq!(entries[1].disk_start, 1);
    assert!(dir.path().join("split.z01").exists());
}
