//! The archive context (spec §9 redesign note): the single owning value
//! that replaces the original's module-level globals. One
//! `ArchiveContext` holds the entry table, its name index, the
//! diagnostics collected while building it, and the `Config` governing
//! how it was (or will be) written.

use crate::config::Config;
use crate::diagnostics::DiagnosticChannel;
use crate::entry::{Entry, SelectionMark};
use crate::error::Result;
use crate::index::{ByteOrd, NameCollation, NameIndex};
use crate::scanner::{self, ScanMode};
use crate::volume::VolumeWriter;
use crate::writer;
use std::io::{Read, Seek};

/// An open archive directory: the entry table plus everything needed to
/// look an entry up by name, inspect what went wrong while scanning it,
/// and write it back out.
pub struct ArchiveContext {
    entries: Vec<Entry>,
    index: NameIndex,
    diagnostics: DiagnosticChannel,
    config: Config,
    mode: Option<ScanMode>,
}

impl ArchiveContext {
    /// An empty context for building a brand new archive from scratch.
    pub fn new(config: Config) -> Self {
        Self {
            entries: Vec::new(),
            index: NameIndex::default(),
            diagnostics: DiagnosticChannel::new(),
            config,
            mode: None,
        }
    }

    /// Scans an existing archive's directory in regular mode (spec
    /// §4.4): EOCD search, Zip64 EOCD resolution, central directory
    /// walk. Fails outright on structural corruption; use
    /// [`ArchiveContext::scan_salvage`] to recover what is readable from
    /// a damaged archive instead.
    pub fn scan<R: Read + Seek>(r: &mut R, config: Config) -> Result<Self> {
        let mut diagnostics = DiagnosticChannel::new();
        let result = scanner::scan_regular(r, &config, &mut diagnostics)?;
        let mut ctx = Self {
            entries: result.entries,
            index: NameIndex::default(),
            diagnostics,
            config,
            mode: Some(result.mode),
        };
        ctx.reindex();
        Ok(ctx)
    }

    /// Scans in salvage mode (spec §4.4): a byte-by-byte signature walk
    /// that tolerates a missing or corrupt EOCD, merging central headers
    /// into the local headers found for the same name. Entries that
    /// never got a matching central header are kept but marked
    /// `readable = false`.
    pub fn scan_salvage<R: Read + Seek>(r: &mut R, config: Config) -> Result<Self> {
        let mut diagnostics = DiagnosticChannel::new();
        let result = scanner::scan_salvage(r, &config, &mut diagnostics)?;
        let mut ctx = Self {
            entries: result.entries,
            index: NameIndex::default(),
            diagnostics,
            config,
            mode: Some(result.mode),
        };
        ctx.reindex();
        Ok(ctx)
    }

    fn reindex(&mut self) {
        self.index.rebuild(&self.entries, &ByteOrd);
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn diagnostics(&self) -> &DiagnosticChannel {
        &self.diagnostics
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scan_mode(&self) -> Option<ScanMode> {
        self.mode
    }

    /// Looks up an entry by name using the configured collation,
    /// stored-name first then display-name fallback.
    pub fn find(&self, name: &[u8]) -> Option<&Entry> {
        self.find_with_collation(name, &ByteOrd)
    }

    pub fn find_with_collation<C: NameCollation>(&self, name: &[u8], collation: &C) -> Option<&Entry> {
        self.index
            .find(name, &self.entries, collation, false)
            .map(|i| &self.entries[i])
    }

    /// Appends a brand-new entry (not loaded from any existing archive)
    /// to the table, applying the configured path prefix and case fold.
    /// Returns the new entry's index.
    pub fn add_entry(&mut self, mut entry: Entry) -> usize {
        entry.selection_mark = SelectionMark::Replace;
        apply_naming_policy(&mut entry, &self.config, true);
        self.entries.push(entry);
        self.reindex();
        self.entries.len() - 1
    }

    /// Marks an existing entry for deletion on the next write.
    pub fn mark_deleted(&mut self, name: &[u8]) -> bool {
        if let Some(i) = self.index.find(name, &self.entries, &ByteOrd, false) {
            self.entries[i].selection_mark = SelectionMark::Delete;
            true
        } else {
            false
        }
    }

    /// Writes every surviving entry (those not marked `Delete`) to
    /// `volume`: newly-added entries are streamed from `payload_of`,
    /// everything else is copied forward from `source`. Consumes and
    /// returns the finished `ArchiveContext` reindexed against the
    /// entries actually written.
    pub fn write<R, V>(
        mut self,
        source: Option<&mut R>,
        mut volume: V,
        mut payload_of: impl FnMut(&Entry) -> Option<Vec<u8>>,
    ) -> Result<Self>
    where
        R: Read + Seek,
        V: VolumeWriter,
    {
        let mut surviving: Vec<Entry> = Vec::with_capacity(self.entries.len());
        let config = self.config.clone();
        let mut source = source;
        volume.open_volume(0)?;

        for mut entry in self.entries.drain(..) {
            if matches!(entry.selection_mark, SelectionMark::Delete) {
                continue;
            }
            match entry.selection_mark {
                SelectionMark::Replace | SelectionMark::Unseen => {
                    let bytes = payload_of(&entry).unwrap_or_default();
                    // `bytes` is whatever the caller hands us to store as-is
                    // — for method 0 (store) that's the original data, so we
                    // can derive crc32/uncompressed_size from it directly.
                    // For any other method, compression is an external
                    // collaborator (spec §1): `bytes` is already the
                    // compressed stream, and the caller must have set
                    // `crc32`/`uncompressed_size` on the entry beforehand
                    // from the *original* data. Either way `compressed_size`
                    // is exactly what got handed to us.
                    if entry.method == 0 {
                        entry.crc32 = crc32fast::hash(&bytes);
                        entry.uncompressed_size = bytes.len() as u64;
                    }
                    entry.compressed_size = bytes.len() as u64;
                    let state = writer::begin_entry(&mut volume, &mut entry, &config, false)?;
                    volume.append(&bytes)?;
                    writer::finish_entry(&mut volume, &mut entry, state)?;
                }
                SelectionMark::Keep | SelectionMark::Copy => {
                    let src = source.as_deref_mut().expect(
                        "entries marked Keep/Copy require a source archive to copy their payload from",
                    );
                    writer::copy_entry(src, &mut entry, &mut volume, &config)?;
                }
                SelectionMark::Delete => unreachable!(),
            }
            entry.selection_mark = SelectionMark::Keep;
            surviving.push(entry);
        }

        let (cd_start_disk, cd_offset, cd_size, any_zip64) =
            writer::write_central_directory(&mut volume, &mut surviving)?;
        writer::write_trailer(
            &mut volume,
            surviving.len(),
            cd_start_disk,
            cd_offset,
            cd_size,
            any_zip64,
            b"",
        )?;
        volume.close_volume()?;

        self.entries = surviving;
        self.reindex();
        let _ = &mut source;
        Ok(self)
    }
}

fn apply_naming_policy(entry: &mut Entry, config: &Config, is_new: bool) {
    use crate::config::{CaseFold, PathPrefixMode};

    if config.case_fold != CaseFold::None {
        entry.stored_name = match config.case_fold {
            CaseFold::Upper => entry.stored_name.to_ascii_uppercase(),
            CaseFold::Lower => entry.stored_name.to_ascii_lowercase(),
            CaseFold::None => unreachable!(),
        };
    }

    let applies = is_new || matches!(config.path_prefix_mode, PathPrefixMode::All);
    if applies {
        if let Some(prefix) = &config.path_prefix {
            let mut prefixed = prefix.clone();
            prefixed.extend_from_slice(&entry.stored_name);
            entry.stored_name = prefixed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeWriter;
    use std::io::Write;

    struct MemVolume {
        buf: Vec<u8>,
        disk: u32,
    }

    impl VolumeWriter for MemVolume {
        fn open_volume(&mut self, disk: u32) -> Result<()> {
            self.disk = disk;
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
            self.disk
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
    fn add_entry_then_write_produces_findable_archive() {
        let mut ctx = ArchiveContext::new(Config::new());
        let entry = Entry::new(b"greeting.txt".to_vec(), 0);
        ctx.add_entry(entry);
        assert!(ctx.find(b"greeting.txt").is_some());

        let vol = MemVolume { buf: Vec::new(), disk: 0 };
        let payload = b"hello archive".to_vec();
        let ctx = ctx
            .write::<std::io::Cursor<Vec<u8>>, _>(None, vol, |_| Some(payload.clone()))
            .unwrap();
        assert_eq!(ctx.entries().len(), 1);
        assert_eq!(ctx.entries()[0].uncompressed_size, payload.len() as u64);
    }

    #[test]
    fn mark_deleted_drops_entry_on_write() {
        let mut ctx = ArchiveContext::new(Config::new());
        ctx.add_entry(Entry::new(b"a.txt".to_vec(), 0));
        ctx.add_entry(Entry::new(b"b.txt".to_vec(), 0));
        assert!(ctx.mark_deleted(b"a.txt"));

        let vol = MemVolume { buf: Vec::new(), disk: 0 };
        let ctx = ctx
            .write::<std::io::Cursor<Vec<u8>>, _>(None, vol, |_| Some(b"x".to_vec()))
            .unwrap();
        assert_eq!(ctx.entries().len(), 1);
        assert_eq!(ctx.entries()[0].display_name(), "b.txt");
    }
}
