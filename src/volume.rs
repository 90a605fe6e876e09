//! Volume reader/writer contract (spec §6) for split ("multi-volume")
//! archives.
//!
//! The core treats the file-system layer as an opaque collaborator: it
//! only needs `open`/`read_at`/`size` on the read side and
//! `open_volume`/`append`/`close_volume`/`position_in_current_volume` on
//! the write side. Disk numbers are 0-based; the last disk holds the
//! `.zip` extension, earlier disks `.z01 .. .zNN` (spec §6).

use crate::error::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// What to do when a required volume cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingVolumeAction {
    Retry,
    Abort,
    Skip,
}

/// Read-side volume contract. Opening a volume closes whatever was
/// previously open — the core holds at most one read handle at a time.
pub trait VolumeReader {
    type Handle: Read + Seek;

    /// Opens `disk`, or calls back into `missing_volume` until it
    /// returns `Abort` (at which point the caller should surface
    /// `ArchiveError::VolumeMissing`) or successfully opens.
    fn open(&mut self, disk: u32) -> Result<&mut Self::Handle>;

    fn size(&mut self, disk: u32) -> Result<u64>;

    /// Invoked when `open` cannot find `disk`. The default policy aborts
    /// in regular mode; callers running in salvage mode may return
    /// `Skip` instead.
    fn missing_volume(&mut self, disk: u32) -> MissingVolumeAction {
        let _ = disk;
        MissingVolumeAction::Abort
    }
}

/// Write-side volume contract. `seek_to` is optional and present only
/// for seekable archives; a non-seekable writer reports that at
/// construction time and the core suppresses all header rewrites.
pub trait VolumeWriter {
    fn open_volume(&mut self, disk: u32) -> Result<()>;
    fn append(&mut self, bytes: &[u8]) -> Result<()>;
    fn close_volume(&mut self) -> Result<()>;
    fn position_in_current_volume(&self) -> u64;
    fn current_disk(&self) -> u32;
    fn is_seekable(&self) -> bool;

    /// Rewrites `len` bytes at `offset` within the *current* volume.
    /// Only ever called when `is_seekable()` is true.
    fn rewrite_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()>;
}

/// Derives the on-disk path for a given 0-based disk number from a base
/// `.zip` path: disk N (last) is the base path itself; earlier disks are
/// `.z01`, `.z02`, etc.
pub fn volume_path(base: &Path, disk: u32, last_disk: u32) -> PathBuf {
    if disk == last_disk {
        base.to_path_buf()
    } else {
        base.with_extension(format!("z{:02}", disk + 1))
    }
}

/// A concrete, file-system-backed set of volumes. This is the one
/// runnable volume implementation the crate ships; real deployments may
/// swap in anything else that implements the two traits above (e.g. one
/// backed by removable media prompts for `missing_volume`).
pub struct FsVolumeSet {
    base_path: PathBuf,
    last_disk: u32,
    current: Option<(u32, File)>,
}

impl FsVolumeSet {
    pub fn new(base_path: impl Into<PathBuf>, last_disk: u32) -> Self {
        Self {
            base_path: base_path.into(),
            last_disk,
            current: None,
        }
    }

    fn path_for(&self, disk: u32) -> PathBuf {
        volume_path(&self.base_path, disk, self.last_disk)
    }
}

impl VolumeReader for FsVolumeSet {
    type Handle = File;

    fn open(&mut self, disk: u32) -> Result<&mut File> {
        if !matches!(&self.current, Some((d, _)) if *d == disk) {
            loop {
                let path = self.path_for(disk);
                match File::open(&path) {
                    Ok(f) => {
                        self.current = Some((disk, f));
                        break;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        match self.missing_volume(disk) {
                            MissingVolumeAction::Retry => continue,
                            MissingVolumeAction::Abort => {
                                return Err(crate::error::ArchiveError::VolumeMissing(disk))
                            }
                            MissingVolumeAction::Skip => {
                                return Err(crate::error::ArchiveError::VolumeMissing(disk))
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(&mut self.current.as_mut().unwrap().1)
    }

    fn size(&mut self, disk: u32) -> Result<u64> {
        let f = self.open(disk)?;
        let cur = f.stream_position()?;
        let size = f.seek(SeekFrom::End(0))?;
        f.seek(SeekFrom::Start(cur))?;
        Ok(size)
    }
}

/// A file-system-backed split-volume writer with a fixed per-volume byte
/// budget (`None` for an unlimited single-volume archive).
pub struct FsVolumeWriter {
    base_path: PathBuf,
    budget: Option<u64>,
    current_disk: u32,
    current_file: Option<File>,
    position: u64,
    seekable: bool,
}

impl FsVolumeWriter {
    pub fn new(base_path: impl Into<PathBuf>, budget: Option<u64>) -> Self {
        Self {
            base_path: base_path.into(),
            budget,
            current_disk: 0,
            current_file: None,
            position: 0,
            seekable: true,
        }
    }

    /// Remaining bytes on the current volume before the budget is hit,
    /// or `u64::MAX` when unbounded.
    pub fn remaining_budget(&self) -> u64 {
        match self.budget {
            Some(b) => b.saturating_sub(self.position),
            None => u64::MAX,
        }
    }

    fn path_for_disk(&self, disk: u32, is_last_known: bool) -> PathBuf {
        if is_last_known {
            self.base_path.clone()
        } else {
            self.base_path.with_extension(format!("z{:02}", disk + 1))
        }
    }
}

impl VolumeWriter for FsVolumeWriter {
    fn open_volume(&mut self, disk: u32) -> Result<()> {
        // Volumes before the final one always use the `.zNN` naming; the
        // final volume (this archive's `.zip`) is only known to be final
        // once `finish` stops allocating new volumes, so callers that
        // pre-split name every non-final volume `.zNN` and rename the
        // last one afterward. Here we always open assuming not-final and
        // let the writer's `finish` step do that rename.
        let path = self.path_for_disk(disk, false);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        self.current_disk = disk;
        self.current_file = Some(file);
        self.position = 0;
        Ok(())
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let file = self
            .current_file
            .as_mut()
            .expect("append called before open_volume");
        file.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn close_volume(&mut self) -> Result<()> {
        if let Some(mut f) = self.current_file.take() {
            f.flush()?;
        }
        Ok(())
    }

    fn position_in_current_volume(&self) -> u64 {
        self.position
    }

    fn current_disk(&self) -> u32 {
        self.current_disk
    }

    fn is_seekable(&self) -> bool {
        self.seekable
    }

    fn rewrite_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        let file = self
            .current_file
            .as_mut()
            .expect("rewrite_at called before open_volume");
        let saved = file.stream_position()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.seek(SeekFrom::Start(saved))?;
        Ok(())
    }
}
