//! Primitive little-endian integer and byte-string codec (spec §4.1).
//!
//! Two flavors of the same primitives: against anything `Read`/`Write`
//! (a volume), and against an in-memory [`GrowBuffer`] that enlarges in
//! 1 KiB increments (or exactly enough when a single append exceeds
//! 1 KiB). All reads fail with [`ArchiveError::ShortData`] on
//! truncation; there is no implicit endianness conversion on the host
//! side — every field is explicitly little-endian in and out.

use crate::error::{ArchiveError, Result};
use std::io::{Read, Write};

const GROW_STEP: usize = 1024;

/// A growable in-memory byte buffer used to assemble headers before a
/// single contiguous write to a volume.
#[derive(Debug, Default, Clone)]
pub struct GrowBuffer {
    bytes: Vec<u8>,
}

impl GrowBuffer {
    pub fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    fn reserve_for(&mut self, additional: usize) {
        let needed = self.bytes.len() + additional;
        if needed > self.bytes.capacity() {
            let grow_to = if additional > GROW_STEP {
                needed
            } else {
                needed.next_multiple_of(GROW_STEP)
            };
            self.bytes.reserve(grow_to - self.bytes.len());
        }
    }

    pub fn put_u16(&mut self, v: u16) {
        self.reserve_for(2);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.reserve_for(4);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.reserve_for(8);
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends exactly `bytes.len()` bytes, no terminator.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.reserve_for(bytes.len());
        self.bytes.extend_from_slice(bytes);
    }
}

/// Reads a little-endian `u16` from `r`, failing with `ShortData` on
/// truncation.
pub fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    read_exact_or_short(r, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact_or_short(r, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact_or_short(r, &mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Reads exactly `len` bytes.
pub fn read_bytes<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    if len > 256 * 1024 * 1024 {
        return Err(ArchiveError::OutOfMemory(len));
    }
    let mut buf = vec![0u8; len];
    read_exact_or_short(r, &mut buf)?;
    Ok(buf)
}

fn read_exact_or_short<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(ArchiveError::ShortData {
                    expected: buf.len(),
                    actual: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

pub fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Reads a `u16`/`u32` out of a byte slice at a given offset, for
/// parsing buffers already held in memory (extra fields, EOCD blocks).
pub fn slice_u16(buf: &[u8], at: usize) -> Result<u16> {
    let s = buf.get(at..at + 2).ok_or(ArchiveError::ShortData {
        expected: at + 2,
        actual: buf.len(),
    })?;
    Ok(u16::from_le_bytes([s[0], s[1]]))
}

pub fn slice_u32(buf: &[u8], at: usize) -> Result<u32> {
    let s = buf.get(at..at + 4).ok_or(ArchiveError::ShortData {
        expected: at + 4,
        actual: buf.len(),
    })?;
    Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
}

pub fn slice_u64(buf: &[u8], at: usize) -> Result<u64> {
    let s = buf.get(at..at + 8).ok_or(ArchiveError::ShortData {
        expected: at + 8,
        actual: buf.len(),
    })?;
    Ok(u64::from_le_bytes([
        s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7],
    ]))
}
