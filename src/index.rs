//! Sort indices for fast name lookup (spec §3, §9 redesign note).
//!
//! Two parallel orderings over the entry table: one over `stored_name`,
//! one over `utf8_name`-or-`stored_name`. Both reference entries by
//! stable index into the owning `Vec<Entry>` rather than by pointer, per
//! the "no cyclic ownership" redesign note.

use crate::entry::Entry;

/// Collation used to order names. The host-path layer normally supplies
/// this (locale/OEM translation is explicitly out of scope for the
/// core, spec §1); `ByteOrd` is the default byte-wise ordering used when
/// no such hook is installed.
pub trait NameCollation {
    fn cmp(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering;
}

/// Plain lexicographic byte ordering.
#[derive(Debug, Default, Clone, Copy)]
pub struct ByteOrd;

impl NameCollation for ByteOrd {
    fn cmp(&self, a: &[u8], b: &[u8]) -> std::cmp::Ordering {
        a.cmp(b)
    }
}

/// Two parallel index arrays over an entry table: by `stored_name`, and
/// by `utf8_name`-or-`stored_name`.
#[derive(Debug, Default, Clone)]
pub struct NameIndex {
    by_stored: Vec<u32>,
    by_display: Vec<u32>,
}

impl NameIndex {
    /// Rebuilds both orderings from scratch against `entries`.
    pub fn rebuild<C: NameCollation>(&mut self, entries: &[Entry], collation: &C) {
        let mut by_stored: Vec<u32> = (0..entries.len() as u32).collect();
        by_stored.sort_by(|&a, &b| {
            collation.cmp(&entries[a as usize].stored_name, &entries[b as usize].stored_name)
        });

        let mut by_display: Vec<u32> = (0..entries.len() as u32).collect();
        by_display.sort_by(|&a, &b| {
            collation.cmp(display_key(&entries[a as usize]), display_key(&entries[b as usize]))
        });

        self.by_stored = by_stored;
        self.by_display = by_display;
    }

    /// Looks up `name` first against stored names, then (unless
    /// `disable_display_fallback` is set, the "fix mode" escape hatch)
    /// against display names.
    pub fn find<C: NameCollation>(
        &self,
        name: &[u8],
        entries: &[Entry],
        collation: &C,
        disable_display_fallback: bool,
    ) -> Option<usize> {
        if let Some(i) = binary_find(&self.by_stored, name, collation, |idx| {
            &entries[idx as usize].stored_name
        }) {
            return Some(i as usize);
        }
        if disable_display_fallback {
            return None;
        }
        binary_find(&self.by_display, name, collation, |idx| display_key(&entries[idx as usize]))
            .map(|i| i as usize)
    }
}

fn display_key(entry: &Entry) -> &[u8] {
    entry.utf8_name.as_deref().unwrap_or(&entry.stored_name)
}

fn binary_find<'a, C: NameCollation>(
    sorted_indices: &'a [u32],
    name: &[u8],
    collation: &C,
    key_of: impl Fn(u32) -> &'a [u8],
) -> Option<u32> {
    let mut lo = 0usize;
    let mut hi = sorted_indices.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let idx = sorted_indices[mid];
        match collation.cmp(key_of(idx), name) {
            std::cmp::Ordering::Equal => return Some(idx),
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    fn entry(name: &str) -> Entry {
        Entry::new(name.as_bytes().to_vec(), 0)
    }

    #[test]
    fn finds_by_stored_name() {
        let entries = vec![entry("b.txt"), entry("a.txt"), entry("c.txt")];
        let mut idx = NameIndex::default();
        idx.rebuild(&entries, &ByteOrd);
        assert_eq!(idx.find(b"a.txt", &entries, &ByteOrd, false), Some(1));
        assert_eq!(idx.find(b"c.txt", &entries, &ByteOrd, false), Some(2));
        assert_eq!(idx.find(b"missing.txt", &entries, &ByteOrd, false), None);
    }

    #[test]
    fn falls_back_to_display_name() {
        let mut e = entry("caf\u{e9}.raw");
        e.utf8_name = Some("café.txt".as_bytes().to_vec());
        let entries = vec![e];
        let mut idx = NameIndex::default();
        idx.rebuild(&entries, &ByteOrd);
        assert_eq!(idx.find("café.txt".as_bytes(), &entries, &ByteOrd, false), Some(0));
        assert_eq!(idx.find("café.txt".as_bytes(), &entries, &ByteOrd, true), None);
    }
}
