//! ES range tables: ordered `(file_offset, size, es_offset)` spans and the
//! lookups the demuxers and the matcher hot path run over them.
//!
//! Every table describes one stream. Ranges are sorted by ES offset, start at
//! ES offset 0 and leave no gaps or overlaps, so `sum(size)` is the stream's
//! total ES size.

use std::borrow::Cow;

use serde::Serialize;

use crate::error::{Error, Result};

/// Contiguous ES span backed by contiguous file bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PesPayloadRange {
    pub file_offset: u64,
    pub size: u64,
    pub es_offset: u64,
}

impl PesPayloadRange {
    pub fn new(file_offset: u64, size: u64, es_offset: u64) -> Self {
        Self { file_offset, size, es_offset }
    }

    pub fn es_end(&self) -> u64 {
        self.es_offset + self.size
    }

    pub fn file_end(&self) -> u64 {
        self.file_offset + self.size
    }

    pub fn contains(&self, es_offset: u64) -> bool {
        es_offset >= self.es_offset && es_offset < self.es_end()
    }

    fn file_offset_of(&self, es_offset: u64) -> u64 {
        self.file_offset + (es_offset - self.es_offset)
    }
}

/// Byte storage a range table points into.
///
/// `bytes_at` borrows when the request is backed by one contiguous buffer and
/// only allocates when it is not (multi-region seams).
pub trait RangeData {
    fn size(&self) -> u64;

    fn bytes_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>>;

    fn byte_at(&self, offset: u64) -> Option<u8> {
        self.bytes_at(offset, 1).and_then(|b| b.first().copied())
    }
}

impl RangeData for [u8] {
    fn size(&self) -> u64 {
        self.len() as u64
    }

    fn bytes_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(len)?;
        self.get(start..end).map(Cow::Borrowed)
    }

    fn byte_at(&self, offset: u64) -> Option<u8> {
        self.get(usize::try_from(offset).ok()?).copied()
    }
}

/// Standard binary search over ES-ordered, non-overlapping ranges
pub fn binary_search(ranges: &[PesPayloadRange], es_offset: u64) -> Option<usize> {
    let idx = ranges.partition_point(|r| r.es_end() <= es_offset);
    match ranges.get(idx) {
        Some(r) if r.contains(es_offset) => Some(idx),
        _ => None,
    }
}

/// Locates `es_offset` trying `hint`, `hint + 1` and `hint - 1` before the
/// binary search. The matcher reads nearly sequentially in both directions.
pub fn locate_with_hint(ranges: &[PesPayloadRange], es_offset: u64, hint: usize) -> Option<usize> {
    let candidates = [Some(hint), hint.checked_add(1), hint.checked_sub(1)];
    for idx in candidates.into_iter().flatten() {
        if ranges.get(idx).is_some_and(|r| r.contains(es_offset)) {
            return Some(idx);
        }
    }
    binary_search(ranges, es_offset)
}

/// Reads one ES byte. Returns the byte and the range index to pass as the
/// next call's hint.
pub fn read_byte_with_hint<D: RangeData + ?Sized>(
    data: &D,
    ranges: &[PesPayloadRange],
    es_offset: u64,
    hint: usize,
) -> Result<(u8, usize)> {
    let idx = locate_with_hint(ranges, es_offset, hint)
        .ok_or_else(|| Error::bounds(es_offset, total_size(ranges)))?;
    let file_offset = ranges[idx].file_offset_of(es_offset);
    let byte = data
        .byte_at(file_offset)
        .ok_or_else(|| Error::bounds(file_offset, data.size()))?;
    Ok((byte, idx))
}

/// Reads `size` ES bytes starting at `es_offset`. Zero-copy when the span
/// lies inside one range, otherwise the pieces are concatenated.
pub fn read_from_ranges<'a, D: RangeData + ?Sized>(
    data: &'a D,
    ranges: &[PesPayloadRange],
    es_offset: u64,
    size: usize,
) -> Result<Cow<'a, [u8]>> {
    if size == 0 {
        return Ok(Cow::Borrowed(&[]));
    }
    let total = total_size(ranges);
    let end = es_offset
        .checked_add(size as u64)
        .filter(|&end| end <= total)
        .ok_or_else(|| Error::bounds(es_offset.saturating_add(size as u64), total))?;
    let first = binary_search(ranges, es_offset).ok_or_else(|| Error::bounds(es_offset, total))?;

    let r = &ranges[first];
    if end <= r.es_end() {
        let file_offset = r.file_offset_of(es_offset);
        return data
            .bytes_at(file_offset, size)
            .ok_or_else(|| Error::bounds(file_offset + size as u64, data.size()));
    }

    let mut out = Vec::with_capacity(size);
    let mut pos = es_offset;
    for r in &ranges[first..] {
        if pos >= end {
            break;
        }
        if !r.contains(pos) {
            return Err(Error::bounds(pos, total));
        }
        let take = (r.es_end().min(end) - pos) as usize;
        let file_offset = r.file_offset_of(pos);
        let chunk = data
            .bytes_at(file_offset, take)
            .ok_or_else(|| Error::bounds(file_offset + take as u64, data.size()))?;
        out.extend_from_slice(&chunk);
        pos += take as u64;
    }
    Ok(Cow::Owned(out))
}

/// Returns the `(file_offset, size)` fragments backing an ES span without
/// copying any data. Fragments that touch in the file are coalesced.
pub fn raw_ranges_for_region(
    ranges: &[PesPayloadRange],
    es_offset: u64,
    size: u64,
) -> Result<Vec<(u64, u64)>> {
    let total = total_size(ranges);
    if size == 0 {
        return Ok(Vec::new());
    }
    let end = es_offset
        .checked_add(size)
        .filter(|&end| end <= total)
        .ok_or_else(|| Error::bounds(es_offset.saturating_add(size), total))?;
    let first = binary_search(ranges, es_offset).ok_or_else(|| Error::bounds(es_offset, total))?;

    let mut out: Vec<(u64, u64)> = Vec::new();
    let mut pos = es_offset;
    for r in &ranges[first..] {
        if pos >= end {
            break;
        }
        let take = r.es_end().min(end) - pos;
        let file_offset = r.file_offset_of(pos);
        match out.last_mut() {
            Some(last) if last.0 + last.1 == file_offset => last.1 += take,
            _ => out.push((file_offset, take)),
        }
        pos += take;
    }
    Ok(out)
}

pub fn es_offset_to_file_offset(ranges: &[PesPayloadRange], es_offset: u64) -> Result<u64> {
    binary_search(ranges, es_offset)
        .map(|idx| ranges[idx].file_offset_of(es_offset))
        .ok_or_else(|| Error::bounds(es_offset, total_size(ranges)))
}

/// Total ES bytes described by a table
pub fn total_size(ranges: &[PesPayloadRange]) -> u64 {
    ranges.last().map_or(0, |r| r.es_end())
}

/// Merges neighbours that are contiguous in both file and ES offset.
pub fn merge_adjacent_ranges(ranges: &[PesPayloadRange]) -> Vec<PesPayloadRange> {
    let mut out: Vec<PesPayloadRange> = Vec::with_capacity(ranges.len());
    for r in ranges {
        match out.last_mut() {
            Some(last) if last.file_end() == r.file_offset && last.es_end() == r.es_offset => {
                last.size += r.size;
            }
            _ => out.push(*r),
        }
    }
    out
}

/// True when the table starts at ES 0 and has no gaps or overlaps.
pub fn is_well_formed(ranges: &[PesPayloadRange]) -> bool {
    let mut expected = 0u64;
    for r in ranges {
        if r.es_offset != expected || r.size == 0 {
            return false;
        }
        expected = r.es_end();
    }
    true
}

/// Rebuilds a table without the given ES intervals. `excluded` must be sorted
/// and non-overlapping; the output is renumbered from ES offset 0.
pub fn subtract_es_intervals(
    ranges: &[PesPayloadRange],
    excluded: &[(u64, u64)],
) -> Vec<PesPayloadRange> {
    let mut out = RangeBuilder::with_capacity(ranges.len());
    let mut j = 0;
    for r in ranges {
        let end = r.es_end();
        let mut pos = r.es_offset;
        while pos < end {
            while j < excluded.len() && excluded[j].1 <= pos {
                j += 1;
            }
            match excluded.get(j) {
                Some(&(start, stop)) if start < end => {
                    if start > pos {
                        out.push(r.file_offset_of(pos), start - pos);
                    }
                    pos = stop.min(end);
                }
                _ => {
                    out.push(r.file_offset_of(pos), end - pos);
                    pos = end;
                }
            }
        }
    }
    out.finish()
}

/// Accumulates file segments into a table with running ES offsets. Segments
/// that continue the previous one in the file extend it.
#[derive(Debug, Default, Clone)]
pub struct RangeBuilder {
    ranges: Vec<PesPayloadRange>,
    es_len: u64,
}

impl RangeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { ranges: Vec::with_capacity(capacity), es_len: 0 }
    }

    pub fn push(&mut self, file_offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        match self.ranges.last_mut() {
            Some(last) if last.file_end() == file_offset => last.size += size,
            _ => self.ranges.push(PesPayloadRange::new(file_offset, size, self.es_len)),
        }
        self.es_len += size;
    }

    /// Appends without merging into the previous range
    pub fn push_unmerged(&mut self, file_offset: u64, size: u64) {
        if size == 0 {
            return;
        }
        self.ranges.push(PesPayloadRange::new(file_offset, size, self.es_len));
        self.es_len += size;
    }

    pub fn es_len(&self) -> u64 {
        self.es_len
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn finish(self) -> Vec<PesPayloadRange> {
        self.ranges
    }
}
