//! Logical view over a file whose bytes sit in several non-contiguous
//! extents of a disc image.

use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;

use super::IsoPhysicalRange;
use crate::error::{Error, Result};
use crate::ranges::RangeData;

#[derive(Debug, Clone)]
struct Region {
    logical_start: u64,
    physical_offset: u64,
    data: Bytes,
}

impl Region {
    fn logical_end(&self) -> u64 {
        self.logical_start + self.data.len() as u64
    }

    fn contains(&self, logical: u64) -> bool {
        logical >= self.logical_start && logical < self.logical_end()
    }
}

/// Ordered fragments of one backing buffer, addressed as one contiguous
/// logical space starting at 0.
#[derive(Debug)]
pub struct MultiRegionData {
    regions: Vec<Region>,
    len: u64,
    /// Region of the previous lookup. Relaxed: a stale value only costs a
    /// binary search.
    last_region: AtomicUsize,
}

impl MultiRegionData {
    /// Builds the view from `extents` of `backing` (offsets into `backing`).
    pub fn new(backing: &Bytes, extents: &[IsoPhysicalRange]) -> Result<Self> {
        let mut regions = Vec::with_capacity(extents.len());
        let mut logical = 0u64;
        for ext in extents.iter().filter(|e| e.length > 0) {
            let end = ext.offset.checked_add(ext.length).filter(|&end| end <= backing.len() as u64);
            let Some(end) = end else {
                return Err(Error::bounds(ext.offset.saturating_add(ext.length), backing.len() as u64));
            };
            regions.push(Region {
                logical_start: logical,
                physical_offset: ext.offset,
                data: backing.slice(ext.offset as usize..end as usize),
            });
            logical += ext.length;
        }
        Ok(Self { regions, len: logical, last_region: AtomicUsize::new(0) })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub(crate) fn segments(&self) -> impl Iterator<Item = &Bytes> {
        self.regions.iter().map(|r| &r.data)
    }

    fn locate(&self, logical: u64) -> Option<usize> {
        let hint = self.last_region.load(Ordering::Relaxed);
        if self.regions.get(hint).is_some_and(|r| r.contains(logical)) {
            return Some(hint);
        }
        let idx = self.regions.partition_point(|r| r.logical_end() <= logical);
        let found = self.regions.get(idx).filter(|r| r.contains(logical)).map(|_| idx)?;
        self.last_region.store(found, Ordering::Relaxed);
        Some(found)
    }

    pub fn byte_at(&self, logical: u64) -> Option<u8> {
        let r = &self.regions[self.locate(logical)?];
        r.data.get((logical - r.logical_start) as usize).copied()
    }

    /// Bytes `[start, end)` of the logical space. Borrowed unless the span
    /// crosses a region boundary.
    pub fn slice(&self, start: u64, end: u64) -> Result<Cow<'_, [u8]>> {
        if start > end || end > self.len {
            return Err(Error::bounds(end, self.len));
        }
        if start == end {
            return Ok(Cow::Borrowed(&[]));
        }
        let first = self.locate(start).ok_or_else(|| Error::bounds(start, self.len))?;
        let r = &self.regions[first];
        if end <= r.logical_end() {
            let lo = (start - r.logical_start) as usize;
            let hi = (end - r.logical_start) as usize;
            return Ok(Cow::Borrowed(&r.data[lo..hi]));
        }

        let mut out = Vec::with_capacity((end - start) as usize);
        let mut pos = start;
        for r in &self.regions[first..] {
            if pos >= end {
                break;
            }
            let lo = (pos - r.logical_start) as usize;
            let hi = (end.min(r.logical_end()) - r.logical_start) as usize;
            out.extend_from_slice(&r.data[lo..hi]);
            pos = r.logical_start + hi as u64;
        }
        Ok(Cow::Owned(out))
    }

    /// Offset in the backing buffer of a logical offset
    pub fn to_physical(&self, logical: u64) -> Result<u64> {
        let r = &self.regions[self.locate(logical).ok_or_else(|| Error::bounds(logical, self.len))?];
        Ok(r.physical_offset + (logical - r.logical_start))
    }

    /// Physical `(offset, size)` pieces behind a logical span, split where
    /// it crosses a region boundary
    pub fn physical_spans(&self, start: u64, size: u64) -> Result<Vec<(u64, u64)>> {
        let end = start
            .checked_add(size)
            .filter(|&end| end <= self.len)
            .ok_or_else(|| Error::bounds(start.saturating_add(size), self.len))?;
        let mut out = Vec::new();
        let mut pos = start;
        while pos < end {
            let r = &self.regions[self.locate(pos).ok_or_else(|| Error::bounds(pos, self.len))?];
            let take = end.min(r.logical_end()) - pos;
            out.push((r.physical_offset + (pos - r.logical_start), take));
            pos += take;
        }
        Ok(out)
    }
}

impl RangeData for MultiRegionData {
    fn size(&self) -> u64 {
        self.len
    }

    fn bytes_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> {
        let end = offset.checked_add(len as u64)?;
        self.slice(offset, end).ok()
    }

    fn byte_at(&self, offset: u64) -> Option<u8> {
        MultiRegionData::byte_at(self, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> Bytes {
        Bytes::from((0..4096u32).map(|i| (i % 251) as u8).collect::<Vec<_>>())
    }

    fn two_extents() -> MultiRegionData {
        let extents = [IsoPhysicalRange::new(100, 200), IsoPhysicalRange::new(2048, 200)];
        MultiRegionData::new(&image(), &extents).unwrap()
    }

    #[test]
    fn test_logical_space_is_contiguous() {
        let m = two_extents();
        assert_eq!(m.len(), 400);
        assert_eq!(m.region_count(), 2);
        assert_eq!(m.to_physical(0).unwrap(), 100);
        assert_eq!(m.to_physical(199).unwrap(), 299);
        assert_eq!(m.to_physical(200).unwrap(), 2048);
        assert!(m.to_physical(400).is_err());
        assert_eq!(m.physical_spans(190, 20).unwrap(), vec![(290, 10), (2048, 10)]);
        assert_eq!(m.physical_spans(0, 5).unwrap(), vec![(100, 5)]);
        assert!(m.physical_spans(390, 11).is_err());
    }

    #[test]
    fn test_slice_across_boundary() {
        let m = two_extents();
        let img = image();
        let got = m.slice(195, 205).unwrap();
        assert!(matches!(got, Cow::Owned(_)));
        assert_eq!(&got[..5], &img[295..300]);
        assert_eq!(&got[5..], &img[2048..2053]);
        assert!(matches!(m.slice(10, 20).unwrap(), Cow::Borrowed(_)));
        assert!(m.slice(390, 401).is_err());
    }

    #[test]
    fn test_byte_at_with_stale_hint() {
        let m = two_extents();
        let img = image();
        assert_eq!(m.byte_at(399), Some(img[2247]));
        // hint now points at region 1
        assert_eq!(m.byte_at(0), Some(img[100]));
        assert_eq!(m.byte_at(400), None);
    }

    #[test]
    fn test_rejects_extent_past_backing() {
        let extents = [IsoPhysicalRange::new(4000, 200)];
        assert!(MultiRegionData::new(&image(), &extents).is_err());
    }
}
