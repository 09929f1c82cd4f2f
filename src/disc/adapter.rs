//! Presents a stream file inside a disc image with file offsets relative
//! to the image.

use std::borrow::Cow;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use super::{IsoFileExtent, MultiRegionData};
use crate::es::{EsReader, StreamTables};
use crate::error::{Error, Result};
use crate::ranges::RangeData;
use crate::source::SourceView;
use crate::types::{Codec, SubStream};

/// Where the wrapped file sits in the image
enum Placement {
    Contiguous { base: u64 },
    Fragmented(Arc<MultiRegionData>),
}

/// Wraps a reader whose offsets are relative to an embedded file. Reads go
/// straight to the inner reader; file offsets come back as image offsets.
pub struct IsoAdapter<R> {
    inner: R,
    placement: Placement,
}

impl<R: EsReader> IsoAdapter<R> {
    pub fn contiguous(inner: R, base: u64) -> Self {
        Self { inner, placement: Placement::Contiguous { base } }
    }

    pub fn fragmented(inner: R, regions: Arc<MultiRegionData>) -> Self {
        Self { inner, placement: Placement::Fragmented(regions) }
    }

    /// Maps `file` out of `image` and runs `demux` over it
    pub fn open<F>(image: &Bytes, file: &IsoFileExtent, demux: F) -> Result<Self>
    where
        F: FnOnce(SourceView) -> Result<R>,
    {
        if file.is_fragmented() {
            let regions = Arc::new(MultiRegionData::new(image, &file.physical_ranges())?);
            debug!(file = %file.name, regions = regions.region_count(), "opening fragmented stream");
            let inner = demux(SourceView::Fragmented(regions.clone()))?;
            return Ok(Self::fragmented(inner, regions));
        }
        let end = file
            .offset
            .checked_add(file.size)
            .filter(|&end| end <= image.len() as u64)
            .ok_or_else(|| Error::bounds(file.offset.saturating_add(file.size), image.len() as u64))?;
        let inner = demux(SourceView::Contiguous(image.slice(file.offset as usize..end as usize)))?;
        Ok(Self::contiguous(inner, file.offset))
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn to_image(&self, offset: u64) -> Result<u64> {
        match &self.placement {
            Placement::Contiguous { base } => Ok(base + offset),
            Placement::Fragmented(regions) => regions.to_physical(offset),
        }
    }

    fn fragments_to_image(&self, fragments: Vec<(u64, u64)>) -> Result<Vec<(u64, u64)>> {
        match &self.placement {
            Placement::Contiguous { base } => Ok(fragments.into_iter().map(|(o, n)| (base + o, n)).collect()),
            Placement::Fragmented(regions) => {
                let mut out: Vec<(u64, u64)> = Vec::with_capacity(fragments.len());
                for (offset, size) in fragments {
                    for (phys, n) in regions.physical_spans(offset, size)? {
                        match out.last_mut() {
                            Some(last) if last.0 + last.1 == phys => last.1 += n,
                            _ => out.push((phys, n)),
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}

impl<R: EsReader> EsReader for IsoAdapter<R> {
    fn tables(&self) -> &StreamTables {
        self.inner.tables()
    }

    fn data(&self) -> &dyn RangeData {
        self.inner.data()
    }

    fn video_codec(&self) -> Option<Codec> {
        self.inner.video_codec()
    }

    fn read_es_data(&self, es_offset: u64, size: usize, is_video: bool) -> Result<Cow<'_, [u8]>> {
        self.inner.read_es_data(es_offset, size, is_video)
    }

    fn es_offset_to_file_offset(&self, es_offset: u64, is_video: bool) -> Result<u64> {
        self.to_image(self.inner.es_offset_to_file_offset(es_offset, is_video)?)
    }

    fn total_es_size(&self, is_video: bool) -> u64 {
        self.inner.total_es_size(is_video)
    }

    fn audio_sub_streams(&self) -> Vec<SubStream> {
        self.inner.audio_sub_streams()
    }

    fn audio_sub_stream_es_size(&self, id: u8) -> Result<u64> {
        self.inner.audio_sub_stream_es_size(id)
    }

    fn read_audio_substream_data(&self, id: u8, es_offset: u64, size: usize) -> Result<Cow<'_, [u8]>> {
        self.inner.read_audio_substream_data(id, es_offset, size)
    }

    fn audio_substream_es_to_file_offset(&self, id: u8, es_offset: u64) -> Result<u64> {
        self.to_image(self.inner.audio_substream_es_to_file_offset(id, es_offset)?)
    }

    fn raw_ranges_for_region(&self, sub_stream: Option<u8>, es_offset: u64, size: u64) -> Result<Vec<(u64, u64)>> {
        let fragments = self.inner.raw_ranges_for_region(sub_stream, es_offset, size)?;
        self.fragments_to_image(fragments)
    }

    fn checksum(&self) -> Option<u64> {
        self.inner.checksum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECTOR_SIZE;
    use crate::disc::IsoPhysicalRange;
    use crate::test_support::build_basic_m2ts_data;
    use crate::ts::TsDemuxer;
    use crate::types::DiscKind;

    const BASE: usize = 4 * SECTOR_SIZE;

    fn embedded(split_at: Option<usize>) -> (Bytes, IsoFileExtent) {
        let m2ts = build_basic_m2ts_data();
        let mut image = vec![0xEEu8; 16 * SECTOR_SIZE];
        let extents = match split_at {
            None => {
                image[BASE..BASE + m2ts.len()].copy_from_slice(&m2ts);
                vec![IsoPhysicalRange::new(BASE as u64, m2ts.len() as u64)]
            }
            Some(cut) => {
                // second half placed before the first
                let second = 2 * SECTOR_SIZE;
                image[BASE..BASE + cut].copy_from_slice(&m2ts[..cut]);
                image[second..second + m2ts.len() - cut].copy_from_slice(&m2ts[cut..]);
                vec![
                    IsoPhysicalRange::new(BASE as u64, cut as u64),
                    IsoPhysicalRange::new(second as u64, (m2ts.len() - cut) as u64),
                ]
            }
        };
        let file = IsoFileExtent::from_extents("BDMV/STREAM/00000.M2TS".into(), m2ts.len() as u64, &extents, DiscKind::BluRay)
            .unwrap();
        (Bytes::from(image), file)
    }

    #[test]
    fn test_contiguous_offsets_are_image_offsets() {
        let (image, file) = embedded(None);
        let r = IsoAdapter::open(&image, &file, TsDemuxer::open).unwrap();
        assert_eq!(r.total_es_size(true), 534);
        for es in [0u64, 170, 533] {
            let off = r.es_offset_to_file_offset(es, true).unwrap() as usize;
            assert!(off >= BASE);
            assert_eq!(image[off], es as u8);
        }
        let inner = r.inner().es_offset_to_file_offset(0, true).unwrap();
        assert_eq!(r.es_offset_to_file_offset(0, true).unwrap(), inner + BASE as u64);
    }

    #[test]
    fn test_fragmented_regions_split_at_seams() {
        // the cut lands inside the second video packet's payload
        let cut = 3 * 192 + 100;
        let (image, file) = embedded(Some(cut));
        assert!(file.is_fragmented());
        let r = IsoAdapter::open(&image, &file, TsDemuxer::open).unwrap();
        assert_eq!(r.total_es_size(true), 534);
        assert_eq!(&r.read_es_data(173, 4, true).unwrap()[..], &[173, 174, 175, 176]);

        let es_total = r.total_es_size(true);
        let fragments = r.raw_ranges_for_region(None, 0, es_total).unwrap();
        assert_eq!(fragments.iter().map(|f| f.1).sum::<u64>(), es_total);
        let mut es = 0u64;
        for (offset, size) in fragments {
            for i in 0..size {
                assert_eq!(image[(offset + i) as usize], (es + i) as u8);
            }
            es += size;
        }
        let audio = r.audio_substream_es_to_file_offset(0, 0).unwrap();
        assert!(audio < BASE as u64);
    }
}
