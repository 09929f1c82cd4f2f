//! Disc image navigation: locating the stream files of a Blu-ray or DVD
//! inside an ISO9660 or UDF image.

pub mod adapter;
pub mod iso9660;
pub mod multi_region;
pub mod udf;

pub use adapter::IsoAdapter;
pub use multi_region::MultiRegionData;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::DiscKind;

/// Byte range inside the disc image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IsoPhysicalRange {
    pub offset: u64,
    pub length: u64,
}

impl IsoPhysicalRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// A stream file located inside a disc image
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IsoFileExtent {
    /// Path inside the image, e.g. `BDMV/STREAM/00000.M2TS`
    pub name: String,
    /// Image offset of the first byte
    pub offset: u64,
    pub size: u64,
    /// `None` when the file is physically contiguous
    pub extents: Option<Vec<IsoPhysicalRange>>,
    pub disc: DiscKind,
}

impl IsoFileExtent {
    /// Builds the record from the extents in file order, trimmed to `size`.
    pub fn from_extents(name: String, size: u64, extents: &[IsoPhysicalRange], disc: DiscKind) -> Result<Self> {
        let mut trimmed = Vec::with_capacity(extents.len());
        let mut remaining = size;
        for e in extents {
            if remaining == 0 {
                break;
            }
            let take = e.length.min(remaining);
            trimmed.push(IsoPhysicalRange::new(e.offset, take));
            remaining -= take;
        }
        if remaining > 0 {
            return Err(Error::format(format!("{name}: extents cover less than {size} bytes")));
        }
        let offset = trimmed.first().map_or(0, |e| e.offset);
        let extents = (!extents_contiguous(&trimmed)).then_some(trimmed);
        Ok(Self { name, offset, size, extents, disc })
    }

    pub fn is_fragmented(&self) -> bool {
        self.extents.is_some()
    }

    /// Physical ranges in file order
    pub fn physical_ranges(&self) -> Vec<IsoPhysicalRange> {
        match &self.extents {
            Some(e) => e.clone(),
            None => vec![IsoPhysicalRange::new(self.offset, self.size)],
        }
    }
}

/// True when each extent starts where the previous one ends
pub fn extents_contiguous(extents: &[IsoPhysicalRange]) -> bool {
    extents.windows(2).all(|w| w[0].end() == w[1].offset)
}

/// Directory entry as reported by a navigator
#[derive(Debug, Clone)]
pub struct FileNode {
    /// Upper-cased, version suffix and trailing dot removed
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub extents: Vec<IsoPhysicalRange>,
}

/// Directory lookup over one filesystem of a disc image
pub trait DiscFilesystem {
    /// Entries of the directory at `path` (upper-case components), or `None`
    /// when it does not exist.
    fn list_dir(&self, path: &[&str]) -> Result<Option<Vec<FileNode>>>;
}

/// Normalizes an on-disc file name for matching
pub fn normalize_name(raw: &str) -> String {
    let base = raw.split(';').next().unwrap_or(raw);
    base.trim_end_matches('.').to_ascii_uppercase()
}

/// `VTS_xx_N.VOB` with N >= 1; `_0` is the title set menu
pub fn is_title_vob(name: &str) -> bool {
    let b = name.as_bytes();
    b.len() == 12
        && name.starts_with("VTS_")
        && b[4].is_ascii_digit()
        && b[5].is_ascii_digit()
        && b[6] == b'_'
        && (b'1'..=b'9').contains(&b[7])
        && name.ends_with(".VOB")
}

/// Finds `BDMV/STREAM/*.M2TS` and `VIDEO_TS/VTS_xx_N.VOB` files.
pub fn find_stream_files<F: DiscFilesystem + ?Sized>(fs: &F) -> Result<Vec<IsoFileExtent>> {
    let mut out = Vec::new();
    if let Some(entries) = fs.list_dir(&["BDMV", "STREAM"])? {
        for e in entries.iter().filter(|e| !e.is_dir && e.name.ends_with(".M2TS")) {
            let path = format!("BDMV/STREAM/{}", e.name);
            out.push(IsoFileExtent::from_extents(path, e.size, &e.extents, DiscKind::BluRay)?);
        }
    }
    if let Some(entries) = fs.list_dir(&["VIDEO_TS"])? {
        for e in entries.iter().filter(|e| !e.is_dir && is_title_vob(&e.name)) {
            let path = format!("VIDEO_TS/{}", e.name);
            out.push(IsoFileExtent::from_extents(path, e.size, &e.extents, DiscKind::Dvd)?);
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Locates stream files in a disc image, ISO9660 first then UDF.
pub fn locate_streams(image: &[u8]) -> Result<Vec<IsoFileExtent>> {
    match iso9660::Iso9660::open(image) {
        Ok(fs) => {
            let found = find_stream_files(&fs)?;
            if !found.is_empty() {
                info!(files = found.len(), "located streams via ISO9660");
                return Ok(found);
            }
            debug!("ISO9660 tree has no stream files, trying UDF");
        }
        Err(e) => debug!(error = %e, "not ISO9660, trying UDF"),
    }
    let fs = udf::Udf::open(image)?;
    let found = find_stream_files(&fs)?;
    info!(files = found.len(), "located streams via UDF");
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("00000.m2ts;1"), "00000.M2TS");
        assert_eq!(normalize_name("STREAM."), "STREAM");
        assert_eq!(normalize_name("VTS_01_1.VOB"), "VTS_01_1.VOB");
    }

    #[test]
    fn test_title_vob_filter() {
        assert!(is_title_vob("VTS_01_1.VOB"));
        assert!(is_title_vob("VTS_12_9.VOB"));
        assert!(!is_title_vob("VTS_01_0.VOB"));
        assert!(!is_title_vob("VIDEO_TS.VOB"));
        assert!(!is_title_vob("VTS_01_1.IFO"));
    }

    #[test]
    fn test_from_extents_contiguity() {
        let contiguous = [IsoPhysicalRange::new(0, 2048), IsoPhysicalRange::new(2048, 2048)];
        let f = IsoFileExtent::from_extents("a".into(), 3000, &contiguous, DiscKind::BluRay).unwrap();
        assert!(!f.is_fragmented());
        assert_eq!(f.physical_ranges(), vec![IsoPhysicalRange::new(0, 3000)]);

        let split = [IsoPhysicalRange::new(100, 200), IsoPhysicalRange::new(2048, 200)];
        let f = IsoFileExtent::from_extents("b".into(), 400, &split, DiscKind::BluRay).unwrap();
        assert_eq!(f.offset, 100);
        assert_eq!(f.extents.as_deref(), Some(&split[..]));

        assert!(IsoFileExtent::from_extents("c".into(), 500, &split, DiscKind::BluRay).is_err());
    }
}
