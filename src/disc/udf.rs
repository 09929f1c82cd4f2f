//! UDF (ECMA-167 / OSTA UDF 1.02-2.60) directory navigation.
//!
//! Supports physical, sparable (read as physical) and metadata partitions.
//! The metadata file is read once through its physical partition and kept
//! in memory; directories and file entries addressed through the metadata
//! partition are read from that copy.

use std::borrow::Cow;

use tracing::{debug, trace};

use super::{normalize_name, DiscFilesystem, FileNode, IsoPhysicalRange};
use crate::constants::{SECTOR_SIZE, UDF_AVDP_SECTOR, UDF_MAX_DIR_READ};
use crate::error::{Error, Result};
use crate::parsers::{le_u16, le_u32, le_u64};

const TAG_AVDP: u16 = 2;
const TAG_PARTITION: u16 = 5;
const TAG_LOGICAL_VOLUME: u16 = 6;
const TAG_TERMINATOR: u16 = 8;
const TAG_FSD: u16 = 256;
const TAG_FID: u16 = 257;
const TAG_ALLOC_EXTENT: u16 = 258;
const TAG_FILE_ENTRY: u16 = 261;
const TAG_EXT_FILE_ENTRY: u16 = 266;

const FILE_TYPE_DIRECTORY: u8 = 4;
const FID_DELETED: u8 = 0x04;
const FID_PARENT: u8 = 0x08;
const FID_DIRECTORY: u8 = 0x02;

const EXTENT_RECORDED: u32 = 0;
const EXTENT_CONTINUATION: u32 = 3;
/// Guards against allocation extent loops
const MAX_AD_CONTINUATIONS: usize = 64;
const MAX_VDS_SECTORS: u32 = 64;

/// Verifies the descriptor tag checksum and returns the tag identifier.
fn tag_id(d: &[u8]) -> Result<u16> {
    let tag = d.get(..16).ok_or(Error::Truncation { what: "UDF descriptor tag", need: 16, have: d.len() })?;
    let sum = tag
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != 4)
        .fold(0u8, |acc, (_, &b)| acc.wrapping_add(b));
    if sum != tag[4] {
        return Err(Error::format("UDF descriptor tag checksum mismatch"));
    }
    Ok(u16::from_le_bytes([tag[0], tag[1]]))
}

fn expect_tag(d: &[u8], want: u16) -> Result<()> {
    let got = tag_id(d)?;
    if got != want {
        return Err(Error::format(format!("expected UDF tag {want}, found {got}")));
    }
    Ok(())
}

fn field_u32(d: &[u8], at: usize) -> Result<u32> {
    le_u32(d, at).ok_or(Error::Truncation { what: "UDF descriptor", need: at + 4, have: d.len() })
}

fn field_u16(d: &[u8], at: usize) -> Result<u16> {
    le_u16(d, at).ok_or(Error::Truncation { what: "UDF descriptor", need: at + 2, have: d.len() })
}

/// Location part of a `long_ad`; the length is not needed for ICBs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LongAd {
    lbn: u32,
    partition: u16,
}

impl LongAd {
    fn parse(d: &[u8], at: usize) -> Result<Self> {
        Ok(Self {
            lbn: field_u32(d, at + 4)?,
            partition: field_u16(d, at + 8)?,
        })
    }
}

#[derive(Debug)]
enum Partition {
    Physical { start: u64 },
    /// Metadata file contents plus the physical partition it lives in
    Metadata { physical_start: u64, cache: Vec<u8> },
}

/// Recorded extent as addressed by an allocation descriptor
#[derive(Debug, Clone, Copy)]
struct UdfExtent {
    partition: u16,
    lbn: u32,
    length: u32,
}

/// Where a file's bytes are
enum FileData {
    Extents(Vec<UdfExtent>),
    Embedded(Vec<u8>),
}

struct FileEntry {
    is_dir: bool,
    size: u64,
    data: FileData,
}

struct DirEntry {
    name: String,
    is_dir: bool,
    icb: LongAd,
}

pub struct Udf<'a> {
    image: &'a [u8],
    block_size: u64,
    partitions: Vec<Partition>,
    root: LongAd,
}

/// True when the volume recognition sequence (sectors 16-31) has `BEA01`
/// followed by `NSR02` or `NSR03`.
pub fn is_udf(image: &[u8]) -> bool {
    let mut bea = false;
    for sector in 16..32 {
        let at = sector * SECTOR_SIZE;
        let Some(id) = image.get(at + 1..at + 6) else { break };
        match id {
            b"BEA01" => bea = true,
            b"NSR02" | b"NSR03" if bea => return true,
            _ => {}
        }
    }
    false
}

impl<'a> Udf<'a> {
    pub fn open(image: &'a [u8]) -> Result<Self> {
        if !is_udf(image) {
            return Err(Error::format("no UDF volume recognition sequence"));
        }
        let avdp = sector(image, UDF_AVDP_SECTOR as u64)?;
        expect_tag(avdp, TAG_AVDP)?;
        let vds_len = field_u32(avdp, 16)?;
        let vds_loc = field_u32(avdp, 20)?;

        let mut part_descs: Vec<(u16, u64)> = Vec::new();
        let mut lvd: Option<&[u8]> = None;
        let sectors = (vds_len as usize).div_ceil(SECTOR_SIZE).min(MAX_VDS_SECTORS as usize) as u32;
        for i in 0..sectors {
            let d = sector(image, (vds_loc + i) as u64)?;
            match tag_id(d) {
                Ok(TAG_PARTITION) => part_descs.push((field_u16(d, 22)?, field_u32(d, 188)? as u64)),
                Ok(TAG_LOGICAL_VOLUME) => lvd = Some(d),
                Ok(TAG_TERMINATOR) => break,
                _ => {}
            }
        }
        let lvd = lvd.ok_or_else(|| Error::format("UDF volume has no logical volume descriptor"))?;
        let block_size = field_u32(lvd, 212)? as u64;
        if block_size != SECTOR_SIZE as u64 {
            return Err(Error::format(format!("unsupported UDF block size {block_size}")));
        }
        let fsd_ad = LongAd::parse(lvd, 248)?;

        let partition_start = |number: u16| -> Result<u64> {
            part_descs
                .iter()
                .find(|(n, _)| *n == number)
                .map(|&(_, start)| start * block_size)
                .ok_or_else(|| Error::format(format!("no partition descriptor for partition {number}")))
        };

        let map_count = field_u32(lvd, 268)?;
        let mut pos = 440usize;
        let mut partitions = Vec::with_capacity(map_count.min(8) as usize);
        for _ in 0..map_count {
            let kind = *lvd.get(pos).ok_or(Error::Truncation { what: "UDF partition map", need: pos + 1, have: lvd.len() })?;
            let len = *lvd.get(pos + 1).ok_or(Error::Truncation { what: "UDF partition map", need: pos + 2, have: lvd.len() })? as usize;
            let map = lvd.get(pos..pos + len).ok_or(Error::Truncation { what: "UDF partition map", need: pos + len, have: lvd.len() })?;
            match kind {
                1 => partitions.push(Partition::Physical { start: partition_start(field_u16(map, 4)?)? }),
                2 => {
                    let ident = map.get(5..28).unwrap_or_default();
                    if ident.starts_with(b"*UDF Metadata Partition") {
                        let physical_start = partition_start(field_u16(map, 38)?)?;
                        let location = field_u32(map, 40)?;
                        let cache = read_metadata_file(image, physical_start, location)?;
                        debug!(bytes = cache.len(), "cached UDF metadata file");
                        partitions.push(Partition::Metadata { physical_start, cache });
                    } else if ident.starts_with(b"*UDF Sparable Partition") {
                        partitions.push(Partition::Physical { start: partition_start(field_u16(map, 38)?)? });
                    } else if ident.starts_with(b"*UDF Virtual Partition") {
                        return Err(Error::format("UDF virtual partitions are not supported"));
                    } else {
                        return Err(Error::format("unknown UDF type 2 partition map"));
                    }
                }
                _ => return Err(Error::format(format!("unknown UDF partition map type {kind}"))),
            }
            pos += len.max(2);
        }

        let mut udf = Self { image, block_size, partitions, root: fsd_ad };
        let root = {
            let fsd = udf.block(fsd_ad.partition, fsd_ad.lbn, SECTOR_SIZE)?;
            expect_tag(&fsd, TAG_FSD)?;
            LongAd::parse(&fsd, 400)?
        };
        udf.root = root;
        Ok(udf)
    }

    /// `len` bytes at a logical block of a partition
    fn block(&self, partition: u16, lbn: u32, len: usize) -> Result<Cow<'_, [u8]>> {
        let offset = lbn as u64 * self.block_size;
        let (data, start): (&[u8], u64) = match self.partitions.get(partition as usize) {
            Some(Partition::Physical { start }) => (self.image, start + offset),
            Some(Partition::Metadata { cache, .. }) => (cache.as_slice(), offset),
            None => return Err(Error::format(format!("UDF partition reference {partition} out of range"))),
        };
        let start = start as usize;
        data.get(start..start.saturating_add(len))
            .map(Cow::Borrowed)
            .ok_or_else(|| Error::bounds(start as u64 + len as u64, data.len() as u64))
    }

    /// Image offset of a data block. Metadata partition references resolve
    /// against the partition backing the metadata file.
    fn physical_offset(&self, partition: u16, lbn: u32) -> Result<u64> {
        let start = match self.partitions.get(partition as usize) {
            Some(Partition::Physical { start }) => *start,
            Some(Partition::Metadata { physical_start, .. }) => *physical_start,
            None => return Err(Error::format(format!("UDF partition reference {partition} out of range"))),
        };
        Ok(start + lbn as u64 * self.block_size)
    }

    fn read_file_entry(&self, icb: LongAd) -> Result<FileEntry> {
        let fe = self.block(icb.partition, icb.lbn, SECTOR_SIZE)?;
        let (l_ea_at, base) = match tag_id(&fe)? {
            TAG_FILE_ENTRY => (168, 176),
            TAG_EXT_FILE_ENTRY => (208, 216),
            other => return Err(Error::format(format!("expected UDF file entry, found tag {other}"))),
        };
        let is_dir = fe[27] == FILE_TYPE_DIRECTORY;
        let ad_type = field_u16(&fe, 34)? & 0x07;
        let size = le_u64(&fe, 56).ok_or(Error::Truncation { what: "UDF file entry", need: 64, have: fe.len() })?;
        let l_ea = field_u32(&fe, l_ea_at)? as usize;
        let l_ad = field_u32(&fe, l_ea_at + 4)? as usize;
        let start = base + l_ea;
        let ads = fe
            .get(start..start + l_ad)
            .ok_or(Error::Truncation { what: "UDF allocation descriptors", need: start + l_ad, have: fe.len() })?;

        let data = match ad_type {
            0 | 1 => FileData::Extents(self.collect_extents(ads, ad_type, icb.partition)?),
            3 => FileData::Embedded(ads.get(..size as usize).unwrap_or(ads).to_vec()),
            other => return Err(Error::format(format!("unsupported UDF allocation type {other}"))),
        };
        Ok(FileEntry { is_dir, size, data })
    }

    /// Walks short_ad (type 0) or long_ad (type 1) lists, following
    /// allocation extent continuations.
    fn collect_extents(&self, ads: &[u8], ad_type: u16, fe_partition: u16) -> Result<Vec<UdfExtent>> {
        let ad_len = if ad_type == 0 { 8 } else { 16 };
        let mut out = Vec::new();
        let mut list = ads.to_vec();
        for _ in 0..=MAX_AD_CONTINUATIONS {
            let mut next = None;
            for ad in list.chunks_exact(ad_len) {
                let raw_len = field_u32(ad, 0)?;
                let (extent_type, length) = (raw_len >> 30, raw_len & 0x3FFF_FFFF);
                if length == 0 {
                    break;
                }
                let lbn = field_u32(ad, 4)?;
                let partition = if ad_type == 0 { fe_partition } else { field_u16(ad, 8)? };
                match extent_type {
                    EXTENT_RECORDED => out.push(UdfExtent { partition, lbn, length }),
                    EXTENT_CONTINUATION => {
                        let aed = self.block(partition, lbn, length as usize)?;
                        expect_tag(&aed, TAG_ALLOC_EXTENT)?;
                        let l_ad = field_u32(&aed, 20)? as usize;
                        let ads = aed
                            .get(24..24 + l_ad)
                            .ok_or(Error::Truncation { what: "UDF allocation extent", need: 24 + l_ad, have: aed.len() })?;
                        next = Some(ads.to_vec());
                        break;
                    }
                    _ => return Err(Error::format("unrecorded UDF extents are not supported")),
                }
            }
            match next {
                Some(n) => list = n,
                None => return Ok(out),
            }
        }
        Err(Error::format("too many UDF allocation extent continuations"))
    }

    /// Reads up to `cap` bytes of a file through the partitions its
    /// descriptors name, so metadata-partition directories come from the
    /// cached metadata file.
    fn read_file_bytes(&self, entry: &FileEntry, cap: usize) -> Result<Vec<u8>> {
        match &entry.data {
            FileData::Embedded(d) => Ok(d.clone()),
            FileData::Extents(extents) => {
                let want = (entry.size as usize).min(cap);
                let mut out = Vec::with_capacity(want);
                for e in extents {
                    if out.len() >= want {
                        break;
                    }
                    let take = (e.length as usize).min(want - out.len());
                    out.extend_from_slice(&self.block(e.partition, e.lbn, take)?);
                }
                Ok(out)
            }
        }
    }

    fn read_directory(&self, icb: LongAd) -> Result<Vec<DirEntry>> {
        let fe = self.read_file_entry(icb)?;
        if !fe.is_dir {
            return Err(Error::format("UDF ICB is not a directory"));
        }
        let data = self.read_file_bytes(&fe, UDF_MAX_DIR_READ)?;
        let entries = parse_fids(&data)?;
        trace!(entries = entries.len(), lbn = icb.lbn, "read UDF directory");
        Ok(entries)
    }

    /// Image ranges of a file's data
    fn physical_extents(&self, extents: &[UdfExtent]) -> Result<Vec<IsoPhysicalRange>> {
        extents
            .iter()
            .map(|e| Ok(IsoPhysicalRange::new(self.physical_offset(e.partition, e.lbn)?, e.length as u64)))
            .collect()
    }
}

/// Reads the metadata file whose File Entry sits at `location` in the
/// physical partition starting at `physical_start`.
fn read_metadata_file(image: &[u8], physical_start: u64, location: u32) -> Result<Vec<u8>> {
    let at = physical_start + location as u64 * SECTOR_SIZE as u64;
    let fe = image
        .get(at as usize..at as usize + SECTOR_SIZE)
        .ok_or_else(|| Error::bounds(at + SECTOR_SIZE as u64, image.len() as u64))?;
    let (l_ea_at, base) = match tag_id(fe)? {
        TAG_FILE_ENTRY => (168, 176),
        TAG_EXT_FILE_ENTRY => (208, 216),
        other => return Err(Error::format(format!("metadata file entry has tag {other}"))),
    };
    let size = le_u64(fe, 56).unwrap_or(0) as usize;
    let l_ea = field_u32(fe, l_ea_at)? as usize;
    let l_ad = field_u32(fe, l_ea_at + 4)? as usize;
    let ads = fe
        .get(base + l_ea..base + l_ea + l_ad)
        .ok_or(Error::Truncation { what: "metadata file ADs", need: base + l_ea + l_ad, have: fe.len() })?;
    let short = field_u16(fe, 34)? & 0x07 == 0;
    let ad_len = if short { 8 } else { 16 };

    let mut recorded = 0usize;
    for ad in ads.chunks_exact(ad_len) {
        let length = (field_u32(ad, 0)? & 0x3FFF_FFFF) as usize;
        if length == 0 {
            break;
        }
        recorded += length;
    }
    if size > recorded.min(image.len()) {
        return Err(Error::format(format!(
            "metadata file claims {size} bytes but its extents hold {recorded}"
        )));
    }

    let mut out = Vec::with_capacity(size);
    for ad in ads.chunks_exact(ad_len) {
        let length = (field_u32(ad, 0)? & 0x3FFF_FFFF) as usize;
        if length == 0 || out.len() >= size {
            break;
        }
        let start = (physical_start + field_u32(ad, 4)? as u64 * SECTOR_SIZE as u64) as usize;
        let chunk = image
            .get(start..start + length)
            .ok_or_else(|| Error::bounds((start + length) as u64, image.len() as u64))?;
        out.extend_from_slice(chunk);
    }
    out.truncate(size);
    Ok(out)
}

fn parse_fids(data: &[u8]) -> Result<Vec<DirEntry>> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    while pos + 38 <= data.len() {
        let fid = &data[pos..];
        if tag_id(fid)? != TAG_FID {
            break;
        }
        let characteristics = fid[18];
        let l_fi = fid[19] as usize;
        let icb = LongAd::parse(fid, 20)?;
        let l_iu = field_u16(fid, 36)? as usize;
        let name_at = 38 + l_iu;
        let raw = fid
            .get(name_at..name_at + l_fi)
            .ok_or(Error::Truncation { what: "UDF file identifier", need: name_at + l_fi, have: fid.len() })?;
        pos += (name_at + l_fi).div_ceil(4) * 4;

        if characteristics & (FID_PARENT | FID_DELETED) != 0 {
            continue;
        }
        out.push(DirEntry {
            name: normalize_name(&decode_dstring(raw)),
            is_dir: characteristics & FID_DIRECTORY != 0,
            icb,
        });
    }
    Ok(out)
}

/// OSTA compressed Unicode: compression id 8 (one byte per char) or 16
/// (big-endian UTF-16)
fn decode_dstring(raw: &[u8]) -> String {
    match raw.split_first() {
        Some((8, rest)) => rest.iter().map(|&b| b as char).collect(),
        Some((16, rest)) => {
            let units: Vec<u16> = rest.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect();
            String::from_utf16_lossy(&units)
        }
        _ => String::new(),
    }
}

fn sector(image: &[u8], n: u64) -> Result<&[u8]> {
    let at = n as usize * SECTOR_SIZE;
    image
        .get(at..at + SECTOR_SIZE)
        .ok_or(Error::Truncation { what: "UDF sector", need: at + SECTOR_SIZE, have: image.len() })
}

impl DiscFilesystem for Udf<'_> {
    fn list_dir(&self, path: &[&str]) -> Result<Option<Vec<FileNode>>> {
        let mut entries = self.read_directory(self.root)?;
        for component in path {
            let Some(dir) = entries.iter().find(|e| e.is_dir && e.name == *component) else {
                return Ok(None);
            };
            entries = self.read_directory(dir.icb)?;
        }
        let mut nodes = Vec::with_capacity(entries.len());
        for e in entries {
            if e.is_dir {
                nodes.push(FileNode { name: e.name, is_dir: true, size: 0, extents: Vec::new() });
                continue;
            }
            let fe = self.read_file_entry(e.icb)?;
            let extents = match &fe.data {
                FileData::Extents(x) => self.physical_extents(x)?,
                // too small to be a stream
                FileData::Embedded(_) => Vec::new(),
            };
            nodes.push(FileNode { name: e.name, is_dir: false, size: fe.size, extents });
        }
        Ok(Some(nodes))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::disc::find_stream_files;

    const PART_START: usize = 64;

    fn set_tag(d: &mut [u8], id: u16) {
        d[0..2].copy_from_slice(&id.to_le_bytes());
        d[2] = 2;
        let sum = d[..16]
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != 4)
            .fold(0u8, |acc, (_, &b)| acc.wrapping_add(b));
        d[4] = sum;
    }

    fn long_ad(d: &mut [u8], at: usize, len: u32, lbn: u32, part: u16) {
        d[at..at + 4].copy_from_slice(&len.to_le_bytes());
        d[at + 4..at + 8].copy_from_slice(&lbn.to_le_bytes());
        d[at + 8..at + 10].copy_from_slice(&part.to_le_bytes());
    }

    fn short_ad(len: u32, lbn: u32) -> Vec<u8> {
        [len.to_le_bytes(), lbn.to_le_bytes()].concat()
    }

    fn fid(name: &str, icb_lbn: u32, part: u16, characteristics: u8) -> Vec<u8> {
        let l_fi = if name.is_empty() { 0 } else { name.len() + 1 };
        let len = (38 + l_fi).div_ceil(4) * 4;
        let mut d = vec![0u8; len];
        d[18] = characteristics;
        d[19] = l_fi as u8;
        long_ad(&mut d, 20, 2048, icb_lbn, part);
        if l_fi > 0 {
            d[38] = 8;
            d[39..39 + name.len()].copy_from_slice(name.as_bytes());
        }
        set_tag(&mut d, TAG_FID);
        d
    }

    fn file_entry(tag: u16, file_type: u8, ad_type: u16, info_len: u64, ads: &[u8]) -> Vec<u8> {
        let mut d = vec![0u8; SECTOR_SIZE];
        d[27] = file_type;
        d[34..36].copy_from_slice(&ad_type.to_le_bytes());
        d[56..64].copy_from_slice(&info_len.to_le_bytes());
        let (l_ea_at, base) = if tag == TAG_FILE_ENTRY { (168, 176) } else { (208, 216) };
        d[l_ea_at + 4..l_ea_at + 8].copy_from_slice(&(ads.len() as u32).to_le_bytes());
        d[base..base + ads.len()].copy_from_slice(ads);
        set_tag(&mut d, tag);
        d
    }

    struct Builder {
        img: Vec<u8>,
        /// metadata blocks are stored from this physical lbn when set
        meta_base: Option<u32>,
    }

    impl Builder {
        fn put_phys(&mut self, lbn: u32, data: &[u8]) {
            let at = (PART_START + lbn as usize) * SECTOR_SIZE;
            self.img[at..at + data.len()].copy_from_slice(data);
        }

        /// Block in the partition that holds file system structures
        fn put_meta(&mut self, lbn: u32, data: &[u8]) {
            let phys = self.meta_base.map_or(lbn, |base| base + lbn);
            self.put_phys(phys, data);
        }

        fn meta_part(&self) -> u16 {
            if self.meta_base.is_some() { 1 } else { 0 }
        }
    }

    /// UDF image with BDMV/STREAM/00000.M2TS split over two extents at
    /// physical lbns 50 and 60. With `metadata`, directories and file
    /// entries live in a metadata partition.
    pub(crate) fn bluray_udf(metadata: bool) -> Vec<u8> {
        let mut b = Builder { img: vec![0u8; 300 * SECTOR_SIZE], meta_base: metadata.then_some(30) };
        for (i, id) in [b"BEA01", b"NSR03", b"TEA01"].iter().enumerate() {
            let at = (16 + i) * SECTOR_SIZE;
            b.img[at + 1..at + 6].copy_from_slice(*id);
        }

        let mut avdp = vec![0u8; SECTOR_SIZE];
        avdp[16..20].copy_from_slice(&(3 * SECTOR_SIZE as u32).to_le_bytes());
        avdp[20..24].copy_from_slice(&32u32.to_le_bytes());
        set_tag(&mut avdp, TAG_AVDP);
        b.img[UDF_AVDP_SECTOR * SECTOR_SIZE..(UDF_AVDP_SECTOR + 1) * SECTOR_SIZE].copy_from_slice(&avdp);

        let mut pd = vec![0u8; SECTOR_SIZE];
        pd[22..24].copy_from_slice(&0u16.to_le_bytes());
        pd[188..192].copy_from_slice(&(PART_START as u32).to_le_bytes());
        pd[192..196].copy_from_slice(&150u32.to_le_bytes());
        set_tag(&mut pd, TAG_PARTITION);
        b.img[32 * SECTOR_SIZE..33 * SECTOR_SIZE].copy_from_slice(&pd);

        let mut lvd = vec![0u8; SECTOR_SIZE];
        lvd[212..216].copy_from_slice(&2048u32.to_le_bytes());
        long_ad(&mut lvd, 248, 2048, 0, b.meta_part());
        lvd[440..446].copy_from_slice(&[1, 6, 1, 0, 0, 0]);
        if metadata {
            lvd[268..272].copy_from_slice(&2u32.to_le_bytes());
            let map = &mut lvd[446..446 + 64];
            map[0] = 2;
            map[1] = 64;
            map[5..5 + 23].copy_from_slice(b"*UDF Metadata Partition");
            map[38..40].copy_from_slice(&0u16.to_le_bytes());
            map[40..44].copy_from_slice(&29u32.to_le_bytes());
        } else {
            lvd[268..272].copy_from_slice(&1u32.to_le_bytes());
        }
        set_tag(&mut lvd, TAG_LOGICAL_VOLUME);
        b.img[33 * SECTOR_SIZE..34 * SECTOR_SIZE].copy_from_slice(&lvd);
        let mut term = vec![0u8; SECTOR_SIZE];
        set_tag(&mut term, TAG_TERMINATOR);
        b.img[34 * SECTOR_SIZE..35 * SECTOR_SIZE].copy_from_slice(&term);

        if metadata {
            // metadata file: 8 blocks starting at physical lbn 30
            let fe = file_entry(TAG_FILE_ENTRY, 250, 0, 8 * 2048, &short_ad(8 * 2048, 30));
            b.put_phys(29, &fe);
        }

        let mp = b.meta_part();
        let mut fsd = vec![0u8; SECTOR_SIZE];
        long_ad(&mut fsd, 400, 2048, 1, mp);
        set_tag(&mut fsd, TAG_FSD);
        b.put_meta(0, &fsd);

        // root: embedded FIDs
        let root_fids = [fid("", 0, mp, FID_PARENT | FID_DIRECTORY), fid("BDMV", 2, mp, FID_DIRECTORY)].concat();
        b.put_meta(1, &file_entry(TAG_FILE_ENTRY, FILE_TYPE_DIRECTORY, 3, root_fids.len() as u64, &root_fids));

        // BDMV: short_ad to a directory block
        let bdmv_fids = [fid("", 1, mp, FID_PARENT | FID_DIRECTORY), fid("STREAM", 4, mp, FID_DIRECTORY)].concat();
        b.put_meta(2, &file_entry(TAG_FILE_ENTRY, FILE_TYPE_DIRECTORY, 0, bdmv_fids.len() as u64, &short_ad(bdmv_fids.len() as u32, 3)));
        b.put_meta(3, &bdmv_fids);

        // STREAM: extended file entry with a long_ad
        let stream_fids = [fid("", 2, mp, FID_PARENT | FID_DIRECTORY), fid("00000.m2ts", 6, mp, 0)].concat();
        let mut lad = vec![0u8; 16];
        long_ad(&mut lad, 0, stream_fids.len() as u32, 5, mp);
        b.put_meta(4, &file_entry(TAG_EXT_FILE_ENTRY, FILE_TYPE_DIRECTORY, 1, stream_fids.len() as u64, &lad));
        b.put_meta(5, &stream_fids);

        // the stream itself: two recorded extents in the physical partition
        let ads = [short_ad(4096, 50), short_ad(904, 60)].concat();
        b.put_meta(6, &file_entry(TAG_FILE_ENTRY, 5, 0, 5000, &ads));
        b.img
    }

    #[test]
    fn test_detects_recognition_sequence() {
        assert!(is_udf(&bluray_udf(false)));
        assert!(!is_udf(&vec![0u8; 40 * SECTOR_SIZE]));
    }

    #[test]
    fn test_resolves_stream_file() {
        for metadata in [false, true] {
            let img = bluray_udf(metadata);
            let fs = Udf::open(&img).unwrap();
            let files = find_stream_files(&fs).unwrap();
            assert_eq!(files.len(), 1, "metadata={metadata}");
            let f = &files[0];
            assert_eq!(f.name, "BDMV/STREAM/00000.M2TS");
            assert_eq!(f.size, 5000);
            let part = (PART_START * SECTOR_SIZE) as u64;
            assert_eq!(
                f.extents.as_deref(),
                Some(&[IsoPhysicalRange::new(part + 50 * 2048, 4096), IsoPhysicalRange::new(part + 60 * 2048, 904)][..])
            );
        }
    }

    #[test]
    fn test_bad_tag_checksum() {
        let mut img = bluray_udf(false);
        img[UDF_AVDP_SECTOR * SECTOR_SIZE + 4] ^= 0xFF;
        assert!(Udf::open(&img).is_err());
    }

    #[test]
    fn test_oversized_metadata_file_is_rejected() {
        let fe = (PART_START + 29) * SECTOR_SIZE;
        for claimed in [u64::MAX, 9 * 2048] {
            let mut img = bluray_udf(true);
            img[fe + 56..fe + 64].copy_from_slice(&claimed.to_le_bytes());
            assert!(matches!(Udf::open(&img), Err(Error::Format(_))), "claimed={claimed}");
        }
    }

    #[test]
    fn test_decode_dstring() {
        assert_eq!(decode_dstring(&[8, b'A', b'b']), "Ab");
        assert_eq!(decode_dstring(&[16, 0, b'X', 0x00, 0xE9]), "X\u{e9}");
        assert_eq!(decode_dstring(&[]), "");
    }
}
