//! ISO9660 (ECMA-119) directory navigation

use tracing::trace;

use super::{normalize_name, DiscFilesystem, FileNode, IsoPhysicalRange};
use crate::constants::{ISO_MAX_DIR_READ, ISO_PVD_SECTOR, SECTOR_SIZE};
use crate::error::{Error, Result};
use crate::parsers::le_u32;

const PVD_TYPE: u8 = 1;
const STANDARD_ID: &[u8; 5] = b"CD001";
const ROOT_RECORD_OFFSET: usize = 156;
const FLAG_DIRECTORY: u8 = 0x02;
const FLAG_MULTI_EXTENT: u8 = 0x80;

pub struct Iso9660<'a> {
    image: &'a [u8],
    root: IsoPhysicalRange,
}

impl<'a> Iso9660<'a> {
    /// Reads the Primary Volume Descriptor. Any failure means the image has
    /// no usable ISO9660 tree.
    pub fn open(image: &'a [u8]) -> Result<Self> {
        let start = ISO_PVD_SECTOR * SECTOR_SIZE;
        let pvd = image
            .get(start..start + SECTOR_SIZE)
            .ok_or(Error::Truncation { what: "ISO9660 volume descriptor", need: start + SECTOR_SIZE, have: image.len() })?;
        if pvd[0] != PVD_TYPE || &pvd[1..6] != STANDARD_ID {
            return Err(Error::format("no ISO9660 primary volume descriptor"));
        }
        let root = &pvd[ROOT_RECORD_OFFSET..ROOT_RECORD_OFFSET + 34];
        let lba = le_u32(root, 2).unwrap_or(0) as u64;
        let len = le_u32(root, 10).unwrap_or(0) as u64;
        Ok(Self { image, root: IsoPhysicalRange::new(lba * SECTOR_SIZE as u64, len) })
    }

    fn read_dir(&self, dir: IsoPhysicalRange) -> Result<Vec<FileNode>> {
        let len = (dir.length as usize).min(ISO_MAX_DIR_READ);
        let start = dir.offset as usize;
        let data = self
            .image
            .get(start..start.saturating_add(len))
            .ok_or_else(|| Error::bounds(dir.offset + len as u64, self.image.len() as u64))?;

        let mut nodes: Vec<FileNode> = Vec::new();
        // multi-extent files continue until a record without the flag
        let mut pending: Option<FileNode> = None;
        let mut pos = 0usize;
        while pos < data.len() {
            let rec_len = data[pos] as usize;
            if rec_len == 0 {
                // records never cross sectors; the rest of this one is padding
                pos = (pos / SECTOR_SIZE + 1) * SECTOR_SIZE;
                continue;
            }
            let rec = data
                .get(pos..pos + rec_len)
                .ok_or(Error::Truncation { what: "ISO9660 directory record", need: rec_len, have: data.len() - pos })?;
            pos += rec_len;
            if rec.len() < 34 {
                return Err(Error::format("ISO9660 directory record too short"));
            }
            let name_len = rec[32] as usize;
            let raw_name = rec.get(33..33 + name_len).ok_or_else(|| Error::format("ISO9660 name overruns record"))?;
            if raw_name == [0] || raw_name == [1] {
                continue; // self and parent
            }
            let lba = le_u32(rec, 2).unwrap_or(0) as u64;
            let size = le_u32(rec, 10).unwrap_or(0) as u64;
            let flags = rec[25];
            let extent = IsoPhysicalRange::new(lba * SECTOR_SIZE as u64, size);
            let name = normalize_name(&String::from_utf8_lossy(raw_name));

            let node = match pending.take() {
                Some(mut p) if p.name == name => {
                    p.size += size;
                    p.extents.push(extent);
                    p
                }
                Some(p) => {
                    nodes.push(close_node(p));
                    FileNode { name, is_dir: flags & FLAG_DIRECTORY != 0, size, extents: vec![extent] }
                }
                None => FileNode { name, is_dir: flags & FLAG_DIRECTORY != 0, size, extents: vec![extent] },
            };
            if flags & FLAG_MULTI_EXTENT != 0 {
                pending = Some(node);
            } else {
                nodes.push(close_node(node));
            }
        }
        nodes.extend(pending.map(close_node));
        trace!(entries = nodes.len(), offset = dir.offset, "read ISO9660 directory");
        Ok(nodes)
    }
}

/// Drops the zero-length extents a multi-extent chain may carry
fn close_node(mut node: FileNode) -> FileNode {
    node.extents.retain(|e| e.length > 0);
    node
}

impl DiscFilesystem for Iso9660<'_> {
    fn list_dir(&self, path: &[&str]) -> Result<Option<Vec<FileNode>>> {
        let mut entries = self.read_dir(self.root)?;
        for component in path {
            let Some(dir) = entries.iter().find(|e| e.is_dir && e.name == *component) else {
                return Ok(None);
            };
            let Some(&extent) = dir.extents.first() else {
                return Ok(Some(Vec::new()));
            };
            entries = self.read_dir(extent)?;
        }
        Ok(Some(entries))
    }
}
