//! Memory-mapped sources and the byte views the demuxers run over.

mod bounded;

pub use bounded::{BoundedReader, BoundedReaderOptions};

use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::debug;

use crate::constants::CRC64;
use crate::disc::MultiRegionData;
use crate::error::Result;
use crate::ranges::RangeData;

/// Keeps the mapping alive for as long as any `Bytes` slice of it exists
struct MmapOwner(Arc<Mmap>);

impl AsRef<[u8]> for MmapOwner {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Access pattern hint forwarded to the kernel on unix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessHint {
    Sequential,
    Random,
    WillNeed,
}

/// Read-only memory map of one source file
pub struct MappedFile {
    path: PathBuf,
    mmap: Option<Arc<Mmap>>,
    bytes: Bytes,
}

impl MappedFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(Self { path, mmap: None, bytes: Bytes::new() });
        }
        // SAFETY: sources are opened read-only and are not modified while
        // indexed; a concurrent truncation by another process is unsupported.
        let mmap = Arc::new(unsafe { Mmap::map(&file)? });
        let bytes = Bytes::from_owner(MmapOwner(mmap.clone()));
        debug!(path = %path.display(), len, "mapped source");
        Ok(Self { path, mmap: Some(mmap), bytes })
    }

    /// Shared handle to the whole mapping; slicing it never copies
    pub fn data(&self) -> &Bytes {
        &self.bytes
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn view(&self) -> SourceView {
        SourceView::Contiguous(self.bytes.clone())
    }

    #[cfg(unix)]
    pub fn advise(&self, hint: AccessHint) -> Result<()> {
        use memmap2::Advice;
        let Some(mmap) = &self.mmap else { return Ok(()) };
        let advice = match hint {
            AccessHint::Sequential => Advice::Sequential,
            AccessHint::Random => Advice::Random,
            AccessHint::WillNeed => Advice::WillNeed,
        };
        mmap.advise(advice)?;
        Ok(())
    }

    #[cfg(not(unix))]
    pub fn advise(&self, _hint: AccessHint) -> Result<()> {
        Ok(())
    }

    /// Drops this handle's reference to the mapping. Slices handed out
    /// earlier keep it alive until they are dropped too.
    pub fn close(self) {
        debug!(path = %self.path.display(), "closing source");
    }
}

/// Bytes a demuxer reads from: a contiguous buffer, or the logical view of
/// a file fragmented across several extents of a disc image.
#[derive(Clone)]
pub enum SourceView {
    Contiguous(Bytes),
    Fragmented(Arc<MultiRegionData>),
}

impl SourceView {
    pub fn len(&self) -> u64 {
        match self {
            SourceView::Contiguous(b) => b.len() as u64,
            SourceView::Fragmented(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `len` bytes at `offset`, shorter at the end of the data
    pub fn read_upto(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> {
        let avail = self.len().checked_sub(offset)?;
        let len = len.min(usize::try_from(avail).unwrap_or(usize::MAX));
        self.bytes_at(offset, len)
    }

    /// Zero-copy pieces covering the view in order
    pub fn segments(&self) -> Vec<Bytes> {
        match self {
            SourceView::Contiguous(b) => vec![b.clone()],
            SourceView::Fragmented(m) => m.segments().cloned().collect(),
        }
    }

    /// CRC-64 over the whole view
    pub fn checksum(&self) -> u64 {
        let mut digest = CRC64.digest();
        for seg in self.segments() {
            digest.update(&seg);
        }
        digest.finalize()
    }
}

impl RangeData for SourceView {
    fn size(&self) -> u64 {
        self.len()
    }

    fn bytes_at(&self, offset: u64, len: usize) -> Option<Cow<'_, [u8]>> {
        match self {
            SourceView::Contiguous(b) => b[..].bytes_at(offset, len),
            SourceView::Fragmented(m) => m.bytes_at(offset, len),
        }
    }

    fn byte_at(&self, offset: u64) -> Option<u8> {
        match self {
            SourceView::Contiguous(b) => b[..].byte_at(offset),
            SourceView::Fragmented(m) => m.byte_at(offset),
        }
    }
}
