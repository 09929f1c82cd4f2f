//! Content-addressable index over fixed-size ES windows.
//!
//! Every window starts at a codec sync point, where a remuxer is likely to
//! have started copying bytes. The window's CRC-64 maps to every place it
//! was seen, so a matcher can hash a window of its output file and find the
//! disc bytes it came from.

mod builder;

pub use builder::{Indexer, SourceKind};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::constants::{CRC64, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE};
use crate::es::EsReader;
use crate::error::Result;
use crate::stats::IndexStats;
use crate::types::ContainerKind;

/// Called with `(bytes processed, bytes expected)` as indexing progresses
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where a hashed window starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    /// Index into [`Index::files`]
    pub file: usize,
    /// ES offset, or file offset when the index does not use ES offsets
    pub offset: u64,
    pub is_video: bool,
    /// Audio or subtitle sub-stream; `None` for video
    pub sub_stream: Option<u8>,
}

/// One indexed stream file
#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    /// Path of the file on disk, relative to the indexed root
    pub relative_path: PathBuf,
    /// Path of the stream inside a disc image, when there is one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedded_path: Option<String>,
    pub container: ContainerKind,
    pub size: u64,
    /// CRC-64/XZ of the stream file's bytes
    pub checksum: u64,
}

#[derive(Clone)]
pub struct IndexOptions {
    /// Bytes hashed per window
    pub window_size: usize,
    /// Record ES offsets instead of file offsets
    pub uses_es_offsets: bool,
    /// ES bytes read per detector call
    pub chunk_size: usize,
    pub include_subtitles: bool,
    pub progress: Option<ProgressCallback>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            uses_es_offsets: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            include_subtitles: true,
            progress: None,
        }
    }
}

impl fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexOptions")
            .field("window_size", &self.window_size)
            .field("uses_es_offsets", &self.uses_es_offsets)
            .field("chunk_size", &self.chunk_size)
            .field("include_subtitles", &self.include_subtitles)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Hash of one window
pub fn hash_window(data: &[u8]) -> u64 {
    CRC64.checksum(data)
}

/// Built index. Read-only once built; owns the mapped sources through its
/// readers until dropped or closed.
pub struct Index {
    hash_to_locations: HashMap<u64, Vec<Location>>,
    files: Vec<SourceFile>,
    readers: Vec<Box<dyn EsReader>>,
    window_size: usize,
    uses_es_offsets: bool,
    stats: IndexStats,
}

impl Index {
    /// Indexes every source under `root`
    pub fn build(root: impl AsRef<Path>, options: IndexOptions) -> Result<Self> {
        Indexer::new(options).build(root.as_ref())
    }

    pub fn lookup(&self, hash: u64) -> &[Location] {
        self.hash_to_locations.get(&hash).map(Vec::as_slice).unwrap_or_default()
    }

    /// Every `(hash, location)` pair, in no particular order
    pub fn entries(&self) -> impl Iterator<Item = (u64, &Location)> + '_ {
        self.hash_to_locations.iter().flat_map(|(&hash, locations)| locations.iter().map(move |l| (hash, l)))
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    /// Reader for the file at `index` in [`Index::files`]
    pub fn reader(&self, index: usize) -> Option<&dyn EsReader> {
        self.readers.get(index).map(|r| r.as_ref())
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn uses_es_offsets(&self) -> bool {
        self.uses_es_offsets
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn hash_count(&self) -> usize {
        self.hash_to_locations.len()
    }

    pub fn location_count(&self) -> usize {
        self.hash_to_locations.values().map(Vec::len).sum()
    }

    /// Releases the readers and with them the mapped sources
    pub fn close(self) {
        info!(files = self.files.len(), "closing index");
    }
}
