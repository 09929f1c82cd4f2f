//! Source discovery, demuxing and window hashing

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{hash_window, Index, IndexOptions, Location, SourceFile};
use crate::constants::{CRC64, MAX_SYNC_HEADER};
use crate::disc::{is_title_vob, locate_streams, IsoAdapter, IsoFileExtent};
use crate::es::EsReader;
use crate::error::{Error, Result};
use crate::parsers::lpcm::{to_little_endian, LpcmFormat};
use crate::parsers::{find_sync_points, fixed_interval_points, scans_whole_stream};
use crate::ps::PsDemuxer;
use crate::ranges::RangeData;
use crate::source::{AccessHint, MappedFile};
use crate::stats::{IndexStats, StreamStats};
use crate::ts::TsDemuxer;
use crate::types::{Codec, ContainerKind, DiscKind};

/// Detectors may report an anchor a few bytes after the start of the
/// signature that identified it
const SYNC_LOOKBACK: usize = 4;

/// What a file found under the indexed root holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    DiscImage,
    TransportStream,
    ProgramStream,
}

impl SourceKind {
    /// `*.iso`, `BDMV/STREAM/*.m2ts` or `VIDEO_TS/VTS_xx_N.VOB`
    pub fn classify(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_uppercase();
        let ancestor = |n: usize| {
            path.ancestors()
                .nth(n)
                .and_then(Path::file_name)
                .and_then(|s| s.to_str())
                .map(str::to_ascii_uppercase)
        };
        if name.ends_with(".ISO") {
            return Some(SourceKind::DiscImage);
        }
        if name.ends_with(".M2TS") && ancestor(1).as_deref() == Some("STREAM") && ancestor(2).as_deref() == Some("BDMV") {
            return Some(SourceKind::TransportStream);
        }
        if is_title_vob(&name) && ancestor(1).as_deref() == Some("VIDEO_TS") {
            return Some(SourceKind::ProgramStream);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamRef {
    Video,
    Audio(u8),
}

impl StreamRef {
    fn total(self, reader: &dyn EsReader) -> Result<u64> {
        match self {
            StreamRef::Video => Ok(reader.total_es_size(true)),
            StreamRef::Audio(id) => reader.audio_sub_stream_es_size(id),
        }
    }

    fn read(self, reader: &dyn EsReader, es_offset: u64, size: usize) -> Result<Cow<'_, [u8]>> {
        match self {
            StreamRef::Video => reader.read_es_data(es_offset, size, true),
            StreamRef::Audio(id) => reader.read_audio_substream_data(id, es_offset, size),
        }
    }

    fn file_offset(self, reader: &dyn EsReader, es_offset: u64) -> Result<u64> {
        match self {
            StreamRef::Video => reader.es_offset_to_file_offset(es_offset, true),
            StreamRef::Audio(id) => reader.audio_substream_es_to_file_offset(id, es_offset),
        }
    }

    fn sub_stream(self) -> Option<u8> {
        match self {
            StreamRef::Video => None,
            StreamRef::Audio(id) => Some(id),
        }
    }
}

/// CRC-64 of everything a reader's tables point into
fn data_checksum(data: &dyn RangeData, step: usize) -> Result<u64> {
    let mut digest = CRC64.digest();
    let mut pos = 0u64;
    while pos < data.size() {
        let len = (data.size() - pos).min(step as u64) as usize;
        let chunk = data.bytes_at(pos, len).ok_or_else(|| Error::bounds(pos, data.size()))?;
        digest.update(&chunk);
        pos += len as u64;
    }
    Ok(digest.finalize())
}

/// Builds an [`Index`] one source file at a time
pub struct Indexer {
    options: IndexOptions,
    hash_to_locations: HashMap<u64, Vec<Location>>,
    files: Vec<SourceFile>,
    readers: Vec<Box<dyn EsReader>>,
    stats: IndexStats,
    processed: u64,
    expected: u64,
}

impl Indexer {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            hash_to_locations: HashMap::new(),
            files: Vec::new(),
            readers: Vec::new(),
            stats: IndexStats::new(),
            processed: 0,
            expected: 0,
        }
    }

    /// Source files under `root` in path order
    pub fn enumerate(root: &Path) -> Vec<(PathBuf, SourceKind)> {
        let mut out = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable path");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(kind) = SourceKind::classify(entry.path()) {
                out.push((entry.into_path(), kind));
            }
        }
        out
    }

    pub fn build(mut self, root: &Path) -> Result<Index> {
        if self.options.window_size == 0 {
            return Err(Error::format("window size must be positive"));
        }
        let sources = Self::enumerate(root);
        self.expected = sources.iter().filter_map(|(p, _)| p.metadata().ok()).map(|m| m.len()).sum();
        info!(root = %root.display(), sources = sources.len(), "indexing");

        for (path, kind) in &sources {
            if let Err(e) = self.add_source(root, path, *kind) {
                warn!(path = %path.display(), error = %e, "skipping source");
                self.stats.files_skipped += 1;
            }
        }
        self.stats.finish();
        info!(
            files = self.files.len(),
            skipped = self.stats.files_skipped,
            hashes = self.hash_to_locations.len(),
            windows = self.stats.windows_hashed(),
            elapsed_ms = self.stats.elapsed().as_millis() as u64,
            "index built"
        );
        Ok(Index {
            hash_to_locations: self.hash_to_locations,
            files: self.files,
            readers: self.readers,
            window_size: self.options.window_size,
            uses_es_offsets: self.options.uses_es_offsets,
            stats: self.stats,
        })
    }

    fn add_source(&mut self, root: &Path, path: &Path, kind: SourceKind) -> Result<()> {
        let mapped = MappedFile::open(path)?;
        mapped.advise(AccessHint::Sequential)?;
        let relative = match path.strip_prefix(root) {
            Ok(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf()),
        };
        info!(path = %relative.display(), kind = ?kind, size = mapped.size(), "opening source");

        match kind {
            SourceKind::TransportStream => {
                let reader = TsDemuxer::open(mapped.view())?;
                self.add_reader(relative, None, ContainerKind::TransportStream, mapped.size(), Box::new(reader))?;
            }
            SourceKind::ProgramStream => {
                let reader = PsDemuxer::open(mapped.view())?;
                self.add_reader(relative, None, ContainerKind::ProgramStream, mapped.size(), Box::new(reader))?;
            }
            SourceKind::DiscImage => {
                let streams = locate_streams(mapped.data())?;
                if streams.is_empty() {
                    return Err(Error::format("disc image holds no stream files"));
                }
                for file in streams {
                    if let Err(e) = self.add_embedded(&mapped, &relative, &file) {
                        warn!(image = %relative.display(), file = %file.name, error = %e, "skipping embedded stream");
                        self.stats.files_skipped += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn add_embedded(&mut self, image: &MappedFile, relative: &Path, file: &IsoFileExtent) -> Result<()> {
        let (container, reader) = match file.disc {
            DiscKind::BluRay => (
                ContainerKind::TransportStream,
                Box::new(IsoAdapter::open(image.data(), file, TsDemuxer::open)?) as Box<dyn EsReader>,
            ),
            DiscKind::Dvd => (
                ContainerKind::ProgramStream,
                Box::new(IsoAdapter::open(image.data(), file, PsDemuxer::open)?) as Box<dyn EsReader>,
            ),
        };
        self.add_reader(relative.to_path_buf(), Some(file.name.clone()), container, file.size, reader)
    }

    fn add_reader(
        &mut self,
        relative_path: PathBuf,
        embedded_path: Option<String>,
        container: ContainerKind,
        size: u64,
        reader: Box<dyn EsReader>,
    ) -> Result<()> {
        let file_index = self.files.len();
        let checksum = match reader.checksum() {
            Some(c) => c,
            None => data_checksum(reader.data(), self.options.chunk_size.max(1))?,
        };

        let mut streams = Vec::new();
        if let Some(codec) = reader.video_codec() {
            streams.push((StreamRef::Video, codec, None));
        }
        for sub in reader.audio_sub_streams() {
            if sub.codec.is_subtitle() && !self.options.include_subtitles {
                continue;
            }
            streams.push((StreamRef::Audio(sub.id), sub.codec, sub.lpcm));
        }

        for (stream, codec, lpcm) in streams {
            match self.index_stream(file_index, reader.as_ref(), stream, codec, lpcm) {
                Ok(s) => {
                    debug!(
                        file = file_index,
                        sub_stream = ?s.sub_stream,
                        codec = codec.name(),
                        sync_points = s.sync_points,
                        windows = s.windows,
                        "indexed stream"
                    );
                    self.stats.record_stream(s);
                }
                Err(e) => {
                    warn!(file = file_index, stream = ?stream, codec = codec.name(), error = %e, "skipping stream");
                    self.stats.streams_skipped += 1;
                }
            }
        }

        self.files.push(SourceFile { relative_path, embedded_path, container, size, checksum });
        self.readers.push(reader);
        self.stats.files_indexed += 1;
        Ok(())
    }

    fn insert(&mut self, reader: &dyn EsReader, file: usize, stream: StreamRef, es_offset: u64, window: &[u8]) -> Result<()> {
        let offset = if self.options.uses_es_offsets { es_offset } else { stream.file_offset(reader, es_offset)? };
        let location = Location { file, offset, is_video: stream == StreamRef::Video, sub_stream: stream.sub_stream() };
        self.hash_to_locations.entry(hash_window(window)).or_default().push(location);
        Ok(())
    }

    fn report_progress(&mut self, bytes: u64) {
        self.processed += bytes;
        if let Some(progress) = &self.options.progress {
            progress(self.processed, self.expected.max(self.processed));
        }
    }

    fn index_stream(
        &mut self,
        file: usize,
        reader: &dyn EsReader,
        stream: StreamRef,
        codec: Codec,
        lpcm: Option<LpcmFormat>,
    ) -> Result<StreamStats> {
        let total = stream.total(reader)?;
        let mut stats = StreamStats { file, sub_stream: stream.sub_stream(), codec, es_bytes: total, sync_points: 0, windows: 0 };
        if codec == Codec::Lpcm {
            let format = lpcm.ok_or_else(|| Error::format("LPCM stream without a recognised header"))?;
            self.index_lpcm(file, reader, stream, &format, total, &mut stats)?;
            self.report_progress(total);
            return Ok(stats);
        }

        let window = self.options.window_size;
        let step = if scans_whole_stream(codec) { total.max(1) as usize } else { self.options.chunk_size.max(1) };
        let mut pos = 0u64;
        while pos < total {
            let start = pos.saturating_sub(SYNC_LOOKBACK as u64);
            let end = (pos + (step + MAX_SYNC_HEADER) as u64).min(total);
            let limit = (pos + step as u64).min(total);
            let chunk = stream.read(reader, start, (end - start) as usize)?;
            for p in find_sync_points(codec, &chunk) {
                let es = start + p as u64;
                if es < pos || es >= limit {
                    continue;
                }
                stats.sync_points += 1;
                if es + window as u64 > total {
                    continue;
                }
                if p + window <= chunk.len() {
                    self.insert(reader, file, stream, es, &chunk[p..p + window])?;
                } else {
                    let bytes = stream.read(reader, es, window)?;
                    self.insert(reader, file, stream, es, &bytes)?;
                }
                stats.windows += 1;
            }
            self.report_progress(limit - pos);
            pos = limit;
        }
        Ok(stats)
    }

    /// LPCM has no sync words: anchors sit at fixed intervals and the window
    /// is hashed in little-endian interleaved form.
    fn index_lpcm(
        &mut self,
        file: usize,
        reader: &dyn EsReader,
        stream: StreamRef,
        format: &LpcmFormat,
        total: u64,
        stats: &mut StreamStats,
    ) -> Result<()> {
        let blocks = self.options.window_size / format.pcm_block_size();
        if blocks == 0 {
            return Err(Error::format("window smaller than one LPCM sample group"));
        }
        let disc_window = blocks * format.disc_block_size();
        for es in fixed_interval_points(0, total, format.sync_interval() as u64) {
            stats.sync_points += 1;
            if es + disc_window as u64 > total {
                break;
            }
            let disc = stream.read(reader, es, disc_window)?;
            let pcm = to_little_endian(format, &disc)?;
            self.insert(reader, file, stream, es, &pcm)?;
            stats.windows += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SECTOR_SIZE;
    use crate::disc::iso9660::tests::bluray_iso;
    use crate::ps::tests::{pack, pes};
    use crate::test_support::build_m2ts;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const WINDOW: usize = 64;

    /// H.264 ES with NAL starts at 10, 254 and 500 (anchors 13, 257, 503)
    fn video() -> Vec<u8> {
        let mut v = vec![0x11u8; 1000];
        for at in [10, 254, 500] {
            v[at..at + 4].copy_from_slice(&[0x00, 0x00, 0x01, 0x65]);
        }
        v
    }

    /// Three 192-byte AC-3 frames
    fn audio() -> Vec<u8> {
        (0..3u8)
            .flat_map(|i| {
                let mut f = vec![0x30 + i; 192];
                f[..6].copy_from_slice(&[0x0B, 0x77, 0x00, 0x00, 0x04, 0x40]);
                f
            })
            .collect()
    }

    fn options() -> IndexOptions {
        IndexOptions { window_size: WINDOW, chunk_size: 256, ..IndexOptions::default() }
    }

    fn bluray_tree() -> (tempfile::TempDir, Vec<u8>) {
        let dir = tempfile::tempdir().unwrap();
        let stream_dir = dir.path().join("BDMV").join("STREAM");
        fs::create_dir_all(&stream_dir).unwrap();
        let m2ts = build_m2ts(0x1B, &video(), 0x81, &audio());
        fs::write(stream_dir.join("00000.m2ts"), &m2ts).unwrap();
        fs::write(stream_dir.join("00001.m2ts"), vec![0u8; 4096]).unwrap();
        fs::write(dir.path().join("BDMV").join("index.bdmv"), b"INDX0200").unwrap();
        (dir, m2ts)
    }

    #[test]
    fn test_classify() {
        assert_eq!(SourceKind::classify(Path::new("/x/BDMV/STREAM/00001.m2ts")), Some(SourceKind::TransportStream));
        assert_eq!(SourceKind::classify(Path::new("/x/VIDEO_TS/VTS_01_1.VOB")), Some(SourceKind::ProgramStream));
        assert_eq!(SourceKind::classify(Path::new("/x/VIDEO_TS/VTS_01_0.VOB")), None);
        assert_eq!(SourceKind::classify(Path::new("/x/movie.ISO")), Some(SourceKind::DiscImage));
        assert_eq!(SourceKind::classify(Path::new("/x/00001.m2ts")), None);
    }

    #[test]
    fn test_lookups_resolve_to_hashed_bytes() {
        let (dir, m2ts) = bluray_tree();
        let index = Index::build(dir.path(), options()).unwrap();
        assert_eq!(index.files().len(), 1);
        assert_eq!(index.stats().files_skipped, 1);
        assert_eq!(index.files()[0].relative_path, Path::new("BDMV/STREAM/00000.m2ts"));
        assert_eq!(index.files()[0].checksum, CRC64.checksum(&m2ts));

        let v = video();
        for anchor in [13usize, 257, 503] {
            let hits = index.lookup(hash_window(&v[anchor..anchor + WINDOW]));
            assert!(hits.contains(&Location { file: 0, offset: anchor as u64, is_video: true, sub_stream: None }), "anchor {anchor}");
        }
        let a = audio();
        let hits = index.lookup(hash_window(&a[192..192 + WINDOW]));
        assert!(hits.contains(&Location { file: 0, offset: 192, is_video: false, sub_stream: Some(0) }));

        // every location reads back the window it was hashed from
        let reader = index.reader(0).unwrap();
        for (hash, locations) in &index.hash_to_locations {
            for loc in locations {
                let bytes = match loc.sub_stream {
                    None => reader.read_es_data(loc.offset, WINDOW, true).unwrap(),
                    Some(id) => reader.read_audio_substream_data(id, loc.offset, WINDOW).unwrap(),
                };
                assert_eq!(hash_window(&bytes), *hash);
            }
        }
        assert_eq!(index.location_count(), 3 + 3);
    }

    #[test]
    fn test_file_offsets_and_progress() {
        let (dir, m2ts) = bluray_tree();
        let seen = Arc::new(AtomicU64::new(0));
        let sink = seen.clone();
        let opts = IndexOptions {
            uses_es_offsets: false,
            progress: Some(Arc::new(move |done, _| sink.store(done, Ordering::Relaxed))),
            ..options()
        };
        let index = Index::build(dir.path(), opts).unwrap();
        assert!(!index.uses_es_offsets());
        assert_eq!(seen.load(Ordering::Relaxed), 1000 + 576);

        let v = video();
        let hits = index.lookup(hash_window(&v[257..257 + WINDOW]));
        assert_eq!(hits.len(), 1);
        assert_eq!(m2ts[hits[0].offset as usize], v[257]);
    }

    #[test]
    fn test_disc_image_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut iso = bluray_iso();
        let m2ts = build_m2ts(0x1B, &video(), 0x81, &audio());
        assert!(m2ts.len() <= 3000);
        iso[24 * SECTOR_SIZE..24 * SECTOR_SIZE + m2ts.len()].copy_from_slice(&m2ts);
        fs::write(dir.path().join("disc.iso"), &iso).unwrap();

        let index = Index::build(dir.path(), options()).unwrap();
        assert_eq!(index.files().len(), 1);
        let file = &index.files()[0];
        assert_eq!(file.relative_path, Path::new("disc.iso"));
        assert_eq!(file.embedded_path.as_deref(), Some("BDMV/STREAM/00001.M2TS"));
        assert_eq!(file.size, 3000);

        let v = video();
        let hits = index.lookup(hash_window(&v[503..503 + WINDOW]));
        assert_eq!(hits.len(), 1);
        let image_offset = index.reader(0).unwrap().es_offset_to_file_offset(503, true).unwrap();
        assert_eq!(iso[image_offset as usize], v[503]);
    }

    /// 16-bit big-endian samples without start-code patterns
    fn lpcm_samples(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 0x41) as u8).collect()
    }

    fn swap16(disc: &[u8]) -> Vec<u8> {
        disc.chunks_exact(2).flat_map(|p| [p[1], p[0]]).collect()
    }

    #[test]
    fn test_lpcm_windows_are_hashed_little_endian() {
        let samples = lpcm_samples(5000);
        let wanted = |offset: u64| Location { file: 0, offset, is_video: false, sub_stream: Some(0) };

        let bd = tempfile::tempdir().unwrap();
        let stream_dir = bd.path().join("BDMV").join("STREAM");
        fs::create_dir_all(&stream_dir).unwrap();
        let lpcm = [&[0x00, 0x60, 0x31, 0x40][..], &samples].concat();
        fs::write(stream_dir.join("00000.m2ts"), build_m2ts(0x1B, &video(), 0x80, &lpcm)).unwrap();

        let dvd = tempfile::tempdir().unwrap();
        let vts = dvd.path().join("VIDEO_TS");
        fs::create_dir_all(&vts).unwrap();
        let mut vob = pack();
        vob.extend(pes(0xE0, &[0x00, 0x00, 0x01, 0xB3, 0x10, 0x20, 0x30, 0x40]));
        vob.extend(pack());
        vob.extend(pes(0xBD, &[&[0xA0, 0x01, 0x00, 0x01, 0x00, 0x01, 0x80][..], &samples].concat()));
        fs::write(vts.join("VTS_01_1.VOB"), &vob).unwrap();

        for root in [bd.path(), dvd.path()] {
            let index = Index::build(root, options()).unwrap();
            assert_eq!(index.files().len(), 1, "{}", root.display());
            for anchor in [0usize, 4096] {
                let hits = index.lookup(hash_window(&swap16(&samples[anchor..anchor + WINDOW])));
                assert!(hits.contains(&wanted(anchor as u64)), "{} anchor {anchor}", root.display());
            }
            // stored byte order is not what gets hashed
            assert!(index.lookup(hash_window(&samples[..WINDOW])).is_empty());
        }
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let opts = IndexOptions { window_size: 0, ..IndexOptions::default() };
        assert!(Index::build(dir.path(), opts).is_err());
    }
}
