//! Counters collected while building an index

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::Codec;

/// Per-stream outcome of an indexing run
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub file: usize,
    /// `None` for the video stream
    pub sub_stream: Option<u8>,
    pub codec: Codec,
    pub es_bytes: u64,
    pub sync_points: u64,
    pub windows: u64,
}

/// Tracks what an indexing run did and skipped
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub files_indexed: usize,
    pub files_skipped: usize,
    pub streams_skipped: usize,
    pub bytes_scanned: u64,
    pub streams: Vec<StreamStats>,
    #[serde(skip)]
    start: Instant,
    #[serde(skip)]
    finished: Option<Duration>,
}

impl IndexStats {
    pub fn new() -> Self {
        Self {
            files_indexed: 0,
            files_skipped: 0,
            streams_skipped: 0,
            bytes_scanned: 0,
            streams: Vec::new(),
            start: Instant::now(),
            finished: None,
        }
    }

    pub fn record_stream(&mut self, stream: StreamStats) {
        self.bytes_scanned += stream.es_bytes;
        self.streams.push(stream);
    }

    pub fn windows_hashed(&self) -> u64 {
        self.streams.iter().map(|s| s.windows).sum()
    }

    /// Hashed windows per codec
    pub fn windows_by_codec(&self) -> HashMap<Codec, u64> {
        let mut out = HashMap::new();
        for s in &self.streams {
            *out.entry(s.codec).or_insert(0) += s.windows;
        }
        out
    }

    pub fn finish(&mut self) {
        self.finished = Some(self.start.elapsed());
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.start.elapsed())
    }

    /// ES scan rate in MB/s
    pub fn throughput_mbps(&self) -> f64 {
        let seconds = self.elapsed().as_secs_f64().max(0.001);
        self.bytes_scanned as f64 / 1_000_000.0 / seconds
    }
}

impl Default for IndexStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals() {
        let mut stats = IndexStats::new();
        for (codec, windows) in [(Codec::H264, 10), (Codec::Ac3, 4), (Codec::Ac3, 1)] {
            stats.record_stream(StreamStats { file: 0, sub_stream: None, codec, es_bytes: 100, sync_points: windows, windows });
        }
        stats.finish();
        assert_eq!(stats.bytes_scanned, 300);
        assert_eq!(stats.windows_hashed(), 15);
        assert_eq!(stats.windows_by_codec()[&Codec::Ac3], 5);
        assert!(stats.throughput_mbps() > 0.0);
    }
}
