//! Report generation for indexing runs

use std::path::Path;

use serde::Serialize;

use crate::index::{Index, SourceFile};
use crate::stats::IndexStats;
use crate::types::{Codec, SubStream};

/// One stream of an indexed file
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    /// `None` for the video stream
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stream: Option<u8>,
    pub codec: Codec,
    pub es_bytes: u64,
    /// Zero when the stream was skipped
    pub windows: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    #[serde(flatten)]
    pub source: SourceFile,
    pub streams: Vec<StreamReport>,
    pub sub_streams: Vec<SubStream>,
}

/// Structured summary of a built index
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub timestamp: String,
    pub window_size: usize,
    pub uses_es_offsets: bool,
    pub hashes: usize,
    pub locations: usize,
    pub elapsed_ms: u64,
    pub throughput_mbps: f64,
    pub files: Vec<FileReport>,
    pub stats: IndexStats,
}

/// JSON structure for the CLI `verify` output
#[derive(Serialize)]
struct VerifyJson<'a> {
    ts_time: String,
    root: &'a str,
    checked: usize,
    mismatched: usize,
}

pub struct Reporter;

impl Reporter {
    /// Structured report for API consumers
    pub fn create_report(index: &Index) -> IndexReport {
        let stats = index.stats();
        let files = index
            .files()
            .iter()
            .enumerate()
            .map(|(i, source)| FileReport {
                source: source.clone(),
                streams: stats
                    .streams
                    .iter()
                    .filter(|s| s.file == i)
                    .map(|s| StreamReport { sub_stream: s.sub_stream, codec: s.codec, es_bytes: s.es_bytes, windows: s.windows })
                    .collect(),
                sub_streams: index.reader(i).map(|r| r.audio_sub_streams()).unwrap_or_default(),
            })
            .collect();

        IndexReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            window_size: index.window_size(),
            uses_es_offsets: index.uses_es_offsets(),
            hashes: index.hash_count(),
            locations: index.location_count(),
            elapsed_ms: stats.elapsed().as_millis() as u64,
            throughput_mbps: stats.throughput_mbps(),
            files,
            stats: stats.clone(),
        }
    }

    /// Pretty-printed JSON for CLI output
    pub fn generate_json_report(index: &Index) -> String {
        let rep = Self::create_report(index);
        serde_json::to_string_pretty(&rep).unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }

    pub fn generate_verify_report(root: &Path, checked: usize, mismatched: usize) -> String {
        let root = root.to_string_lossy();
        let rep = VerifyJson { ts_time: chrono::Utc::now().to_rfc3339(), root: &root, checked, mismatched };
        serde_json::to_string_pretty(&rep).unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}
