use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use clap::{Parser, Subcommand};
use disc_es_index::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW_SIZE};
use disc_es_index::source::{BoundedReader, BoundedReaderOptions};
use disc_es_index::{hash_window, Codec, Index, IndexOptions, Reporter, SourceFile};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(version, about = "Index DVD and Blu-ray elementary streams by window hash")]
struct Opt {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build an index and print a JSON report
    Index {
        /// Directory holding *.iso images or an extracted BDMV / VIDEO_TS tree
        root: PathBuf,

        /// Bytes hashed per window
        #[clap(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,

        /// ES bytes handed to the sync detectors per read
        #[clap(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk: usize,

        /// Record file offsets instead of ES offsets
        #[clap(long, default_value_t = false)]
        file_offsets: bool,

        /// Skip PGS subtitle streams
        #[clap(long, default_value_t = false)]
        no_subtitles: bool,

        /// Write the report here instead of stdout
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Build an index, then re-read sampled windows from disk and check their hashes
    Verify {
        root: PathBuf,

        #[clap(long, default_value_t = DEFAULT_WINDOW_SIZE)]
        window: usize,

        /// Windows to re-read
        #[clap(long, default_value_t = 64)]
        samples: usize,

        /// Concurrent disk reads
        #[clap(long, default_value_t = 8)]
        max_in_flight: usize,
    },
}

/// Logs every tenth of the expected input
fn progress_logger() -> disc_es_index::index::ProgressCallback {
    let last = Arc::new(AtomicU64::new(0));
    Arc::new(move |done, expected| {
        let decile = done.saturating_mul(10) / expected.max(1);
        if decile > last.swap(decile, Ordering::Relaxed) {
            info!(done, expected, "progress {}%", decile * 10);
        }
    })
}

async fn build_index(root: PathBuf, options: IndexOptions) -> anyhow::Result<Index> {
    let shown = root.display().to_string();
    tokio::task::spawn_blocking(move || Index::build(&root, options))
        .await
        .context("indexing task panicked")?
        .with_context(|| format!("indexing {shown}"))
}

/// On-disk path of an indexed file
fn source_path(root: &Path, file: &SourceFile) -> PathBuf {
    if root.is_file() { root.to_path_buf() } else { root.join(&file.relative_path) }
}

async fn verify(index: &Index, root: &Path, samples: usize, opts: BoundedReaderOptions) -> anyhow::Result<(usize, usize)> {
    let mut disk: HashMap<usize, BoundedReader> = HashMap::new();
    let mut checked = 0;
    let mut mismatched = 0;

    for (hash, loc) in index.entries() {
        if checked == samples {
            break;
        }
        let reader = index.reader(loc.file).context("location points past the file table")?;
        if let Some(id) = loc.sub_stream {
            // LPCM windows are hashed after conversion, not as stored
            if reader.audio_sub_streams().iter().any(|s| s.id == id && s.codec == Codec::Lpcm) {
                continue;
            }
        }

        if !disk.contains_key(&loc.file) {
            let path = source_path(root, &index.files()[loc.file]);
            let opened = BoundedReader::open(&path, opts.clone()).with_context(|| format!("opening {}", path.display()))?;
            disk.insert(loc.file, opened);
        }
        let Some(file) = disk.get(&loc.file) else { continue };

        let mut window = Vec::with_capacity(index.window_size());
        for (offset, size) in reader.raw_ranges_for_region(loc.sub_stream, loc.offset, index.window_size() as u64)? {
            window.extend_from_slice(&file.read_at(size as usize, offset).await?);
        }
        checked += 1;
        if hash_window(&window) != hash {
            mismatched += 1;
            warn!(file = loc.file, offset = loc.offset, sub_stream = ?loc.sub_stream, "window hash mismatch");
        }
    }
    Ok((checked, mismatched))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let opt = Opt::parse();

    match opt.command {
        Command::Index { root, window, chunk, file_offsets, no_subtitles, output } => {
            let options = IndexOptions {
                window_size: window,
                uses_es_offsets: !file_offsets,
                chunk_size: chunk,
                include_subtitles: !no_subtitles,
                progress: Some(progress_logger()),
            };
            let index = build_index(root, options).await?;
            let json = Reporter::generate_json_report(&index);
            match output {
                Some(path) => std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?,
                None => println!("{json}"),
            }
            index.close();
        }
        Command::Verify { root, window, samples, max_in_flight } => {
            let options = IndexOptions { window_size: window, progress: Some(progress_logger()), ..IndexOptions::default() };
            let index = build_index(root.clone(), options).await?;
            let opts = BoundedReaderOptions { max_in_flight, ..BoundedReaderOptions::default() };
            let (checked, mismatched) = verify(&index, &root, samples, opts).await?;
            println!("{}", Reporter::generate_verify_report(&root, checked, mismatched));
            index.close();
            if mismatched > 0 {
                anyhow::bail!("{mismatched} of {checked} windows did not match");
            }
        }
    }
    Ok(())
}
