//! Positional reads with a cap on concurrent requests and a per-read
//! timeout, for callers that cannot use the memory map.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct BoundedReaderOptions {
    pub max_in_flight: usize,
    /// How long a caller waits for a free read slot
    pub acquire_timeout: Duration,
    /// How long one read may take once started
    pub read_timeout: Duration,
}

impl Default for BoundedReaderOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            acquire_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
        }
    }
}

pub struct BoundedReader {
    path: PathBuf,
    file: Mutex<Arc<File>>,
    permits: Arc<Semaphore>,
    opts: BoundedReaderOptions,
    reopens: AtomicU64,
    /// Reads left that stall past the read timeout
    #[cfg(test)]
    stalls: AtomicU64,
}

impl BoundedReader {
    pub fn open(path: impl AsRef<Path>, opts: BoundedReaderOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Arc::new(file)),
            permits: Arc::new(Semaphore::new(opts.max_in_flight.max(1))),
            opts,
            reopens: AtomicU64::new(0),
            #[cfg(test)]
            stalls: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads up to `len` bytes at `offset`; shorter only at end of file.
    ///
    /// Waiting too long for a slot is `Backpressure`, a read that does not
    /// finish in time is `Timeout`. Either, or an I/O failure, reopens the
    /// file and retries once; the second failure is returned.
    pub async fn read_at(&self, len: usize, offset: u64) -> Result<Bytes> {
        match self.attempt(len, offset).await {
            Err(e) if e.is_retryable() => {
                warn!(path = %self.path.display(), offset, error = %e, "read failed, reopening");
                self.reopen()?;
                self.attempt(len, offset).await
            }
            other => other,
        }
    }

    /// Times the file was reopened after a failed read
    pub fn reopen_count(&self) -> u64 {
        self.reopens.load(Ordering::Relaxed)
    }

    async fn attempt(&self, len: usize, offset: u64) -> Result<Bytes> {
        let _permit = match timeout(self.opts.acquire_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => return Err(Error::Backpressure { in_flight: self.in_flight() }),
        };
        self.read_once(len, offset).await
    }

    fn in_flight(&self) -> usize {
        self.opts.max_in_flight.max(1) - self.permits.available_permits()
    }

    fn handle(&self) -> Result<Arc<File>> {
        self.file
            .lock()
            .map(|f| f.clone())
            .map_err(|_| Error::StaleHandle(self.path.clone()))
    }

    fn reopen(&self) -> Result<()> {
        let fresh = File::open(&self.path).map_err(|_| Error::StaleHandle(self.path.clone()))?;
        let mut guard = self.file.lock().map_err(|_| Error::StaleHandle(self.path.clone()))?;
        *guard = Arc::new(fresh);
        self.reopens.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read_once(&self, len: usize, offset: u64) -> Result<Bytes> {
        let file = self.handle()?;
        #[cfg(test)]
        let stall = self.stalls.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1)).is_ok();
        let task = async move {
            #[cfg(test)]
            if stall {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            tokio::task::spawn_blocking(move || pread(&file, len, offset)).await
        };
        match timeout(self.opts.read_timeout, task).await {
            Err(_) => Err(Error::Timeout { offset }),
            Ok(Err(join)) => Err(Error::Io(std::io::Error::other(join))),
            Ok(Ok(res)) => res.map(Bytes::from),
        }
    }
}

fn pread(file: &File, len: usize, offset: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let n = read_at(file, &mut buf[filled..], offset + filled as u64)?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}
