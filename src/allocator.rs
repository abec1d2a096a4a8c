//! File part allocation.
//!
//! The connection and download managers only see [`ChunkAllocator`]:
//! "where does the next writable range of this file start" and "finalize
//! this file if it is complete". [`DiskAllocator`] is the reference
//! implementation backed by a temp and a ready directory.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::AsyncWrite;
use tracing::{debug, info};

/// Destination of one streamed part.
pub trait PartSink: AsyncWrite + Send + Unpin {}

impl<T: AsyncWrite + Send + Unpin> PartSink for T {}

/// Coordinates concurrent writers of the same logical file.
///
/// `next_available_chunk` and `open_part` are called from the connection
/// event loop and must stay cheap: a metadata lookup or a file open.
/// `check_completed_file` may move whole files and is run on the blocking
/// pool.
pub trait ChunkAllocator: Send + Sync {
    /// Start offset of the next range nobody is writing, or `None` when the
    /// file is complete or its only open range is already taken.
    fn next_available_chunk(&self, file: &str, size: u64) -> Option<u64>;

    /// Claim the range starting at `offset` and open it for writing. The
    /// claim is released when the sink is dropped.
    fn open_part(&self, file: &str, size: u64, offset: u64) -> io::Result<Box<dyn PartSink>>;

    /// Finalize `file` if all `size` bytes are present. Returns whether it
    /// was complete.
    fn check_completed_file(&self, file: &str, size: u64) -> io::Result<bool>;
}

/// Single-part-per-file allocator on local disk.
///
/// Parts grow a file under `temp_dir` from its current length; a finished
/// file is moved to `ready_dir`.
#[derive(Debug)]
pub struct DiskAllocator {
    temp_dir: PathBuf,
    ready_dir: PathBuf,
    active: Arc<Mutex<HashSet<String>>>,
}

impl DiskAllocator {
    pub fn new(temp_dir: impl Into<PathBuf>, ready_dir: impl Into<PathBuf>) -> Self {
        DiskAllocator {
            temp_dir: temp_dir.into(),
            ready_dir: ready_dir.into(),
            active: Arc::default(),
        }
    }

    /// Bots choose the file name; never let it leave the directory.
    fn safe_name(file: &str) -> String {
        let name: String = file
            .chars()
            .map(|c| match c {
                '/' | '\\' | '\0' => '_',
                c => c,
            })
            .collect();
        match name.trim_start_matches('.') {
            "" => "_".to_string(),
            trimmed => trimmed.to_string(),
        }
    }

    fn temp_path(&self, file: &str) -> PathBuf {
        self.temp_dir.join(Self::safe_name(file))
    }

    fn ready_path(&self, file: &str) -> PathBuf {
        self.ready_dir.join(Self::safe_name(file))
    }

    fn current_len(path: &Path) -> u64 {
        std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
    }
}

impl ChunkAllocator for DiskAllocator {
    fn next_available_chunk(&self, file: &str, size: u64) -> Option<u64> {
        if self.active.lock().contains(&Self::safe_name(file)) {
            return None;
        }
        if self.ready_path(file).exists() {
            return None;
        }
        let offset = Self::current_len(&self.temp_path(file));
        (offset < size || size == 0).then_some(offset)
    }

    fn open_part(&self, file: &str, _size: u64, offset: u64) -> io::Result<Box<dyn PartSink>> {
        let key = Self::safe_name(file);
        if !self.active.lock().insert(key.clone()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{file} already has an active part"),
            ));
        }
        let claim = Claim {
            key,
            active: self.active.clone(),
        };

        std::fs::create_dir_all(&self.temp_dir)?;
        let path = self.temp_path(file);
        let std_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        // Bytes past the resume point are discarded.
        std_file.set_len(offset)?;
        let mut std_file = std_file;
        io::Seek::seek(&mut std_file, io::SeekFrom::Start(offset))?;
        debug!(path = %path.display(), offset, "opened part");

        Ok(Box::new(Part {
            file: tokio::fs::File::from_std(std_file),
            _claim: claim,
        }))
    }

    fn check_completed_file(&self, file: &str, size: u64) -> io::Result<bool> {
        let temp = self.temp_path(file);
        let len = Self::current_len(&temp);
        if len == 0 || len < size {
            return Ok(false);
        }
        std::fs::create_dir_all(&self.ready_dir)?;
        let ready = self.ready_path(file);
        std::fs::rename(&temp, &ready)?;
        info!(path = %ready.display(), len, "file complete");
        Ok(true)
    }
}

struct Claim {
    key: String,
    active: Arc<Mutex<HashSet<String>>>,
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.active.lock().remove(&self.key);
    }
}

struct Part {
    file: tokio::fs::File,
    _claim: Claim,
}

impl AsyncWrite for Part {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_shutdown(cx)
    }
}
