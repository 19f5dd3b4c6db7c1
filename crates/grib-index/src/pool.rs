//! Bounded pool of open source-file handles.
//!
//! Slice reads acquire a handle, read one message and release it. Released
//! handles stay open in an LRU of at most `max_open` idle entries; the
//! least recently used handle is closed when the pool is full. Every
//! acquired handle goes back through [`PooledFile`]'s `Drop`, so handles
//! are returned or closed on every exit path.
//!
//! An idle handle remembers the size and modification time of the file it
//! opened. When the file at its path no longer matches, the handle is
//! closed and the path reopened.

use std::fs::{self, File, Metadata};
use std::num::NonZeroUsize;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use lru::LruCache;
use tracing::debug;

use crate::error::Result;

/// Handle pool statistics.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub opened: u64,
    pub closed: u64,
    /// Acquisitions served by an idle handle.
    pub hits: u64,
    /// Idle handles closed because their file changed.
    pub stale: u64,
    pub idle: usize,
}

impl PoolStats {
    /// Handles currently open (idle or in use).
    pub fn open(&self) -> u64 {
        self.opened - self.closed
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.opened;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Size and modification time a handle was opened against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    size: u64,
    modified: Option<SystemTime>,
}

impl FileStamp {
    fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            size: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

struct IdleFile {
    file: File,
    stamp: FileStamp,
}

struct PoolInner {
    idle: LruCache<PathBuf, IdleFile>,
    stats: PoolStats,
}

/// Pool of read-only file handles keyed by path.
pub struct FilePool {
    inner: Mutex<PoolInner>,
}

impl FilePool {
    pub fn new(max_open: usize) -> Self {
        let capacity = NonZeroUsize::new(max_open).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(PoolInner {
                idle: LruCache::new(capacity),
                stats: PoolStats::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take an idle handle for `path` or open a new one.
    pub fn acquire(&self, path: &Path) -> Result<PooledFile<'_>> {
        let idle = self.lock().idle.pop(path);
        if let Some(idle) = idle {
            let current = fs::metadata(path).map(|m| FileStamp::from_metadata(&m));
            let mut inner = self.lock();
            if current.is_ok_and(|stamp| stamp == idle.stamp) {
                inner.stats.hits += 1;
                return Ok(PooledFile {
                    pool: self,
                    path: path.to_path_buf(),
                    stamp: idle.stamp,
                    file: Some(idle.file),
                });
            }
            drop(idle);
            inner.stats.closed += 1;
            inner.stats.stale += 1;
            debug!(path = %path.display(), "Closed stale source file");
        }

        let file = File::open(path)?;
        let stamp = FileStamp::from_metadata(&file.metadata()?);
        self.lock().stats.opened += 1;
        debug!(path = %path.display(), "Opened source file");
        Ok(PooledFile {
            pool: self,
            path: path.to_path_buf(),
            stamp,
            file: Some(file),
        })
    }

    fn release(&self, path: PathBuf, stamp: FileStamp, file: File) {
        let mut inner = self.lock();
        // `push` hands back the replaced or evicted entry
        if let Some((evicted, handle)) = inner.idle.push(path, IdleFile { file, stamp }) {
            drop(handle);
            inner.stats.closed += 1;
            debug!(path = %evicted.display(), "Closed source file");
        }
    }

    /// Close the idle handles of `paths`.
    pub fn evict<P: AsRef<Path>>(&self, paths: impl IntoIterator<Item = P>) {
        let mut inner = self.lock();
        for path in paths {
            if inner.idle.pop(path.as_ref()).is_some() {
                inner.stats.closed += 1;
                debug!(path = %path.as_ref().display(), "Evicted source file");
            }
        }
    }

    /// Close every idle handle.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let count = inner.idle.len() as u64;
        inner.idle.clear();
        inner.stats.closed += count;
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            idle: inner.idle.len(),
            ..inner.stats.clone()
        }
    }
}

impl std::fmt::Debug for FilePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilePool").field("stats", &self.stats()).finish()
    }
}

/// A handle borrowed from a [`FilePool`]; returned to it on drop.
pub struct PooledFile<'a> {
    pool: &'a FilePool,
    path: PathBuf,
    stamp: FileStamp,
    file: Option<File>,
}

impl PooledFile<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Deref for PooledFile<'_> {
    type Target = File;

    fn deref(&self) -> &File {
        // Only taken in drop
        self.file.as_ref().expect("pooled file present until drop")
    }
}

impl DerefMut for PooledFile<'_> {
    fn deref_mut(&mut self) -> &mut File {
        self.file.as_mut().expect("pooled file present until drop")
    }
}

impl Drop for PooledFile<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool
                .release(std::mem::take(&mut self.path), self.stamp, file);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn files(n: usize) -> (tempfile::TempDir, Vec<PathBuf>) {
        let dir = tempfile::tempdir().unwrap();
        let paths = (0..n)
            .map(|i| {
                let path = dir.path().join(format!("f{}.grib2", i));
                std::fs::write(&path, format!("file {}", i)).unwrap();
                path
            })
            .collect();
        (dir, paths)
    }

    #[test]
    fn test_released_handle_is_reused() {
        let (_dir, paths) = files(1);
        let pool = FilePool::new(4);

        {
            let mut f = pool.acquire(&paths[0]).unwrap();
            let mut s = String::new();
            f.read_to_string(&mut s).unwrap();
            assert_eq!(s, "file 0");
        }
        let _again = pool.acquire(&paths[0]).unwrap();

        let stats = pool.stats();
        assert_eq!(stats.opened, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.idle, 0);
    }

    #[test]
    fn test_idle_handles_are_bounded() {
        let (_dir, paths) = files(5);
        let pool = FilePool::new(2);

        for _ in 0..100 {
            for path in &paths {
                drop(pool.acquire(path).unwrap());
            }
        }

        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.open(), 2);
        assert_eq!(stats.opened, stats.closed + 2);

        pool.clear();
        assert_eq!(pool.stats().open(), 0);
    }

    #[test]
    fn test_concurrent_handles_for_same_path() {
        let (_dir, paths) = files(1);
        let pool = FilePool::new(4);

        let a = pool.acquire(&paths[0]).unwrap();
        let b = pool.acquire(&paths[0]).unwrap();
        drop(a);
        drop(b);

        // The second release replaces the first idle handle, which is closed
        let stats = pool.stats();
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn test_replaced_file_is_reopened() {
        let (dir, paths) = files(1);
        let pool = FilePool::new(4);
        drop(pool.acquire(&paths[0]).unwrap());

        let replacement = dir.path().join("next.grib2");
        std::fs::write(&replacement, "replaced file 0").unwrap();
        std::fs::rename(&replacement, &paths[0]).unwrap();

        let mut s = String::new();
        pool.acquire(&paths[0])
            .unwrap()
            .read_to_string(&mut s)
            .unwrap();
        assert_eq!(s, "replaced file 0");

        let stats = pool.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.stale, 1);
        assert_eq!(stats.opened, 2);
        assert_eq!(stats.idle, 1);
    }

    #[test]
    fn test_evict_closes_idle_handles() {
        let (_dir, paths) = files(3);
        let pool = FilePool::new(4);
        for path in &paths {
            drop(pool.acquire(path).unwrap());
        }

        pool.evict(&paths[..2]);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.closed, 2);

        drop(pool.acquire(&paths[2]).unwrap());
        assert_eq!(pool.stats().hits, 1);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let pool = FilePool::new(1);
        assert!(pool.acquire(Path::new("/nonexistent/file.grib2")).is_err());
        assert_eq!(pool.stats().opened, 0);
    }
}
