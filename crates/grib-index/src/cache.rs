//! On-disk index cache keyed by source identity.
//!
//! The cache directory mirrors source paths, so `/data/gfs/a.grib2` is
//! cached as `<root>/data/gfs/a.grib2.gbx9` (scanned records) and
//! `<root>/data/gfs/a.grib2.ncx3` (per-file collection). Aggregated
//! collections live under `<root>/_collections/<name>.ncx3`.
//!
//! Every entry records the identity of the sources it was built from. A
//! lookup whose identity differs, or whose entry cannot be read for any
//! reason, is a cache miss.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use grib_parser::RawRecord;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::collection::Collection;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::format::{self, IndexKind};

const COLLECTIONS_DIR: &str = "_collections";

/// Identity of a source file: canonical path, size and modification time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub modified_secs: i64,
    pub modified_nanos: u32,
}

impl SourceIdentity {
    /// Read the identity of `path` from the filesystem.
    pub fn of(path: impl AsRef<Path>) -> Result<Self> {
        let path = fs::canonicalize(path.as_ref())?;
        let metadata = fs::metadata(&path)?;
        let (modified_secs, modified_nanos) = match metadata.modified()?.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                (-(d.as_secs() as i64), d.subsec_nanos())
            }
        };
        Ok(Self {
            path,
            size: metadata.len(),
            modified_secs,
            modified_nanos,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEntry<T> {
    sources: Vec<SourceIdentity>,
    body: T,
}

/// Result of a scour pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScourReport {
    pub files_removed: usize,
    pub bytes_removed: u64,
    pub bytes_remaining: u64,
}

/// Handle to an index cache directory.
///
/// Created once and passed to whichever component needs it.
#[derive(Debug, Clone)]
pub struct DiskIndexCache {
    root: PathBuf,
    fingerprint: u32,
}

impl DiskIndexCache {
    pub fn new(root: impl Into<PathBuf>, config: &IndexConfig) -> Self {
        Self {
            root: root.into(),
            fingerprint: config.fingerprint(),
        }
    }

    /// Cache configured by `config.cache_dir`, if any.
    pub fn from_config(config: &IndexConfig) -> Option<Self> {
        config.cache_dir.as_ref().map(|dir| Self::new(dir, config))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the index of kind `kind` for `source` is stored.
    pub fn entry_path(&self, source: &Path, kind: IndexKind) -> PathBuf {
        let mut path = self.root.clone();
        for component in source.components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(kind.extension());
        PathBuf::from(name)
    }

    pub fn aggregate_path(&self, name: &str) -> PathBuf {
        self.root
            .join(COLLECTIONS_DIR)
            .join(format!("{}.{}", name, IndexKind::Collection.extension()))
    }

    /// Per-file collection for `source`, or `None` on a miss.
    pub fn load(&self, source: &SourceIdentity) -> Option<Collection> {
        let path = self.entry_path(&source.path, IndexKind::Collection);
        self.read_entry(&path, IndexKind::Collection, std::slice::from_ref(source))
    }

    pub fn store(&self, source: &SourceIdentity, collection: &Collection) -> Result<PathBuf> {
        let path = self.entry_path(&source.path, IndexKind::Collection);
        self.write_entry(&path, IndexKind::Collection, std::slice::from_ref(source), collection)?;
        Ok(path)
    }

    /// Scanned records of `source`, or `None` on a miss.
    pub fn load_records(&self, source: &SourceIdentity) -> Option<Vec<RawRecord>> {
        let path = self.entry_path(&source.path, IndexKind::Records);
        self.read_entry(&path, IndexKind::Records, std::slice::from_ref(source))
    }

    pub fn store_records(&self, source: &SourceIdentity, records: &[RawRecord]) -> Result<PathBuf> {
        let path = self.entry_path(&source.path, IndexKind::Records);
        self.write_entry(&path, IndexKind::Records, std::slice::from_ref(source), &records)?;
        Ok(path)
    }

    /// Aggregated collection `name`, valid only for exactly `sources`.
    pub fn load_aggregate(&self, name: &str, sources: &[SourceIdentity]) -> Option<Collection> {
        self.read_entry(&self.aggregate_path(name), IndexKind::Collection, sources)
    }

    pub fn store_aggregate(
        &self,
        name: &str,
        sources: &[SourceIdentity],
        collection: &Collection,
    ) -> Result<PathBuf> {
        let path = self.aggregate_path(name);
        self.write_entry(&path, IndexKind::Collection, sources, collection)?;
        Ok(path)
    }

    fn read_entry<T: DeserializeOwned>(
        &self,
        path: &Path,
        kind: IndexKind,
        sources: &[SourceIdentity],
    ) -> Option<T> {
        if !path.exists() {
            debug!(path = %path.display(), "Index cache miss: no entry");
            return None;
        }
        match format::read_file::<CacheEntry<T>>(path, kind, self.fingerprint) {
            Ok(entry) if entry.sources == sources => {
                debug!(path = %path.display(), "Index cache hit");
                Some(entry.body)
            }
            Ok(_) => {
                debug!(path = %path.display(), "Index cache miss: sources changed");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable index cache entry");
                None
            }
        }
    }

    fn write_entry<T: Serialize>(
        &self,
        path: &Path,
        kind: IndexKind,
        sources: &[SourceIdentity],
        body: &T,
    ) -> Result<()> {
        let entry = CacheEntry {
            sources: sources.to_vec(),
            body,
        };
        format::write_file(path, kind, self.fingerprint, &entry)?;
        debug!(path = %path.display(), "Stored index cache entry");
        Ok(())
    }

    /// Delete the least recently modified index files until the cache holds
    /// at most `max_bytes`.
    pub fn scour(&self, max_bytes: u64) -> Result<ScourReport> {
        let mut entries = Vec::new();
        let mut total = 0u64;

        if !self.root.exists() {
            return Ok(ScourReport::default());
        }

        for entry in WalkDir::new(&self.root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let is_index = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .and_then(IndexKind::from_extension)
                .is_some();
            if !is_index {
                continue;
            }
            let metadata = entry.metadata().map_err(std::io::Error::from)?;
            let modified = metadata.modified()?;
            total += metadata.len();
            entries.push((modified, entry.path().to_path_buf(), metadata.len()));
        }

        entries.sort();

        let mut report = ScourReport::default();
        for (_, path, len) in entries {
            if total <= max_bytes {
                break;
            }
            fs::remove_file(&path)?;
            total -= len;
            report.files_removed += 1;
            report.bytes_removed += len;
            debug!(path = %path.display(), bytes = len, "Scoured index file");
        }
        report.bytes_remaining = total;

        info!(
            root = %self.root.display(),
            removed = report.files_removed,
            bytes_removed = report.bytes_removed,
            bytes_remaining = report.bytes_remaining,
            "Index cache scoured"
        );
        Ok(report)
    }
}
