//! Configured collections and their recheck cycle.
//!
//! A [`CollectionManager`] owns the current snapshot of one collection.
//! Rechecks compare the identities of the discovered source files with
//! those the snapshot was built from and install a new snapshot as a
//! whole; readers holding the previous one keep a consistent view.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::aggregate::{AggregationOutcome, AggregationPlanner, JoinSpec};
use crate::cache::SourceIdentity;
use crate::collection::Collection;
use crate::error::{IndexError, Result};
use crate::format::IndexKind;
use crate::pool::FilePool;
use crate::reader::SliceReader;

fn default_recheck_secs() -> u64 {
    300
}

fn default_recursive() -> bool {
    true
}

/// Where a collection's source files come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSpec {
    /// Every file below `dir` whose name ends with `suffix`, in path order.
    Directory {
        dir: PathBuf,
        #[serde(default)]
        suffix: Option<String>,
        #[serde(default = "default_recursive")]
        recursive: bool,
    },
    /// Explicit files, in the given order.
    Files { files: Vec<PathBuf> },
}

/// Definition of one aggregated collection, usually loaded from YAML:
///
/// ```yaml
/// name: gfs_0p25
/// source:
///   kind: directory
///   dir: /data/gfs
///   suffix: .grib2
/// join:
///   type: forecast_model_run
///   run_date: "%Y%m%d%H"
/// recheck_secs: 600
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    pub source: SourceSpec,
    pub join: JoinSpec,
    #[serde(default = "default_recheck_secs")]
    pub recheck_secs: u64,
}

impl CollectionSpec {
    pub fn from_yaml_str(contents: &str) -> Result<Self> {
        let spec: Self = serde_yaml::from_str(contents)
            .map_err(|e| IndexError::invalid_config(format!("collection definition: {}", e)))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(IndexError::invalid_config(format!(
                "invalid collection name '{}'",
                self.name
            )));
        }
        if let JoinSpec::ForecastModelRun {
            run_date: Some(pattern),
        } = &self.join
        {
            if !pattern.is_valid() {
                return Err(IndexError::invalid_config(format!(
                    "invalid run date format '{}'",
                    pattern.format
                )));
            }
        }
        if self.recheck_secs == 0 {
            return Err(IndexError::invalid_config("recheck_secs must be > 0"));
        }
        Ok(())
    }

    /// Current source files, in aggregation order.
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        match &self.source {
            SourceSpec::Files { files } => Ok(files.clone()),
            SourceSpec::Directory {
                dir,
                suffix,
                recursive,
            } => {
                if !dir.is_dir() {
                    return Err(IndexError::invalid_config(format!(
                        "source directory {} does not exist",
                        dir.display()
                    )));
                }
                let max_depth = if *recursive { usize::MAX } else { 1 };
                let mut files: Vec<PathBuf> = WalkDir::new(dir)
                    .max_depth(max_depth)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
                    .filter(|p| {
                        let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                        let is_index = p
                            .extension()
                            .and_then(|e| e.to_str())
                            .and_then(IndexKind::from_extension)
                            .is_some();
                        !is_index && suffix.as_deref().map_or(true, |s| name.ends_with(s))
                    })
                    .collect();
                files.sort();
                Ok(files)
            }
        }
    }
}

/// One consistent state of a managed collection.
#[derive(Debug)]
pub struct Snapshot {
    pub collection: Arc<Collection>,
    /// Identities of the files in the collection.
    pub sources: Vec<SourceIdentity>,
    /// Identities of every discovered file, including failed ones.
    inputs: Vec<SourceIdentity>,
    /// Files that failed to index.
    pub failed: Vec<PathBuf>,
    pub built_at: DateTime<Utc>,
}

/// What a recheck did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckOutcome {
    Unchanged,
    /// New files were appended to the existing collection.
    Extended { added: usize },
    /// The collection was rebuilt from every source file.
    Rebuilt { files: usize },
}

/// Keeps one collection current with its source files.
#[derive(Debug)]
pub struct CollectionManager {
    spec: CollectionSpec,
    planner: AggregationPlanner,
    state: RwLock<Arc<Snapshot>>,
    recheck_lock: Mutex<()>,
    /// Pools handed to readers; rebuilds evict their idle handles.
    pools: Mutex<Vec<Weak<FilePool>>>,
}

impl CollectionManager {
    /// Build the collection for the first time.
    pub fn open(spec: CollectionSpec, planner: AggregationPlanner) -> Result<Self> {
        spec.validate()?;
        let (files, inputs) = discover_inputs(&spec)?;
        let outcome = planner.plan(&spec.name, &files, &spec.join)?;
        let snapshot = snapshot(outcome, inputs);
        info!(
            collection = %spec.name,
            variables = snapshot.collection.variables.len(),
            files = snapshot.sources.len(),
            "Collection opened"
        );
        Ok(Self {
            spec,
            planner,
            state: RwLock::new(Arc::new(snapshot)),
            recheck_lock: Mutex::new(()),
            pools: Mutex::new(Vec::new()),
        })
    }

    pub fn spec(&self) -> &CollectionSpec {
        &self.spec
    }

    pub fn planner(&self) -> &AggregationPlanner {
        &self.planner
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn collection(&self) -> Arc<Collection> {
        self.snapshot().collection.clone()
    }

    /// Slice reader over the current snapshot.
    ///
    /// The pool is remembered so that a rebuild closes its idle handles on
    /// files the previous snapshot read.
    pub fn reader(&self, pool: Arc<FilePool>) -> SliceReader {
        {
            let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
            pools.retain(|p| p.strong_count() > 0);
            if !pools.iter().any(|p| p.as_ptr() == Arc::as_ptr(&pool)) {
                pools.push(Arc::downgrade(&pool));
            }
        }
        SliceReader::new(
            self.collection(),
            pool,
            self.planner.builder().config().scan_mode,
        )
    }

    /// Compare source files with the current snapshot and rebuild or
    /// extend the collection when they changed.
    #[instrument(skip(self), fields(collection = %self.spec.name))]
    pub fn recheck(&self) -> Result<RecheckOutcome> {
        let _guard = self.recheck_lock.lock().unwrap_or_else(|e| e.into_inner());
        let current = self.snapshot();
        let (files, inputs) = discover_inputs(&self.spec)?;

        if inputs == current.inputs {
            debug!("Sources unchanged");
            return Ok(RecheckOutcome::Unchanged);
        }

        let appended = self.spec.join.is_incremental()
            && current.failed.is_empty()
            && inputs.len() > current.inputs.len()
            && inputs.starts_with(&current.inputs);

        if appended {
            let new_files: Vec<PathBuf> = files[current.inputs.len()..].to_vec();
            match self.planner.extend(
                &self.spec.name,
                (*current.collection).clone(),
                current.sources.clone(),
                &new_files,
                &self.spec.join,
            ) {
                Ok(outcome) => {
                    let added = outcome.sources.len() - current.sources.len();
                    self.install(snapshot(outcome, inputs));
                    info!(added, "Collection extended");
                    return Ok(RecheckOutcome::Extended { added });
                }
                Err(e) => warn!(error = %e, "Incremental extension failed, rebuilding"),
            }
        }

        let outcome = self.planner.plan(&self.spec.name, &files, &self.spec.join)?;
        let count = outcome.sources.len();
        self.install(snapshot(outcome, inputs));
        self.evict_idle(&current.collection.files);
        info!(files = count, "Collection rebuilt");
        Ok(RecheckOutcome::Rebuilt { files: count })
    }

    fn install(&self, snapshot: Snapshot) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::new(snapshot);
    }

    fn evict_idle(&self, files: &[PathBuf]) {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools.retain(|pool| match pool.upgrade() {
            Some(pool) => {
                pool.evict(files);
                true
            }
            None => false,
        });
    }
}

fn snapshot(outcome: AggregationOutcome, inputs: Vec<SourceIdentity>) -> Snapshot {
    Snapshot {
        failed: outcome.failed.into_iter().map(|(p, _)| p).collect(),
        collection: Arc::new(outcome.collection),
        sources: outcome.sources,
        inputs,
        built_at: Utc::now(),
    }
}

/// Discovered files that still exist, with their identities.
fn discover_inputs(spec: &CollectionSpec) -> Result<(Vec<PathBuf>, Vec<SourceIdentity>)> {
    let mut files = Vec::new();
    let mut inputs = Vec::new();
    for path in spec.discover()? {
        match SourceIdentity::of(&path) {
            Ok(identity) => {
                files.push(path);
                inputs.push(identity);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Source file disappeared"),
        }
    }
    Ok((files, inputs))
}
