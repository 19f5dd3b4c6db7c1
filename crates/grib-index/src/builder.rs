//! Per-file index building.
//!
//! Records are grouped by [`ParameterKey`], each group gets its own sorted
//! axes, and every record is placed in the dense index table of its
//! variable. Building is a pure function of the record list, so the same
//! file always yields the same collection.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use grib_parser::tables::ParameterTables;
use grib_parser::{scan_file, GribRecord, GridDefinition, RawRecord};
use tracing::{debug, info, instrument, warn};

use crate::cache::{DiskIndexCache, SourceIdentity};
use crate::collection::{Collection, IndexEntry, Variable};
use crate::config::IndexConfig;
use crate::coords::{CoordinateAxis, IntervalSelector};
use crate::error::{IndexError, Result};
use crate::extract::{variable_name, CoordTuple, CoordinateExtractor, ParameterKey};

/// Two records claimed the same cell of a variable. The first one was kept.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateRecord {
    pub variable: String,
    pub tuple: CoordTuple,
    pub kept: IndexEntry,
    pub discarded: IndexEntry,
}

/// What happened while building an index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    /// Records handed to the builder.
    pub records: usize,
    /// Records placed in an index table.
    pub indexed: usize,
    /// Wider intervals not indexed because a narrower one shares their end.
    pub derived_intervals: usize,
    /// Records whose coordinates could not be extracted.
    pub skipped: usize,
    pub duplicates: Vec<DuplicateRecord>,
}

impl BuildReport {
    pub fn merge(&mut self, other: BuildReport) {
        self.records += other.records;
        self.indexed += other.indexed;
        self.derived_intervals += other.derived_intervals;
        self.skipped += other.skipped;
        self.duplicates.extend(other.duplicates);
    }
}

/// Index of one source file.
#[derive(Debug, Clone)]
pub struct FileIndex {
    pub source: SourceIdentity,
    pub collection: Collection,
    pub report: BuildReport,
    /// The collection came from the disk cache; `report` is empty.
    pub from_cache: bool,
}

/// Builds collections from scanned records.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    config: IndexConfig,
    extractor: CoordinateExtractor,
    tables: Arc<ParameterTables>,
}

impl IndexBuilder {
    pub fn new(config: IndexConfig) -> Self {
        Self {
            extractor: CoordinateExtractor::new(&config),
            config,
            tables: Arc::new(ParameterTables::builtin()),
        }
    }

    /// Use custom parameter tables for variable names.
    pub fn with_tables(mut self, tables: ParameterTables) -> Self {
        self.tables = Arc::new(tables);
        self
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn tables(&self) -> &ParameterTables {
        &self.tables
    }

    /// Scan every record of `path`. A malformed or truncated record fails
    /// the whole file.
    pub fn scan_records(&self, path: &Path) -> Result<Vec<RawRecord>> {
        let scanner = scan_file(path, self.config.scan).map_err(|e| IndexError::from_scan(path, e))?;
        scanner
            .map(|r| r.map_err(|e| IndexError::from_scan(path, e)))
            .collect()
    }

    /// Index one file, reusing cached indexes when their identity matches.
    #[instrument(skip(self, path, cache), fields(path = %path.display()))]
    pub fn index_file(&self, path: &Path, cache: Option<&DiskIndexCache>) -> Result<FileIndex> {
        let source = SourceIdentity::of(path)?;

        if let Some(collection) = cache.and_then(|c| c.load(&source)) {
            debug!(variables = collection.variables.len(), "Using cached collection index");
            return Ok(FileIndex {
                source,
                collection,
                report: BuildReport::default(),
                from_cache: true,
            });
        }

        let records = match cache.and_then(|c| c.load_records(&source)) {
            Some(records) => records,
            None => {
                let records = self.scan_records(&source.path)?;
                if let Some(cache) = cache {
                    if let Err(e) = cache.store_records(&source, &records) {
                        warn!(error = %e, "Failed to cache record index");
                    }
                }
                records
            }
        };

        let name = source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (collection, report) =
            self.build(&name, vec![source.path.clone()], records.iter().map(|r| (0, r)));

        if let Some(cache) = cache {
            if let Err(e) = cache.store(&source, &collection) {
                warn!(error = %e, "Failed to cache collection index");
            }
        }

        info!(
            records = report.records,
            variables = collection.variables.len(),
            duplicates = report.duplicates.len(),
            "Indexed file"
        );

        Ok(FileIndex {
            source,
            collection,
            report,
            from_cache: false,
        })
    }

    /// Build a collection over `files` from `(file index, record)` pairs.
    pub fn build<'a>(
        &self,
        name: &str,
        files: Vec<PathBuf>,
        records: impl IntoIterator<Item = (u32, &'a RawRecord)>,
    ) -> (Collection, BuildReport) {
        let mut report = BuildReport::default();
        let mut groups: BTreeMap<ParameterKey, Vec<(CoordTuple, IndexEntry)>> = BTreeMap::new();
        let mut grids: BTreeMap<u32, GridDefinition> = BTreeMap::new();

        for (file, record) in records {
            report.records += 1;
            match self.extractor.extract(record) {
                Ok((key, tuple)) => {
                    grids
                        .entry(key.grid_hash)
                        .or_insert_with(|| record.grid().clone());
                    groups
                        .entry(key)
                        .or_default()
                        .push((tuple, IndexEntry::new(file, record.locator())));
                }
                Err(e) => {
                    warn!(pos = record.locator().pos, error = %e, "Skipping record");
                    report.skipped += 1;
                }
            }
        }

        let grid_index: BTreeMap<u32, usize> =
            grids.keys().enumerate().map(|(i, &hash)| (hash, i)).collect();
        let names = unique_names(groups.keys(), &self.tables);

        let mut variables = Vec::with_capacity(groups.len());
        for ((key, tuples), name) in groups.into_iter().zip(names) {
            let grid = grid_index.get(&key.grid_hash).copied().unwrap_or(0);
            let variable = self.build_variable(name, key, grid, tuples, &mut report);
            variables.push(variable);
        }

        let mut collection = Collection {
            name: name.to_string(),
            files,
            grids: grids.into_values().collect(),
            variables,
        };
        collection.sort_variables();
        (collection, report)
    }

    fn build_variable(
        &self,
        name: String,
        key: ParameterKey,
        grid: usize,
        tuples: Vec<(CoordTuple, IndexEntry)>,
        report: &mut BuildReport,
    ) -> Variable {
        let selector = IntervalSelector::new(
            self.config.interval_policy,
            tuples.iter().map(|(t, _)| (t.run, &t.time)),
        );
        let (kept, derived): (Vec<_>, Vec<_>) = tuples
            .into_iter()
            .partition(|(t, _)| selector.keep(t.run, &t.time));
        if !derived.is_empty() {
            debug!(variable = %name, count = derived.len(), "Wider intervals left derivable");
        }
        report.derived_intervals += derived.len();

        let mut variable = Variable::new(
            name,
            key,
            grid,
            CoordinateAxis::from_values(kept.iter().map(|(t, _)| t.run)),
            CoordinateAxis::from_values(kept.iter().filter_map(|(t, _)| t.ensemble)),
            CoordinateAxis::from_values(kept.iter().map(|(t, _)| t.time)),
            CoordinateAxis::from_values(kept.iter().filter_map(|(t, _)| t.level)),
        );

        for (tuple, entry) in kept {
            let Some(cell) = variable.cell_of(&tuple) else {
                continue;
            };
            match variable.set_entry(cell, entry) {
                Ok(()) => report.indexed += 1,
                Err(Some(kept)) => {
                    warn!(
                        variable = %variable.name,
                        time = %tuple.time,
                        kept = kept.pos,
                        discarded = entry.pos,
                        "Duplicate record, keeping first"
                    );
                    report.duplicates.push(DuplicateRecord {
                        variable: variable.name.clone(),
                        tuple,
                        kept,
                        discarded: entry,
                    });
                }
                Err(None) => {}
            }
        }

        variable
    }
}

/// Variable names for `keys` (in key order), with collisions suffixed
/// `_2`, `_3`, ... in the same order.
pub(crate) fn unique_names<'a>(
    keys: impl Iterator<Item = &'a ParameterKey>,
    tables: &ParameterTables,
) -> Vec<String> {
    dedupe_names(keys.map(|k| variable_name(k, tables)).collect())
}

/// First occurrences keep their name. A suffix already taken by any other
/// name is skipped, so every result is distinct.
fn dedupe_names(base: Vec<String>) -> Vec<String> {
    let mut taken: BTreeSet<String> = base.iter().cloned().collect();
    let mut first_seen: BTreeSet<&str> = BTreeSet::new();
    let mut next_suffix: BTreeMap<&str, usize> = BTreeMap::new();
    base.iter()
        .map(|name| {
            if first_seen.insert(name.as_str()) {
                return name.clone();
            }
            let suffix = next_suffix.entry(name.as_str()).or_insert(1);
            loop {
                *suffix += 1;
                let candidate = format!("{}_{}", name, suffix);
                if taken.insert(candidate.clone()) {
                    return candidate;
                }
            }
        })
        .collect()
}
