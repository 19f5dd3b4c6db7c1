//! Multi-file aggregation.
//!
//! Files are indexed in parallel, one file per worker, and the resulting
//! per-file collections are merged by a single-threaded reduction. Every
//! merged variable gets fresh axes and each source entry is scattered into
//! it through its coordinate tuple, so a cell of the merged table resolves
//! to at most one record.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use grib_parser::GridDefinition;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::builder::{unique_names, BuildReport, DuplicateRecord, FileIndex, IndexBuilder};
use crate::cache::{DiskIndexCache, SourceIdentity};
use crate::collection::{Collection, IndexEntry, Variable};
use crate::config::IntervalPolicy;
use crate::coords::{CoordinateAxis, IntervalSelector, LevelCoord, TimeCoord};
use crate::error::{AggregationError, IndexError, Result};
use crate::extract::ParameterKey;

/// Dimension a `join_existing` aggregation concatenates along.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDimension {
    Run,
    Time,
}

impl JoinDimension {
    pub fn name(self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::Time => "time",
        }
    }
}

/// How per-file collections are combined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JoinSpec {
    /// Concatenate along one dimension; every other axis must match.
    JoinExisting {
        dimension: JoinDimension,
        /// Order join values instead of requiring files in ascending order.
        #[serde(default)]
        sort: bool,
    },
    /// Combine distinct variables from files sharing the same runs.
    Union {
        /// Per file name, variable renames applied before merging.
        #[serde(default)]
        renames: BTreeMap<String, BTreeMap<String, String>>,
    },
    /// Run x forecast-offset space; offsets absent from a run stay missing.
    ForecastModelRun {
        /// Take each file's run time from its name instead of its records.
        #[serde(default)]
        run_date: Option<RunDatePattern>,
    },
}

impl JoinSpec {
    /// Whether files that fail to index may be left out.
    pub fn tolerates_gaps(&self) -> bool {
        !matches!(self, Self::Union { .. })
    }

    /// Whether appended files can extend an existing collection in place.
    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::JoinExisting { .. })
    }

    fn fingerprint(&self) -> u32 {
        bincode::serialize(self)
            .map(|bytes| crc32fast::hash(&bytes))
            .unwrap_or_default()
    }
}

/// `chrono` format locating a run time inside a file name, e.g. `%Y%m%d%H`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunDatePattern {
    pub format: String,
}

impl RunDatePattern {
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }

    /// Width of the formatted date, or `None` for an unusable format.
    fn width(&self) -> Option<usize> {
        let sample = NaiveDate::from_ymd_opt(2000, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let mut text = String::new();
        write!(text, "{}", sample.format(&self.format)).ok()?;
        (!text.is_empty()).then_some(text.len())
    }

    pub fn is_valid(&self) -> bool {
        self.width().is_some()
    }

    fn parse(&self, text: &str) -> Option<DateTime<Utc>> {
        let parsed = NaiveDateTime::parse_from_str(text, &self.format)
            .or_else(|_| {
                NaiveDateTime::parse_from_str(&format!("{}00", text), &format!("{}%M", self.format))
            })
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(text, &self.format)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })?;
        Some(Utc.from_utc_datetime(&parsed))
    }

    /// First run time found in the file name of `path`.
    pub fn run_time(&self, path: &Path) -> Option<DateTime<Utc>> {
        let name = path.file_name()?.to_str()?;
        let width = self.width()?;
        if name.len() < width {
            return None;
        }
        (0..=name.len() - width)
            .filter(|&start| name.is_char_boundary(start) && name.is_char_boundary(start + width))
            .find_map(|start| self.parse(&name[start..start + width]))
    }
}

/// Result of planning an aggregation.
#[derive(Debug)]
pub struct AggregationOutcome {
    pub collection: Collection,
    /// Identities of the files the collection was built from.
    pub sources: Vec<SourceIdentity>,
    pub report: BuildReport,
    /// Files left out of the collection and why.
    pub failed: Vec<(PathBuf, IndexError)>,
    pub from_cache: bool,
}

impl AggregationOutcome {
    pub fn failed_paths(&self) -> Vec<&Path> {
        self.failed.iter().map(|(p, _)| p.as_path()).collect()
    }
}

struct Prepared {
    parts: Vec<Collection>,
    sources: Vec<SourceIdentity>,
    report: BuildReport,
    failed: Vec<(PathBuf, IndexError)>,
}

/// Axes and sources of one variable of the merged collection.
struct MergePlan<'a> {
    name: Option<String>,
    key: ParameterKey,
    runs: CoordinateAxis<DateTime<Utc>>,
    ensembles: CoordinateAxis<u16>,
    times: CoordinateAxis<TimeCoord>,
    levels: CoordinateAxis<LevelCoord>,
    /// (part index, variable)
    sources: Vec<(usize, &'a Variable)>,
}

impl<'a> MergePlan<'a> {
    /// Selector over every (run, time) the sources hold. Time values
    /// whose every record is superseded leave the merged axis.
    fn select_intervals(&mut self, policy: IntervalPolicy) -> IntervalSelector {
        let present: Vec<(DateTime<Utc>, TimeCoord)> = self
            .sources
            .iter()
            .flat_map(|&(_, source)| {
                source
                    .entries()
                    .filter_map(move |(cell, _)| source.tuple_at(cell))
                    .map(|tuple| (tuple.run, tuple.time))
            })
            .collect();
        let selector = IntervalSelector::new(policy, present.iter().map(|(run, time)| (*run, time)));

        let seen: BTreeSet<TimeCoord> = present.iter().map(|(_, time)| *time).collect();
        let kept: BTreeSet<TimeCoord> = present
            .iter()
            .filter(|(run, time)| selector.keep(*run, time))
            .map(|(_, time)| *time)
            .collect();
        if kept.len() < seen.len() {
            self.times = CoordinateAxis::from_values(
                self.times
                    .values()
                    .iter()
                    .filter(|time| kept.contains(*time) || !seen.contains(*time))
                    .cloned(),
            );
        }
        selector
    }

    fn from_source(name: Option<String>, part: usize, variable: &'a Variable) -> Self {
        Self {
            name,
            key: variable.key,
            runs: variable.runs.clone(),
            ensembles: variable.ensembles.clone(),
            times: variable.times.clone(),
            levels: variable.levels.clone(),
            sources: vec![(part, variable)],
        }
    }
}

/// Builds aggregated collections from sets of files.
#[derive(Debug)]
pub struct AggregationPlanner {
    builder: IndexBuilder,
    cache: Option<DiskIndexCache>,
    pool: Option<rayon::ThreadPool>,
}

impl AggregationPlanner {
    pub fn new(builder: IndexBuilder, cache: Option<DiskIndexCache>) -> Result<Self> {
        let pool = match builder.config().threads {
            Some(threads) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("grib-index-{}", i))
                    .build()
                    .map_err(|e| IndexError::invalid_config(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            builder,
            cache,
            pool,
        })
    }

    pub fn builder(&self) -> &IndexBuilder {
        &self.builder
    }

    pub fn cache(&self) -> Option<&DiskIndexCache> {
        self.cache.as_ref()
    }

    /// Index `files` in parallel. Results keep the order of `files`.
    pub fn index_files(&self, files: &[PathBuf]) -> Vec<(PathBuf, Result<FileIndex>)> {
        let work = || {
            files
                .par_iter()
                .map(|path| (path.clone(), self.builder.index_file(path, self.cache.as_ref())))
                .collect::<Vec<_>>()
        };
        match &self.pool {
            Some(pool) => pool.install(work),
            None => work(),
        }
    }

    /// Aggregate `files` into the collection `name`.
    #[instrument(skip(self, files, join), fields(files = files.len()))]
    pub fn plan(&self, name: &str, files: &[PathBuf], join: &JoinSpec) -> Result<AggregationOutcome> {
        if files.is_empty() {
            return Err(AggregationError::Empty.into());
        }

        let cache_name = aggregate_cache_name(name, join);
        if let Some(cache) = &self.cache {
            if let Ok(sources) = files.iter().map(SourceIdentity::of).collect::<Result<Vec<_>>>() {
                if let Some(collection) = cache.load_aggregate(&cache_name, &sources) {
                    info!(variables = collection.variables.len(), "Using cached aggregation");
                    return Ok(AggregationOutcome {
                        collection,
                        sources,
                        report: BuildReport::default(),
                        failed: Vec::new(),
                        from_cache: true,
                    });
                }
            }
        }

        let Prepared {
            parts,
            sources,
            mut report,
            failed,
        } = self.prepare(files, join)?;
        let (collection, merged) = self.merge(name, parts, join)?;
        report.merge(merged);

        if failed.is_empty() {
            self.store_aggregate(&cache_name, &sources, &collection);
        }

        info!(
            variables = collection.variables.len(),
            records = collection.record_count(),
            failed = failed.len(),
            duplicates = report.duplicates.len(),
            "Aggregation planned"
        );

        Ok(AggregationOutcome {
            collection,
            sources,
            report,
            failed,
            from_cache: false,
        })
    }

    /// Extend `base` with `files` appended after it.
    ///
    /// Only the new files are indexed; `base` takes part in the merge as
    /// a single source.
    #[instrument(skip(self, base, base_sources, files, join), fields(files = files.len()))]
    pub fn extend(
        &self,
        name: &str,
        base: Collection,
        base_sources: Vec<SourceIdentity>,
        files: &[PathBuf],
        join: &JoinSpec,
    ) -> Result<AggregationOutcome> {
        let Prepared {
            parts,
            sources,
            mut report,
            failed,
        } = self.prepare(files, join)?;

        let mut all_parts = Vec::with_capacity(parts.len() + 1);
        all_parts.push(base);
        all_parts.extend(parts);
        let (collection, merged) = self.merge(name, all_parts, join)?;
        report.merge(merged);

        let mut all_sources = base_sources;
        all_sources.extend(sources);
        if failed.is_empty() {
            self.store_aggregate(&aggregate_cache_name(name, join), &all_sources, &collection);
        }
        info!(
            variables = collection.variables.len(),
            added = files.len() - failed.len(),
            "Aggregation extended"
        );

        Ok(AggregationOutcome {
            collection,
            sources: all_sources,
            report,
            failed,
            from_cache: false,
        })
    }

    fn store_aggregate(&self, cache_name: &str, sources: &[SourceIdentity], collection: &Collection) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store_aggregate(cache_name, sources, collection) {
                warn!(error = %e, "Failed to cache aggregation");
            }
        }
    }

    /// Index `files` and shape each per-file collection for `join`.
    fn prepare(&self, files: &[PathBuf], join: &JoinSpec) -> Result<Prepared> {
        let mut prepared = Prepared {
            parts: Vec::with_capacity(files.len()),
            sources: Vec::with_capacity(files.len()),
            report: BuildReport::default(),
            failed: Vec::new(),
        };

        for (path, result) in self.index_files(files) {
            let part = result.and_then(|index| {
                let collection = match join {
                    JoinSpec::ForecastModelRun {
                        run_date: Some(pattern),
                    } => {
                        let run = pattern
                            .run_time(&path)
                            .ok_or_else(|| AggregationError::RunTimeUnavailable(path.clone()))?;
                        index.collection.with_run_time(run)?
                    }
                    _ => index.collection,
                };
                Ok((index.source, collection, index.report))
            });

            match part {
                Ok((source, collection, report)) => {
                    prepared.sources.push(source);
                    prepared.parts.push(collection);
                    prepared.report.merge(report);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping source file");
                    prepared.failed.push((path, e));
                }
            }
        }

        if !prepared.failed.is_empty() && !join.tolerates_gaps() {
            let paths = prepared.failed.into_iter().map(|(p, _)| p).collect();
            return Err(AggregationError::FilesFailed(paths).into());
        }
        Ok(prepared)
    }

    /// Merge per-file collections, in order, into one collection.
    ///
    /// The interval policy is applied again over the merged time axes, so
    /// a narrower interval from one file supersedes a wider one sharing
    /// its end in another. The returned report counts only what the merge
    /// itself dropped: records that lost a cell to an earlier source and
    /// intervals left derivable.
    pub fn merge(
        &self,
        name: &str,
        parts: Vec<Collection>,
        join: &JoinSpec,
    ) -> Result<(Collection, BuildReport)> {
        if parts.is_empty() {
            return Err(AggregationError::Empty.into());
        }

        let mut files = Vec::new();
        let mut offsets = Vec::with_capacity(parts.len());
        let mut grids: BTreeMap<u32, GridDefinition> = BTreeMap::new();
        for part in &parts {
            offsets.push(files.len() as u32);
            files.extend(part.files.iter().cloned());
            for grid in &part.grids {
                grids.entry(grid.hash).or_insert_with(|| grid.clone());
            }
        }
        let grid_index: BTreeMap<u32, usize> =
            grids.keys().enumerate().map(|(i, &hash)| (hash, i)).collect();

        let plans = match join {
            JoinSpec::JoinExisting { dimension, sort } => join_existing(&parts, *dimension, *sort)?,
            JoinSpec::Union { renames } => union(&parts, renames)?,
            JoinSpec::ForecastModelRun { .. } => forecast_model_run(&parts)?,
        };
        let generated = unique_names(plans.iter().map(|p| &p.key), self.builder.tables());

        let policy = self.builder.config().interval_policy;
        let mut report = BuildReport::default();
        let mut variables = Vec::with_capacity(plans.len());
        for (mut plan, generated) in plans.into_iter().zip(generated) {
            let selector = plan.select_intervals(policy);
            let grid = grid_index.get(&plan.key.grid_hash).copied().unwrap_or(0);
            let mut variable = Variable::new(
                plan.name.unwrap_or(generated),
                plan.key,
                grid,
                plan.runs,
                plan.ensembles,
                plan.times,
                plan.levels,
            );

            let mut derived = 0;
            for (part, source) in plan.sources {
                for (cell, entry) in source.entries() {
                    let Some(tuple) = source.tuple_at(cell) else {
                        continue;
                    };
                    if !selector.keep(tuple.run, &tuple.time) {
                        derived += 1;
                        continue;
                    }
                    let Some(target) = variable.cell_of(&tuple) else {
                        continue;
                    };
                    let entry = IndexEntry {
                        file: entry.file + offsets[part],
                        ..*entry
                    };
                    if let Err(Some(kept)) = variable.set_entry(target, entry) {
                        warn!(
                            variable = %variable.name,
                            time = %tuple.time,
                            "Duplicate record across sources, keeping first"
                        );
                        report.duplicates.push(DuplicateRecord {
                            variable: variable.name.clone(),
                            tuple,
                            kept,
                            discarded: entry,
                        });
                    }
                }
            }
            if derived > 0 {
                debug!(variable = %variable.name, count = derived, "Wider intervals left derivable");
            }
            report.derived_intervals += derived;
            variables.push(variable);
        }

        let mut collection = Collection {
            name: name.to_string(),
            files,
            grids: grids.into_values().collect(),
            variables,
        };
        collection.sort_variables();
        debug!(
            variables = collection.variables.len(),
            files = collection.files.len(),
            "Merged collections"
        );
        Ok((collection, report))
    }
}

/// Cache entry name of an aggregation; a different join is a different entry.
fn aggregate_cache_name(name: &str, join: &JoinSpec) -> String {
    format!("{}-{:08x}", name, join.fingerprint())
}

/// Variables of every part grouped by parameter key, in key order.
fn group_by_key(parts: &[Collection]) -> BTreeMap<ParameterKey, Vec<(usize, &Variable)>> {
    let mut groups: BTreeMap<ParameterKey, Vec<(usize, &Variable)>> = BTreeMap::new();
    for (i, part) in parts.iter().enumerate() {
        for variable in &part.variables {
            groups.entry(variable.key).or_default().push((i, variable));
        }
    }
    groups
}

fn check_axis<T: PartialEq>(
    variable: &Variable,
    dimension: &'static str,
    expected: &T,
    actual: &T,
    part: &Collection,
) -> std::result::Result<(), AggregationError> {
    if expected != actual {
        return Err(AggregationError::ShapeMismatch {
            variable: variable.name.clone(),
            dimension,
            path: part.display_path(),
        });
    }
    Ok(())
}

/// Concatenate axes in order, rejecting repeated values and, unless
/// `sort` is set, values that do not ascend.
fn join_axis<'a, T: Ord + Clone + Display + 'a>(
    dimension: &'static str,
    axes: impl IntoIterator<Item = (PathBuf, &'a CoordinateAxis<T>)>,
    sort: bool,
) -> std::result::Result<CoordinateAxis<T>, AggregationError> {
    let mut seen = BTreeSet::new();
    let mut values: Vec<T> = Vec::new();
    for (path, axis) in axes {
        for value in axis.values() {
            if !seen.insert(value.clone()) {
                return Err(AggregationError::DuplicateJoinValue {
                    dimension,
                    value: value.to_string(),
                    path,
                });
            }
            if !sort && values.last().is_some_and(|last| last > value) {
                return Err(AggregationError::OutOfOrder { dimension, path });
            }
            values.push(value.clone());
        }
    }
    Ok(CoordinateAxis::from_values(values))
}

fn join_existing(
    parts: &[Collection],
    dimension: JoinDimension,
    sort: bool,
) -> std::result::Result<Vec<MergePlan<'_>>, AggregationError> {
    let mut plans = Vec::new();
    for sources in group_by_key(parts).into_values() {
        let (_, first) = sources[0];
        if sources.len() != parts.len() {
            let present: BTreeSet<usize> = sources.iter().map(|(i, _)| *i).collect();
            let missing = (0..parts.len()).find(|i| !present.contains(i)).unwrap_or(0);
            return Err(AggregationError::ParameterMismatch {
                variable: first.name.clone(),
                path: parts[missing].display_path(),
            });
        }

        for &(i, variable) in &sources[1..] {
            let part = &parts[i];
            check_axis(variable, "ensemble", &first.ensembles, &variable.ensembles, part)?;
            check_axis(variable, "level", &first.levels, &variable.levels, part)?;
            match dimension {
                JoinDimension::Run => check_axis(variable, "time", &first.times, &variable.times, part)?,
                JoinDimension::Time => check_axis(variable, "run", &first.runs, &variable.runs, part)?,
            }
        }

        let paths = sources.iter().map(|(i, _)| parts[*i].display_path());
        let (runs, times) = match dimension {
            JoinDimension::Run => (
                join_axis("run", paths.zip(sources.iter().map(|(_, v)| &v.runs)), sort)?,
                first.times.clone(),
            ),
            JoinDimension::Time => (
                first.runs.clone(),
                join_axis("time", paths.zip(sources.iter().map(|(_, v)| &v.times)), sort)?,
            ),
        };

        plans.push(MergePlan {
            name: None,
            key: first.key,
            runs,
            ensembles: first.ensembles.clone(),
            times,
            levels: first.levels.clone(),
            sources,
        });
    }
    Ok(plans)
}

fn union<'a>(
    parts: &'a [Collection],
    renames: &BTreeMap<String, BTreeMap<String, String>>,
) -> std::result::Result<Vec<MergePlan<'a>>, AggregationError> {
    let runs = parts[0].runs();
    let mut plans: BTreeMap<String, MergePlan<'a>> = BTreeMap::new();

    for (i, part) in parts.iter().enumerate() {
        let path = part.display_path();
        if part.runs() != runs {
            return Err(AggregationError::ShapeMismatch {
                variable: part.variables.first().map(|v| v.name.clone()).unwrap_or_default(),
                dimension: "run",
                path,
            });
        }

        let file_renames = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| renames.get(n));
        for variable in &part.variables {
            let name = file_renames
                .and_then(|r| r.get(&variable.name))
                .cloned()
                .unwrap_or_else(|| variable.name.clone());
            if let Some(existing) = plans.get(&name) {
                let (first, _) = existing.sources[0];
                return Err(AggregationError::DuplicateVariable {
                    variable: name,
                    first: parts[first].display_path(),
                    second: path,
                });
            }
            plans.insert(name.clone(), MergePlan::from_source(Some(name), i, variable));
        }
    }
    Ok(plans.into_values().collect())
}

fn forecast_model_run(
    parts: &[Collection],
) -> std::result::Result<Vec<MergePlan<'_>>, AggregationError> {
    let mut plans = Vec::new();
    for sources in group_by_key(parts).into_values() {
        let (first_part, first) = sources[0];
        let mut plan = MergePlan::from_source(None, first_part, first);
        for &(i, variable) in &sources[1..] {
            let part = &parts[i];
            check_axis(variable, "ensemble", &first.ensembles, &variable.ensembles, part)?;
            check_axis(variable, "level", &first.levels, &variable.levels, part)?;
            plan.runs = plan.runs.union(&variable.runs);
            plan.times = plan.times.union(&variable.times);
            plan.sources.push((i, variable));
        }
        plans.push(plan);
    }
    Ok(plans)
}
