//! One-shot subcommands. Results are printed to stdout as JSON lines.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use grib_index::{
    AggregationOutcome, AggregationPlanner, Collection, DiskIndexCache, FilePool, IndexBuilder,
    IndexConfig, JoinSpec, SliceReader, SliceRequest, Variable,
};
use grib_parser::GribRecord;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::collections::load_collection_spec;
use crate::{AggregateArgs, ReadArgs, SourceArgs};

fn emit(value: Value) {
    println!("{}", value);
}

pub fn planner(config: &IndexConfig) -> Result<AggregationPlanner> {
    let cache = DiskIndexCache::from_config(config);
    Ok(AggregationPlanner::new(IndexBuilder::new(config.clone()), cache)?)
}

/// Collection name, files and join described by `args`.
fn resolve(args: &SourceArgs, default_name: &str) -> Result<(String, Vec<PathBuf>, JoinSpec)> {
    match &args.collection {
        Some(path) => {
            let spec = load_collection_spec(path)?;
            let files = spec.discover()?;
            Ok((spec.name, files, spec.join))
        }
        None => {
            if args.files.is_empty() {
                bail!("either --collection or source files are required");
            }
            Ok((default_name.to_string(), args.files.clone(), args.join()?))
        }
    }
}

fn variable_summary(variable: &Variable) -> Value {
    json!({
        "name": variable.name,
        "shape": variable.shape(),
        "records": variable.record_count(),
        "missing": variable.missing_count(),
        "runs": variable.runs.values().iter().map(|r| r.to_rfc3339()).collect::<Vec<_>>(),
        "times": variable.times.values().iter().map(|t| t.to_string()).collect::<Vec<_>>(),
        "levels": variable.levels.values().iter().map(|l| l.to_string()).collect::<Vec<_>>(),
        "ensembles": variable.ensembles.values(),
    })
}

fn collection_summary(collection: &Collection) -> Value {
    json!({
        "name": collection.name,
        "files": collection.files.len(),
        "grids": collection.grids.len(),
        "records": collection.record_count(),
        "variables": collection.variables.iter().map(variable_summary).collect::<Vec<_>>(),
    })
}

pub fn scan(config: &IndexConfig, files: &[PathBuf]) -> Result<()> {
    let builder = IndexBuilder::new(config.clone());
    for path in files {
        let records = builder.scan_records(path)?;
        info!(path = %path.display(), records = records.len(), "Scanned file");
        for record in &records {
            let locator = record.locator();
            let grid = record.grid();
            emit(json!({
                "file": path,
                "pos": locator.pos,
                "len": locator.len,
                "field": locator.field,
                "edition": record.edition(),
                "parameter": record.parameter_id(),
                "level": record.level_info(),
                "reference_time": record.reference_time().to_rfc3339(),
                "time": record.time_info().ok(),
                "ensemble": record.ensemble(),
                "grid": { "template": grid.template, "nx": grid.nx, "ny": grid.ny, "hash": grid.hash },
            }));
        }
    }
    Ok(())
}

pub fn index(config: &IndexConfig, files: &[PathBuf]) -> Result<()> {
    let planner = planner(config)?;
    let mut failures = 0;
    for (path, result) in planner.index_files(files) {
        match result {
            Ok(index) => emit(json!({
                "file": path,
                "from_cache": index.from_cache,
                "records": index.report.records,
                "indexed": index.report.indexed,
                "derived_intervals": index.report.derived_intervals,
                "skipped": index.report.skipped,
                "duplicates": index.report.duplicates.len(),
                "collection": collection_summary(&index.collection),
            })),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to index file");
                emit(json!({ "file": path, "error": e.to_string() }));
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{} of {} file(s) failed to index", failures, files.len());
    }
    Ok(())
}

fn plan(config: &IndexConfig, args: &SourceArgs, name: &str) -> Result<AggregationOutcome> {
    let (name, files, join) = resolve(args, name)?;
    let outcome = planner(config)?
        .plan(&name, &files, &join)
        .with_context(|| format!("Failed to aggregate collection {}", name))?;
    Ok(outcome)
}

pub fn aggregate(config: &IndexConfig, args: &AggregateArgs) -> Result<()> {
    let outcome = plan(config, &args.source, &args.name)?;
    emit(json!({
        "collection": collection_summary(&outcome.collection),
        "from_cache": outcome.from_cache,
        "duplicates": outcome.report.duplicates.len(),
        "failed": outcome
            .failed
            .iter()
            .map(|(path, e)| json!({ "file": path, "error": e.to_string() }))
            .collect::<Vec<_>>(),
    }));
    Ok(())
}

pub fn read(config: &IndexConfig, args: &ReadArgs) -> Result<()> {
    let outcome = plan(config, &args.source, "read")?;
    let reader = SliceReader::new(
        Arc::new(outcome.collection),
        Arc::new(FilePool::new(config.max_open_files)),
        config.scan_mode,
    );

    let locator = reader.grid_locator(&args.variable).ok();
    let (x, y) = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => {
            let Some(locator) = &locator else {
                bail!("grid of {} does not support point lookup", args.variable);
            };
            match locator.lat_lon_to_index(lat, lon) {
                Some(index) => index,
                None => bail!("({}, {}) is outside the grid of {}", lat, lon, args.variable),
            }
        }
        _ => (args.x, args.y),
    };

    let request = SliceRequest::point(args.run, args.ensemble, args.time, args.level, y, x);
    let value = if args.best {
        reader.read_best(&args.variable, &request)?[[0, 0, 0, 0, 0]]
    } else {
        reader.read_slice(&args.variable, &request)?[[0, 0, 0, 0, 0, 0]]
    };

    let position = locator.map(|l| l.index_to_lat_lon(x, y));
    emit(json!({
        "variable": args.variable,
        "x": x,
        "y": y,
        "lat": position.map(|p| p.0),
        "lon": position.map(|p| p.1),
        "value": (!value.is_nan()).then_some(value),
    }));
    Ok(())
}

pub fn cache_scour(config: &IndexConfig, max_bytes: u64) -> Result<()> {
    let Some(cache) = DiskIndexCache::from_config(config) else {
        bail!("no cache directory configured (set GRIB_CACHE_DIR or --cache-dir)");
    };
    let report = cache.scour(max_bytes)?;
    info!(
        removed = report.files_removed,
        bytes_removed = report.bytes_removed,
        bytes_remaining = report.bytes_remaining,
        "Cache scoured"
    );
    emit(json!({
        "root": cache.root(),
        "files_removed": report.files_removed,
        "bytes_removed": report.bytes_removed,
        "bytes_remaining": report.bytes_remaining,
    }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JoinKind;
    use test_utils::{temp_test_dir, write_grib_file, Grib2Builder};

    fn source(files: Vec<PathBuf>) -> SourceArgs {
        SourceArgs {
            collection: None,
            files,
            join: JoinKind::JoinTime,
            sort: true,
            run_date: None,
        }
    }

    #[test]
    fn test_resolve_requires_a_source() {
        assert!(resolve(&source(vec![]), "c").is_err());
    }

    #[test]
    fn test_plan_from_files() {
        let dir = temp_test_dir();
        let files: Vec<_> = [12u32, 0]
            .iter()
            .map(|&h| {
                write_grib_file(
                    dir.path(),
                    &format!("f{:03}.grib2", h),
                    &[Grib2Builder::new_gfs().with_grid(2, 2).with_forecast_hour(h).build()],
                )
            })
            .collect();

        let outcome = plan(&IndexConfig::default(), &source(files), "cli").unwrap();
        assert_eq!(outcome.collection.name, "cli");
        let summary = collection_summary(&outcome.collection);
        assert_eq!(summary["variables"][0]["shape"], json!([1, 1, 2, 1]));
        assert_eq!(summary["records"], json!(2));
    }

    #[test]
    fn test_scour_requires_cache_dir() {
        let config = IndexConfig {
            cache_dir: None,
            ..IndexConfig::default()
        };
        assert!(cache_scour(&config, 0).is_err());
    }
}
