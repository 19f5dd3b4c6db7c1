//! Integration tests for multi-file aggregation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use grib_index::{
    AggregationError, AggregationPlanner, Collection, DiskIndexCache, FilePool, IndexBuilder,
    IndexConfig, IndexError, IntervalPolicy, JoinDimension, JoinSpec, RunDatePattern, SliceReader, SliceRequest,
    TimeCoord,
};
use grib_parser::ScanModePolicy;
use test_utils::{create_tagged_grid, temp_test_dir, write_grib_file, Grib2Builder};

const TMP: &str = "TMP_height_above_ground";

fn tmp(hour: u32, tag: f32) -> Vec<u8> {
    Grib2Builder::new_gfs()
        .with_grid(3, 3)
        .with_forecast_hour(hour)
        .with_data(create_tagged_grid(3, 3, tag))
        .build()
}

fn tmp_run(day: u8, run: u8, hour: u32, tag: f32) -> Vec<u8> {
    Grib2Builder::new_gfs()
        .with_reference_time(2024, 1, day, run)
        .with_grid(3, 3)
        .with_forecast_hour(hour)
        .with_data(create_tagged_grid(3, 3, tag))
        .build()
}

fn apcp(start: u32, end: u32) -> Vec<u8> {
    Grib2Builder::new_gfs()
        .with_grid(3, 3)
        .with_parameter(1, 8)
        .with_level(1, 0)
        .with_interval(start, end, 1)
        .build()
}

fn planner() -> AggregationPlanner {
    AggregationPlanner::new(IndexBuilder::new(IndexConfig::default()), None).unwrap()
}

fn join_time(sort: bool) -> JoinSpec {
    JoinSpec::JoinExisting {
        dimension: JoinDimension::Time,
        sort,
    }
}

fn reader(collection: Collection) -> SliceReader {
    SliceReader::new(
        Arc::new(collection),
        Arc::new(FilePool::new(2)),
        ScanModePolicy::default(),
    )
}

/// Smallest value of one field, or NaN when the cell is missing.
fn field_min(reader: &SliceReader, name: &str, run: usize, time: usize) -> f32 {
    let var = reader.collection().variable(name).unwrap();
    let grid = reader.collection().grid(var).unwrap();
    let request = SliceRequest {
        run: run..run + 1,
        time: time..time + 1,
        ..SliceRequest::full(var, grid)
    };
    let block = reader.read_slice(name, &request).unwrap();
    block.iter().cloned().fold(f32::INFINITY, |a, b| if b.is_nan() { b } else { a.min(b) })
}

fn write(dir: &Path, name: &str, messages: &[Vec<u8>]) -> PathBuf {
    write_grib_file(dir, name, messages)
}

#[test]
fn test_join_existing_time_concatenates_files() {
    let dir = temp_test_dir();
    let files: Vec<_> = [0u32, 6, 12]
        .iter()
        .map(|&h| write(dir.path(), &format!("f{:03}.grib2", h), &[tmp(h, h as f32 * 100.0)]))
        .collect();

    let outcome = planner().plan("gfs", &files, &join_time(false)).unwrap();
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.sources.len(), 3);

    let collection = outcome.collection;
    assert_eq!(collection.files.len(), 3);
    let var = collection.variable(TMP).unwrap();
    assert_eq!(
        var.times.values(),
        &[
            TimeCoord::Instant(0),
            TimeCoord::Instant(360),
            TimeCoord::Instant(720)
        ]
    );
    assert_eq!(var.shape(), [1, 1, 3, 1]);
    for t in 0..3 {
        assert_eq!(var.entry([0, 0, t, 0]).unwrap().file as usize, t);
    }

    let reader = reader(collection);
    assert_eq!(field_min(&reader, TMP, 0, 0), 0.0);
    assert_eq!(field_min(&reader, TMP, 0, 1), 600.0);
    assert_eq!(field_min(&reader, TMP, 0, 2), 1200.0);
}

#[test]
fn test_join_existing_run_concatenates_runs() {
    let dir = temp_test_dir();
    let files: Vec<_> = [0u8, 6, 12]
        .iter()
        .map(|&run| {
            write(
                dir.path(),
                &format!("run{:02}.grib2", run),
                &[tmp_run(15, run, 0, 0.0), tmp_run(15, run, 3, 0.0)],
            )
        })
        .collect();

    let join = JoinSpec::JoinExisting {
        dimension: JoinDimension::Run,
        sort: false,
    };
    let collection = planner().plan("runs", &files, &join).unwrap().collection;
    let var = collection.variable(TMP).unwrap();
    assert_eq!(var.shape(), [3, 1, 2, 1]);
    assert_eq!(
        var.runs.values()[2],
        Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap()
    );
    assert_eq!(var.missing_count(), 0);
}

#[test]
fn test_join_existing_order_checks() {
    let dir = temp_test_dir();
    let late = write(dir.path(), "late.grib2", &[tmp(12, 0.0)]);
    let early = write(dir.path(), "early.grib2", &[tmp(0, 0.0)]);
    let files = vec![late.clone(), early.clone()];

    let err = planner().plan("c", &files, &join_time(false)).unwrap_err();
    match err {
        IndexError::Aggregation(AggregationError::OutOfOrder { dimension, path }) => {
            assert_eq!(dimension, "time");
            assert_eq!(path.file_name().unwrap(), "early.grib2");
        }
        other => panic!("unexpected error: {}", other),
    }

    let collection = planner().plan("c", &files, &join_time(true)).unwrap().collection;
    let var = collection.variable(TMP).unwrap();
    assert_eq!(
        var.times.values(),
        &[TimeCoord::Instant(0), TimeCoord::Instant(720)]
    );

    let again = write(dir.path(), "again.grib2", &[tmp(12, 1.0)]);
    let err = planner()
        .plan("c", &[early, late, again], &join_time(true))
        .unwrap_err();
    assert!(matches!(
        err,
        IndexError::Aggregation(AggregationError::DuplicateJoinValue { dimension: "time", .. })
    ));
}

#[test]
fn test_join_existing_requires_matching_shapes() {
    let dir = temp_test_dir();
    let a = write(dir.path(), "a.grib2", &[tmp(0, 0.0)]);
    let extra = write(dir.path(), "extra.grib2", &[tmp(6, 0.0), apcp(0, 6)]);
    let err = planner().plan("c", &[a.clone(), extra], &join_time(false)).unwrap_err();
    match err {
        IndexError::Aggregation(AggregationError::ParameterMismatch { variable, path }) => {
            assert_eq!(variable, "APCP_surface_accumulation");
            assert_eq!(path.file_name().unwrap(), "a.grib2");
        }
        other => panic!("unexpected error: {}", other),
    }

    let levels = write(
        dir.path(),
        "levels.grib2",
        &[
            tmp(6, 0.0),
            Grib2Builder::new_gfs()
                .with_grid(3, 3)
                .with_forecast_hour(6)
                .with_level(103, 10)
                .build(),
        ],
    );
    let err = planner().plan("c", &[a, levels], &join_time(false)).unwrap_err();
    assert!(matches!(
        err,
        IndexError::Aggregation(AggregationError::ShapeMismatch { dimension: "level", .. })
    ));
}

#[test]
fn test_join_existing_skips_failed_files() {
    let dir = temp_test_dir();
    let good = write(dir.path(), "a.grib2", &[tmp(0, 0.0)]);
    let mut broken = tmp(6, 0.0);
    broken.truncate(40);
    let bad = write(dir.path(), "b.grib2", &[broken]);
    let later = write(dir.path(), "c.grib2", &[tmp(12, 0.0)]);

    let outcome = planner()
        .plan("c", &[good, bad.clone(), later], &join_time(false))
        .unwrap();
    assert_eq!(outcome.failed_paths(), vec![bad.as_path()]);
    assert!(matches!(outcome.failed[0].1, IndexError::Format { .. }));
    assert_eq!(outcome.sources.len(), 2);

    let var = outcome.collection.variable(TMP).unwrap();
    assert_eq!(var.times.len(), 2);
    assert_eq!(outcome.collection.files.len(), 2);
}

#[test]
fn test_merged_intervals_keep_smallest_per_end() {
    let dir = temp_test_dir();
    let wide = write(dir.path(), "wide.grib2", &[apcp(3, 15)]);
    let narrow = write(dir.path(), "narrow.grib2", &[apcp(12, 15)]);
    let files = vec![wide, narrow];

    for join in [
        join_time(true),
        JoinSpec::ForecastModelRun { run_date: None },
    ] {
        let outcome = planner().plan("apcp", &files, &join).unwrap();
        let var = outcome
            .collection
            .variable("APCP_surface_accumulation")
            .unwrap();
        let widths: Vec<i64> = var.times.values().iter().map(|t| t.width()).collect();
        assert_eq!(widths, vec![180], "{:?}", join);
        assert_eq!(var.record_count(), 1);
        assert_eq!(var.entry([0, 0, 0, 0]).unwrap().file, 1);
        assert_eq!(outcome.report.derived_intervals, 1);
        assert!(outcome.report.duplicates.is_empty());
    }

    let keep_all = IndexConfig {
        interval_policy: IntervalPolicy::KeepAll,
        ..IndexConfig::default()
    };
    let outcome = AggregationPlanner::new(IndexBuilder::new(keep_all), None)
        .unwrap()
        .plan("apcp", &files, &join_time(true))
        .unwrap();
    let var = &outcome.collection.variables[0];
    assert_eq!(var.times.len(), 2);
    assert_eq!(outcome.report.derived_intervals, 0);
}

#[test]
fn test_union_merges_and_renames() {
    let dir = temp_test_dir();
    let temps = write(dir.path(), "temps.grib2", &[tmp(6, 0.0)]);
    let precip = write(dir.path(), "precip.grib2", &[apcp(0, 6)]);

    let union = JoinSpec::Union {
        renames: BTreeMap::new(),
    };
    let collection = planner()
        .plan("u", &[temps.clone(), precip.clone()], &union)
        .unwrap()
        .collection;
    let names: Vec<_> = collection.variable_names().collect();
    assert_eq!(names, vec!["APCP_surface_accumulation", TMP]);
    let apcp_var = collection.variable("APCP_surface_accumulation").unwrap();
    assert_eq!(apcp_var.entry([0, 0, 0, 0]).unwrap().file, 1);

    let more_temps = write(dir.path(), "more_temps.grib2", &[tmp(6, 0.0)]);
    let err = planner()
        .plan("u", &[temps.clone(), more_temps.clone()], &union)
        .unwrap_err();
    match err {
        IndexError::Aggregation(AggregationError::DuplicateVariable {
            variable,
            first,
            second,
        }) => {
            assert_eq!(variable, TMP);
            assert_eq!(first.file_name().unwrap(), "temps.grib2");
            assert_eq!(second.file_name().unwrap(), "more_temps.grib2");
        }
        other => panic!("unexpected error: {}", other),
    }

    let renamed = JoinSpec::Union {
        renames: BTreeMap::from([(
            "more_temps.grib2".to_string(),
            BTreeMap::from([(TMP.to_string(), "TMP_2m_alt".to_string())]),
        )]),
    };
    let collection = planner()
        .plan("u", &[temps, more_temps], &renamed)
        .unwrap()
        .collection;
    let names: Vec<_> = collection.variable_names().collect();
    assert_eq!(names, vec!["TMP_2m_alt", TMP]);
}

#[test]
fn test_union_does_not_tolerate_failed_files() {
    let dir = temp_test_dir();
    let temps = write(dir.path(), "temps.grib2", &[tmp(6, 0.0)]);
    let bad = write(dir.path(), "bad.grib2", &[b"GRIB\x00\x00\x00\x02junk".to_vec()]);

    let err = planner()
        .plan(
            "u",
            &[temps, bad.clone()],
            &JoinSpec::Union {
                renames: BTreeMap::new(),
            },
        )
        .unwrap_err();
    match err {
        IndexError::Aggregation(AggregationError::FilesFailed(paths)) => {
            assert_eq!(paths, vec![bad]);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_forecast_model_run_from_file_names() {
    let dir = temp_test_dir();
    let first = write(
        dir.path(),
        "gfs.2024011500.grib2",
        &[tmp(0, 0.0), tmp(6, 100.0), tmp(12, 200.0)],
    );
    let second = write(
        dir.path(),
        "gfs.2024011506.grib2",
        &[tmp(0, 1000.0), tmp(6, 1100.0)],
    );

    let join = JoinSpec::ForecastModelRun {
        run_date: Some(RunDatePattern::new("%Y%m%d%H")),
    };
    let outcome = planner().plan("fmrc", &[first, second], &join).unwrap();
    let var = outcome.collection.variable(TMP).unwrap();
    assert_eq!(
        var.runs.values(),
        &[
            Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 15, 6, 0, 0).unwrap()
        ]
    );
    assert_eq!(var.shape(), [2, 1, 3, 1]);
    assert_eq!(var.missing_count(), 1);
    assert!(var.entry([1, 0, 2, 0]).is_none());

    let reader = reader(outcome.collection);
    assert_eq!(field_min(&reader, TMP, 1, 1), 1100.0);
    assert!(field_min(&reader, TMP, 1, 2).is_nan());
}

#[test]
fn test_forecast_model_run_reports_unparseable_names() {
    let dir = temp_test_dir();
    let good = write(dir.path(), "nam_2024011512.grib2", &[tmp(0, 0.0)]);
    let nameless = write(dir.path(), "latest.grib2", &[tmp(0, 0.0)]);

    let join = JoinSpec::ForecastModelRun {
        run_date: Some(RunDatePattern::new("%Y%m%d%H")),
    };
    let outcome = planner().plan("fmrc", &[good, nameless.clone()], &join).unwrap();
    assert_eq!(outcome.failed_paths(), vec![nameless.as_path()]);
    assert!(matches!(
        outcome.failed[0].1,
        IndexError::Aggregation(AggregationError::RunTimeUnavailable(_))
    ));
}

#[test]
fn test_forecast_model_run_from_content_reports_duplicates() {
    let dir = temp_test_dir();
    let a = write(dir.path(), "a.grib2", &[tmp_run(15, 0, 0, 0.0), tmp_run(15, 0, 3, 0.0)]);
    let b = write(dir.path(), "b.grib2", &[tmp_run(15, 0, 3, 9.0), tmp_run(15, 6, 3, 0.0)]);

    let outcome = planner()
        .plan("fmrc", &[a, b], &JoinSpec::ForecastModelRun { run_date: None })
        .unwrap();
    let var = outcome.collection.variable(TMP).unwrap();
    assert_eq!(var.shape(), [2, 1, 2, 1]);
    assert_eq!(outcome.report.duplicates.len(), 1);

    let dup = &outcome.report.duplicates[0];
    assert_eq!(dup.kept.file, 0);
    assert_eq!(dup.discarded.file, 1);
    assert_eq!(dup.tuple.time, TimeCoord::Instant(180));
}

#[test]
fn test_parallel_planning_is_deterministic() {
    let dir = temp_test_dir();
    let files: Vec<_> = (0..8u32)
        .map(|i| write(dir.path(), &format!("f{:02}.grib2", i), &[tmp(i * 3, i as f32)]))
        .collect();

    let config = IndexConfig {
        threads: Some(4),
        ..IndexConfig::default()
    };
    let parallel = AggregationPlanner::new(IndexBuilder::new(config), None)
        .unwrap()
        .plan("p", &files, &join_time(false))
        .unwrap();
    let serial = planner().plan("p", &files, &join_time(false)).unwrap();
    assert_eq!(parallel.collection, serial.collection);
}

#[test]
fn test_cached_aggregation_matches_fresh() {
    let dir = temp_test_dir();
    let files: Vec<_> = [0u32, 6]
        .iter()
        .map(|&h| write(dir.path(), &format!("f{}.grib2", h), &[tmp(h, 0.0)]))
        .collect();
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let planner = AggregationPlanner::new(IndexBuilder::new(config), Some(cache)).unwrap();

    let fresh = planner.plan("gfs", &files, &join_time(false)).unwrap();
    assert!(!fresh.from_cache);
    let cached = planner.plan("gfs", &files, &join_time(false)).unwrap();
    assert!(cached.from_cache);
    assert_eq!(cached.collection, fresh.collection);

    // A different join is a different aggregation
    let sorted = planner.plan("gfs", &files, &join_time(true)).unwrap();
    assert!(!sorted.from_cache);
}

#[test]
fn test_empty_file_list() {
    assert!(matches!(
        planner().plan("none", &[], &join_time(false)),
        Err(IndexError::Aggregation(AggregationError::Empty))
    ));
}
