//! Integration tests for per-file index building.

use std::fs;

use grib_index::{
    format, DiskIndexCache, IndexBuilder, IndexConfig, IndexKind, IntervalPolicy, TimeCoord,
};
use test_utils::{intervals, temp_test_dir, write_grib_file, Grib1Builder, Grib2Builder};

fn hours(start: u32, end: u32) -> TimeCoord {
    TimeCoord::Interval {
        start: i64::from(start) * 60,
        end: i64::from(end) * 60,
    }
}

fn precip(start: u32, end: u32) -> Vec<u8> {
    Grib2Builder::new_gfs()
        .with_grid(3, 3)
        .with_parameter(1, 8)
        .with_level(1, 0)
        .with_interval(start, end, 1)
        .build()
}

#[test]
fn test_record_count_matches_messages() {
    let dir = temp_test_dir();
    let messages: Vec<Vec<u8>> = [0, 3, 6, 9, 12]
        .iter()
        .flat_map(|&h| {
            [2, 10, 80].map(|level| {
                Grib2Builder::new_gfs()
                    .with_grid(4, 4)
                    .with_forecast_hour(h)
                    .with_level(103, level)
                    .build()
            })
        })
        .collect();
    let path = write_grib_file(dir.path(), "gfs.grib2", &messages);

    let builder = IndexBuilder::new(IndexConfig::default());
    let index = builder.index_file(&path, None).unwrap();

    assert_eq!(index.report.records, 15);
    assert_eq!(index.report.indexed, 15);
    assert!(index.report.duplicates.is_empty());
    assert_eq!(index.collection.record_count(), 15);

    let var = index.collection.variable("TMP_height_above_ground").unwrap();
    assert_eq!(var.shape(), [1, 1, 5, 3]);
    assert_eq!(var.missing_count(), 0);
}

#[test]
fn test_sliding_accumulations_keep_constant_width() {
    let dir = temp_test_dir();
    let bounds = intervals::sliding_12h();
    let messages: Vec<_> = bounds.iter().map(|&(s, e)| precip(s, e)).collect();
    let path = write_grib_file(dir.path(), "apcp.grib2", &messages);

    let index = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap();

    let var = index.collection.variable("APCP_surface_accumulation").unwrap();
    let expected: Vec<TimeCoord> = bounds.iter().map(|&(s, e)| hours(s, e)).collect();
    assert_eq!(var.times.values(), expected.as_slice());
    assert!(var.times.values().iter().all(|t| t.width() == 720));
    assert_eq!(index.report.derived_intervals, 0);
}

#[test]
fn test_same_end_keeps_narrowest_interval() {
    let dir = temp_test_dir();
    let messages: Vec<_> = intervals::SAME_END
        .iter()
        .map(|&(s, e)| precip(s, e))
        .collect();
    let path = write_grib_file(dir.path(), "same_end.grib2", &messages);

    let index = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap();
    let var = index.collection.variable("APCP_surface_accumulation").unwrap();
    assert_eq!(var.times.values(), &[hours(12, 15)]);
    assert_eq!(index.report.derived_intervals, 2);
    assert_eq!(index.report.indexed, 1);

    let keep_all = IndexConfig {
        interval_policy: IntervalPolicy::KeepAll,
        ..IndexConfig::default()
    };
    let index = IndexBuilder::new(keep_all).index_file(&path, None).unwrap();
    let var = index.collection.variable("APCP_surface_accumulation").unwrap();
    assert_eq!(
        var.times.values(),
        &[hours(12, 15), hours(9, 15), hours(3, 15)]
    );
}

#[test]
fn test_split_intervals_by_length() {
    let dir = temp_test_dir();
    let path = write_grib_file(
        dir.path(),
        "split.grib2",
        &[precip(0, 6), precip(0, 12), precip(6, 12)],
    );

    let config = IndexConfig {
        split_intervals_by_length: true,
        ..IndexConfig::default()
    };
    let index = IndexBuilder::new(config).index_file(&path, None).unwrap();
    let names: Vec<_> = index.collection.variable_names().collect();
    assert_eq!(
        names,
        vec!["APCP_surface_12h_accumulation", "APCP_surface_6h_accumulation"]
    );
    let six = index
        .collection
        .variable("APCP_surface_6h_accumulation")
        .unwrap();
    assert_eq!(six.times.values(), &[hours(0, 6), hours(6, 12)]);
}

#[test]
fn test_grib1_mixed_interval_bounds() {
    let dir = temp_test_dir();
    let bounds = intervals::grib1_57_1_2();
    let messages: Vec<_> = bounds
        .iter()
        .map(|&(s, e)| {
            Grib1Builder::new()
                .with_center(57, 1, 2)
                .with_parameter(61)
                .with_level(1, 0)
                .with_time(1, s as u8, e as u8, 4)
                .build()
        })
        .collect();
    let path = write_grib_file(dir.path(), "ecmwf.grib", &messages);

    let index = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap();
    assert_eq!(index.collection.variables.len(), 1);

    let var = &index.collection.variables[0];
    let expected: Vec<TimeCoord> = bounds.iter().map(|&(s, e)| hours(s, e)).collect();
    assert_eq!(var.times.values(), expected.as_slice());
    assert_eq!(var.times.values().first(), Some(&hours(0, 6)));
    assert_eq!(var.times.values().last(), Some(&hours(228, 240)));
    assert_eq!(var.record_count(), bounds.len());
}

#[test]
fn test_error_fields_are_distinct_variables() {
    let dir = temp_test_dir();
    let path = write_grib_file(
        dir.path(),
        "errors.grib2",
        &[
            Grib2Builder::new_gfs().with_grid(2, 2).build(),
            Grib2Builder::new_gfs()
                .with_grid(2, 2)
                .with_generating_process(6)
                .build(),
            Grib2Builder::new_gfs()
                .with_grid(2, 2)
                .with_generating_process(7)
                .build(),
        ],
    );

    let index = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap();
    let names: Vec<_> = index.collection.variable_names().collect();
    assert_eq!(
        names,
        vec![
            "TMP_height_above_ground",
            "TMP_height_above_ground_analysis_error",
            "TMP_height_above_ground_error",
        ]
    );
    assert!(index.report.duplicates.is_empty());
}

#[test]
fn test_ensemble_members_share_a_variable() {
    let dir = temp_test_dir();
    let messages: Vec<_> = (0..4)
        .map(|member| {
            Grib2Builder::new_gfs()
                .with_grid(2, 2)
                .with_ensemble(3, member, 4)
                .build()
        })
        .collect();
    let path = write_grib_file(dir.path(), "gefs.grib2", &messages);

    let index = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap();
    assert_eq!(index.collection.variables.len(), 1);
    let var = &index.collection.variables[0];
    assert_eq!(var.ensembles.values(), &[0, 1, 2, 3]);
    assert_eq!(var.shape(), [1, 4, 1, 1]);
}

#[test]
fn test_rebuild_is_byte_identical() {
    let dir = temp_test_dir();
    let messages: Vec<_> = intervals::sliding_12h()
        .iter()
        .map(|&(s, e)| precip(s, e))
        .chain((0..4).map(|h| Grib2Builder::new_gfs().with_forecast_hour(h * 3).build()))
        .collect();
    let path = write_grib_file(dir.path(), "mixed.grib2", &messages);

    let config = IndexConfig::default();
    let first_cache = DiskIndexCache::new(dir.path().join("cache1"), &config);
    let second_cache = DiskIndexCache::new(dir.path().join("cache2"), &config);
    let builder = IndexBuilder::new(config);

    let first = builder.index_file(&path, Some(&first_cache)).unwrap();
    let second = builder.index_file(&path, Some(&second_cache)).unwrap();
    assert!(!first.from_cache && !second.from_cache);

    for kind in [IndexKind::Records, IndexKind::Collection] {
        let a = fs::read(first_cache.entry_path(&first.source.path, kind)).unwrap();
        let b = fs::read(second_cache.entry_path(&second.source.path, kind)).unwrap();
        assert_eq!(a, b, "{:?} index differs between builds", kind);
    }

    let encoded = format::encode(IndexKind::Collection, 0, &first.collection).unwrap();
    let again = format::encode(IndexKind::Collection, 0, &second.collection).unwrap();
    assert_eq!(encoded, again);
}

#[test]
fn test_truncated_file_is_a_format_error() {
    let dir = temp_test_dir();
    let mut message = Grib2Builder::new_gfs().build();
    message.truncate(message.len() - 10);
    let path = write_grib_file(dir.path(), "short.grib2", &[message]);

    let err = IndexBuilder::new(IndexConfig::default())
        .index_file(&path, None)
        .unwrap_err();
    assert!(
        matches!(err, grib_index::IndexError::Format { .. }),
        "unexpected error: {}",
        err
    );
}
