//! Integration tests for the on-disk index cache.

use std::fs::{self, OpenOptions};
use std::io::Write;

use grib_index::{
    DiskIndexCache, IndexBuilder, IndexConfig, IndexKind, IntervalPolicy, SourceIdentity,
};
use test_utils::{temp_test_dir, write_grib_file, Grib2Builder};

fn messages(hours: &[u32]) -> Vec<Vec<u8>> {
    hours
        .iter()
        .map(|&h| {
            Grib2Builder::new_gfs()
                .with_grid(3, 3)
                .with_forecast_hour(h)
                .build()
        })
        .collect()
}

#[test]
fn test_cache_hit_equals_direct_build() {
    let dir = temp_test_dir();
    let path = write_grib_file(dir.path(), "gfs.grib2", &messages(&[0, 6, 12]));
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let builder = IndexBuilder::new(config);

    let built = builder.index_file(&path, Some(&cache)).unwrap();
    assert!(!built.from_cache);
    assert!(cache
        .entry_path(&built.source.path, IndexKind::Collection)
        .exists());

    let cached = builder.index_file(&path, Some(&cache)).unwrap();
    assert!(cached.from_cache);

    let direct = builder.index_file(&path, None).unwrap();
    assert_eq!(cached.collection, direct.collection);
    assert_eq!(cached.source, direct.source);
}

#[test]
fn test_append_invalidates_entry() {
    let dir = temp_test_dir();
    let path = write_grib_file(dir.path(), "gfs.grib2", &messages(&[0, 6]));
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let builder = IndexBuilder::new(config);

    let before = builder.index_file(&path, Some(&cache)).unwrap();
    assert_eq!(before.collection.record_count(), 2);

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&messages(&[12])[0]).unwrap();
    drop(file);

    let source = SourceIdentity::of(&path).unwrap();
    assert!(cache.load(&source).is_none());
    assert!(cache.load_records(&source).is_none());

    let after = builder.index_file(&path, Some(&cache)).unwrap();
    assert!(!after.from_cache);
    assert_eq!(after.collection.record_count(), 3);
}

#[test]
fn test_config_change_is_a_miss() {
    let dir = temp_test_dir();
    let path = write_grib_file(dir.path(), "gfs.grib2", &messages(&[0]));
    let root = dir.path().join("cache");

    let config = IndexConfig::default();
    let builder = IndexBuilder::new(config.clone());
    builder
        .index_file(&path, Some(&DiskIndexCache::new(&root, &config)))
        .unwrap();

    let other = IndexConfig {
        interval_policy: IntervalPolicy::KeepAll,
        ..config
    };
    let source = SourceIdentity::of(&path).unwrap();
    assert!(DiskIndexCache::new(&root, &other).load(&source).is_none());
}

#[test]
fn test_corrupt_entry_is_a_miss() {
    let dir = temp_test_dir();
    let path = write_grib_file(dir.path(), "gfs.grib2", &messages(&[0, 3]));
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let builder = IndexBuilder::new(config);

    let built = builder.index_file(&path, Some(&cache)).unwrap();
    let entry = cache.entry_path(&built.source.path, IndexKind::Collection);

    let mut bytes = fs::read(&entry).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&entry, &bytes).unwrap();
    assert!(cache.load(&built.source).is_none());

    // An older format version is never trusted
    let mut bytes = fs::read(&entry).unwrap();
    bytes[last] ^= 0xFF;
    bytes[4..6].copy_from_slice(&0u16.to_le_bytes());
    fs::write(&entry, &bytes).unwrap();
    assert!(cache.load(&built.source).is_none());

    fs::write(&entry, b"GB").unwrap();
    assert!(cache.load(&built.source).is_none());

    let rebuilt = builder.index_file(&path, Some(&cache)).unwrap();
    assert!(!rebuilt.from_cache);
    assert_eq!(rebuilt.collection, built.collection);
}

#[test]
fn test_aggregate_entries_track_every_source() {
    let dir = temp_test_dir();
    let a = write_grib_file(dir.path(), "a.grib2", &messages(&[0]));
    let b = write_grib_file(dir.path(), "b.grib2", &messages(&[6]));
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let builder = IndexBuilder::new(config);

    let collection = builder.index_file(&a, None).unwrap().collection;
    let sources = vec![SourceIdentity::of(&a).unwrap(), SourceIdentity::of(&b).unwrap()];
    cache.store_aggregate("pair", &sources, &collection).unwrap();

    assert_eq!(cache.load_aggregate("pair", &sources), Some(collection));
    assert!(cache.load_aggregate("pair", &sources[..1]).is_none());
    assert!(cache.load_aggregate("other", &sources).is_none());
}

#[test]
fn test_scour_removes_oldest_first() {
    let dir = temp_test_dir();
    let config = IndexConfig::default();
    let cache = DiskIndexCache::new(dir.path().join("cache"), &config);
    let builder = IndexBuilder::new(config);

    let mut entries = Vec::new();
    for name in ["a.grib2", "b.grib2", "c.grib2"] {
        let path = write_grib_file(dir.path(), name, &messages(&[0, 6]));
        let index = builder.index_file(&path, Some(&cache)).unwrap();
        entries.push(cache.entry_path(&index.source.path, IndexKind::Collection));
        // Distinct modification times
        std::thread::sleep(std::time::Duration::from_millis(20));
    }

    let total: u64 = walk_sizes(cache.root());
    let newest = fs::metadata(&entries[2]).unwrap().len();

    let report = cache.scour(total - 1).unwrap();
    assert!(report.files_removed >= 1);
    assert!(report.bytes_remaining < total);
    assert_eq!(report.bytes_removed + report.bytes_remaining, total);
    assert!(entries[2].exists());

    let report = cache.scour(newest).unwrap();
    assert!(report.bytes_remaining <= newest);
    assert!(entries[2].exists());
    assert!(!entries[0].exists());

    let report = cache.scour(0).unwrap();
    assert_eq!(report.bytes_remaining, 0);
    assert!(!entries[2].exists());
}

fn walk_sizes(root: &std::path::Path) -> u64 {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.metadata().unwrap().len())
        .sum()
}
