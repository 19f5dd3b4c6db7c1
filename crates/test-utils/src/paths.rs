//! Source files for tests: temporary GRIB files built from messages, and
//! optional real samples looked up under `TEST_DATA_DIR` or `testdata/`.

use std::path::{Path, PathBuf};

/// Workspace root, two levels above this crate's manifest.
pub fn workspace_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .ancestors()
        .nth(2)
        .unwrap_or(manifest_dir)
        .to_path_buf()
}

/// First existing sample named `name`, checking `TEST_DATA_DIR`, then
/// `testdata/` of the parser and index crates, then the workspace root.
pub fn find_test_file(name: &str) -> Option<PathBuf> {
    let root = workspace_root();
    std::env::var_os("TEST_DATA_DIR")
        .map(PathBuf::from)
        .into_iter()
        .chain([
            root.join("crates/grib-parser/testdata"),
            root.join("crates/grib-index/testdata"),
            root.join("testdata"),
        ])
        .map(|dir| dir.join(name))
        .find(|path| path.is_file())
}

/// Temporary directory removed when dropped.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("grib-test-")
        .tempdir()
        .expect("Failed to create temporary test directory")
}

/// Writes GRIB messages back to back into `dir/name` and returns the path.
pub fn write_grib_file(dir: &Path, name: &str, messages: &[Vec<u8>]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, messages.concat()).expect("Failed to write GRIB test file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_root_holds_workspace_manifest() {
        let manifest = std::fs::read_to_string(workspace_root().join("Cargo.toml")).unwrap();
        assert!(manifest.contains("[workspace]"));
    }

    #[test]
    fn test_write_grib_file_concatenates() {
        let dir = temp_test_dir();
        let path = write_grib_file(dir.path(), "two.grib", &[vec![1, 2], vec![3]]);
        assert_eq!(std::fs::read(path).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_unknown_sample_is_not_found() {
        assert_eq!(find_test_file("no_such_sample.grib2"), None);
    }
}
