//! Test support for the GRIB workspace.
//!
//! - [`builders`]: synthetic GRIB1 and GRIB2 messages
//! - [`fixtures`]: interval sequences and grid layouts from real collections
//! - [`generators`]: field values that identify their record and cell
//! - [`paths`]: temporary source files and optional real sample data
//!
//! ```ignore
//! use test_utils::{temp_test_dir, write_grib_file, Grib2Builder};
//!
//! let dir = temp_test_dir();
//! let path = write_grib_file(dir.path(), "f000.grib2", &[Grib2Builder::new_gfs().build()]);
//! ```

pub mod builders;
pub mod fixtures;
pub mod generators;
pub mod paths;

pub use builders::*;
pub use fixtures::*;
pub use generators::*;
pub use paths::*;

/// Path of a real sample GRIB file, or return from the test when it is
/// not available locally.
///
/// ```ignore
/// let path = require_test_file!("gfs_sample.grib2");
/// ```
#[macro_export]
macro_rules! require_test_file {
    ($name:expr) => {{
        match $crate::find_test_file($name) {
            Some(path) => path,
            None => {
                eprintln!("SKIPPED: sample file '{}' not found (set TEST_DATA_DIR)", $name);
                return;
            }
        }
    }};
}

/// Assert two numbers differ by at most `epsilon`, compared as `f64`.
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left = $left as f64;
        let right = $right as f64;
        let epsilon = $epsilon as f64;
        if (left - right).abs() > epsilon {
            panic!(
                "assertion failed: `{:?} ≈ {:?}` (diff {:?} > {:?})",
                left,
                right,
                (left - right).abs(),
                epsilon
            );
        }
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_assert_approx_eq_within_epsilon() {
        assert_approx_eq!(271.15_f32, 271.1501_f64, 0.001);
        assert_approx_eq!(-5.5, -5.500001, 0.0001);
    }

    #[test]
    #[should_panic(expected = "assertion failed")]
    fn test_assert_approx_eq_outside_epsilon() {
        assert_approx_eq!(1.1, 1.0, 0.001);
    }
}
