//! Configuration for index building and aggregation.

use std::path::PathBuf;

use grib_parser::{ScanModePolicy, ScanOptions};
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// How statistically processed intervals sharing an end time are indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalPolicy {
    /// Keep only the narrowest interval for each end time; wider intervals
    /// ending at the same time are derivable and not indexed.
    #[default]
    SmallestPerEnd,
    /// Index every distinct interval, ordered by end then width.
    KeepAll,
}

impl IntervalPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "smallest_per_end" | "smallest" => Some(Self::SmallestPerEnd),
            "keep_all" | "all" => Some(Self::KeepAll),
            _ => None,
        }
    }
}

/// Configuration threaded into the scanner, builder and readers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub interval_policy: IntervalPolicy,

    /// Give each interval length of a parameter its own variable.
    pub split_intervals_by_length: bool,

    pub scan: ScanOptions,

    pub scan_mode: ScanModePolicy,

    /// Maximum number of idle file handles kept open by the file pool.
    pub max_open_files: usize,

    /// Root of the on-disk index cache; no caching when unset.
    pub cache_dir: Option<PathBuf>,

    /// Worker threads for per-file indexing; rayon's default when unset.
    pub threads: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            interval_policy: IntervalPolicy::default(),
            split_intervals_by_length: false,
            scan: ScanOptions::default(),
            scan_mode: ScanModePolicy::default(),
            max_open_files: 64,
            cache_dir: None,
            threads: None,
        }
    }
}

/// The subset of the configuration that changes index content.
#[derive(Serialize)]
struct Fingerprint<'a> {
    interval_policy: &'a IntervalPolicy,
    split_intervals_by_length: bool,
    scan: &'a ScanOptions,
}

impl IndexConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("GRIB_ALLOW_BAD_LENGTH") {
            config.scan.allow_bad_section_length = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("GRIB_INTERVAL_POLICY") {
            if let Some(policy) = IntervalPolicy::from_str(&val) {
                config.interval_policy = policy;
            }
        }

        if let Ok(val) = std::env::var("GRIB_SPLIT_INTERVALS") {
            config.split_intervals_by_length = parse_bool(&val);
        }

        if let Ok(val) = std::env::var("GRIB_MAX_OPEN_FILES") {
            if let Ok(n) = val.parse() {
                config.max_open_files = n;
            }
        }

        if let Ok(val) = std::env::var("GRIB_CACHE_DIR") {
            if !val.is_empty() {
                config.cache_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = std::env::var("GRIB_INDEX_THREADS") {
            if let Ok(n) = val.parse() {
                config.threads = Some(n);
            }
        }

        if let Ok(val) = std::env::var("GRIB_FLIP_PROJECTED_NS") {
            config.scan_mode.flip_projected_ns = parse_bool(&val);
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.max_open_files == 0 {
            return Err(IndexError::invalid_config("max_open_files must be > 0"));
        }

        if self.threads == Some(0) {
            return Err(IndexError::invalid_config("threads must be > 0 when set"));
        }

        if self.scan.max_message_len < 16 {
            return Err(IndexError::invalid_config(
                "scan.max_message_len is smaller than any GRIB message",
            ));
        }

        Ok(())
    }

    /// Hash of the settings that influence index content.
    ///
    /// Stored in every index file; an index written under a different
    /// fingerprint is never reused.
    pub fn fingerprint(&self) -> u32 {
        let fingerprint = Fingerprint {
            interval_policy: &self.interval_policy,
            split_intervals_by_length: self.split_intervals_by_length,
            scan: &self.scan,
        };
        match bincode::serialize(&fingerprint) {
            Ok(bytes) => crc32fast::hash(&bytes),
            Err(_) => 0,
        }
    }
}

fn parse_bool(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}
