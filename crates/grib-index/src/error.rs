//! Error types for indexing, aggregation and slice reads.

use std::path::PathBuf;

use grib_parser::GribError;
use thiserror::Error;

/// Errors raised by the indexing layer.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A source file could not be scanned. Fatal for that file only.
    #[error("format error in {path}: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: GribError,
    },

    /// Per-file collections could not be merged.
    #[error(transparent)]
    Aggregation(#[from] AggregationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record referenced by the index could not be decoded.
    #[error("failed to decode record at offset {pos} of {path}: {source}")]
    Decode {
        path: PathBuf,
        pos: u64,
        #[source]
        source: GribError,
    },

    #[error("variable not found: {0}")]
    VariableNotFound(String),

    /// A requested index range falls outside a dimension.
    #[error("{dimension} range {start}..{end} out of bounds (size {size})")]
    OutOfRange {
        dimension: &'static str,
        start: usize,
        end: usize,
        size: usize,
    },

    #[error("unsupported time unit: {0}")]
    UnsupportedTimeUnit(String),

    /// Index file or cache entry could not be encoded or decoded.
    #[error("index serialization error: {0}")]
    Serialization(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl IndexError {
    /// Wrap a scanner error for `path`.
    ///
    /// I/O failures stay I/O errors; everything else marks the file as
    /// unreadable.
    pub fn from_scan(path: impl Into<PathBuf>, source: GribError) -> Self {
        match source {
            GribError::Io(e) => Self::Io(e),
            source => Self::Format {
                path: path.into(),
                source,
            },
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}

impl From<bincode::Error> for IndexError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors that prevent a collection from being produced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationError {
    #[error("aggregation has no usable source files")]
    Empty,

    /// A non-joined dimension differs between sources.
    #[error("variable {variable}: {dimension} axis differs in {path}")]
    ShapeMismatch {
        variable: String,
        dimension: &'static str,
        path: PathBuf,
    },

    /// Sources do not carry the same set of variables.
    #[error("variable {variable} missing from {path}")]
    ParameterMismatch { variable: String, path: PathBuf },

    /// Two sources contribute the same value on the join dimension.
    #[error("duplicate {dimension} value {value} in {path}")]
    DuplicateJoinValue {
        dimension: &'static str,
        value: String,
        path: PathBuf,
    },

    /// Sources are not in ascending join order and sorting was not requested.
    #[error("{path} is out of order on the {dimension} dimension")]
    OutOfOrder {
        dimension: &'static str,
        path: PathBuf,
    },

    /// Two union sources define the same variable name.
    #[error("variable {variable} defined by both {first} and {second}")]
    DuplicateVariable {
        variable: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// A run time could not be derived from the file name.
    #[error("cannot derive run time from {0}")]
    RunTimeUnavailable(PathBuf),

    /// Files failed to index and the join type does not tolerate gaps.
    #[error("{} source file(s) failed to index", .0.len())]
    FilesFailed(Vec<PathBuf>),
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
