//! Multidimensional indexing and aggregation over GRIB records.
//!
//! Scanned records are turned into per-variable coordinate axes and dense
//! index tables ([`IndexBuilder`]), persisted beside their sources
//! ([`DiskIndexCache`]), merged across files ([`AggregationPlanner`]) and
//! read back as numeric arrays ([`SliceReader`]).
//!
//! ```ignore
//! use std::sync::Arc;
//! use grib_index::{FilePool, IndexBuilder, IndexConfig, SliceReader, SliceRequest};
//!
//! let config = IndexConfig::from_env();
//! let builder = IndexBuilder::new(config.clone());
//! let index = builder.index_file("gfs.t12z.pgrb2.0p25.f006".as_ref(), None)?;
//!
//! let reader = SliceReader::new(
//!     Arc::new(index.collection),
//!     Arc::new(FilePool::new(config.max_open_files)),
//!     config.scan_mode,
//! );
//! let value = reader.read_point("TMP_height_above_ground", 0, 0, 0, 0, 97, 538)?;
//! ```

pub mod aggregate;
pub mod best;
pub mod builder;
pub mod cache;
pub mod collection;
pub mod config;
pub mod coords;
pub mod error;
pub mod extract;
pub mod format;
pub mod geo;
pub mod manager;
pub mod pool;
pub mod reader;

pub use aggregate::{AggregationOutcome, AggregationPlanner, JoinDimension, JoinSpec, RunDatePattern};
pub use best::{BestTime, BestTimeSeries};
pub use builder::{BuildReport, DuplicateRecord, FileIndex, IndexBuilder};
pub use cache::{DiskIndexCache, ScourReport, SourceIdentity};
pub use collection::{Cell, Collection, IndexEntry, Variable};
pub use config::{IndexConfig, IntervalPolicy};
pub use coords::{CoordinateAxis, IntervalSelector, LevelCoord, TimeCoord};
pub use error::{AggregationError, IndexError, Result};
pub use extract::{variable_name, CoordTuple, CoordinateExtractor, ParameterKey};
pub use format::{IndexKind, FORMAT_VERSION};
pub use geo::{GridLocator, LambertConformal};
pub use manager::{CollectionManager, CollectionSpec, RecheckOutcome, Snapshot, SourceSpec};
pub use pool::{FilePool, PoolStats, PooledFile};
pub use reader::{SliceReader, SliceRequest};
