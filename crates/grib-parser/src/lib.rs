//! GRIB1/GRIB2 record scanning (WMO FM 92 GRIB Editions 1 and 2).
//!
//! This crate walks raw GRIB byte streams and yields one descriptor per
//! record without materialising the packed payloads. Each descriptor is an
//! edition-tagged [`RawRecord`] exposing the [`GribRecord`] capability
//! trait, which is all the indexing layer needs to derive coordinates.
//!
//! Payload decoding lives in [`unpacking`] and is only invoked when a
//! caller hands in the exact bytes of a previously scanned record.
//!
//! ```ignore
//! use grib_parser::{scan_file, GribRecord, ScanOptions};
//!
//! for record in scan_file("gfs.grib2", ScanOptions::default())? {
//!     let record = record?;
//!     println!("{:?} at {}", record.parameter_id(), record.locator().pos);
//! }
//! ```

pub mod error;
pub mod grid;
pub mod options;
pub mod record;
pub mod scanner;
pub mod sections;
pub mod tables;
pub mod unpacking;

pub use error::{GribError, Result};
pub use grid::{EarthShape, GridDefinition, Projection};
pub use options::{ScanModePolicy, ScanOptions};
pub use record::{
    EnsembleInfo, GribRecord, Grib1Record, Grib2Record, LevelInfo, ParamId, RawRecord,
    RecordLocator, TimeInfo, TimeUnit,
};
pub use scanner::{read_message, scan_file, RecordScanner};
pub use unpacking::{decode_message, DecodedField};
