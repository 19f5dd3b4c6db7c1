//! Coordinate extraction: record descriptor to (parameter, coordinate tuple).

use chrono::{DateTime, Utc};
use grib_parser::tables::{self, ParameterTables};
use grib_parser::{GribError, GribRecord, ParamId};
use serde::{Deserialize, Serialize};

use crate::config::IndexConfig;
use crate::coords::{LevelCoord, TimeCoord};
use crate::error::{IndexError, Result};

/// Identity of a logical variable.
///
/// Two records belong to the same variable only when every field matches,
/// so forecast and error products, different statistics and different
/// grids never collapse into one variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParameterKey {
    pub param: ParamId,
    pub level_type: u8,
    pub layer: bool,
    /// Records carry time intervals rather than instants.
    pub interval: bool,
    /// Statistical process (code table 4.10).
    pub statistic: Option<u8>,
    /// Interval width in minutes, only when intervals are split by length.
    pub interval_length: Option<i64>,
    /// Derived ensemble statistic (code table 4.7).
    pub derived: Option<u8>,
    /// Generating process for forecast (6) or analysis (7) error products.
    pub error_kind: Option<u8>,
    pub ensemble: bool,
    /// Grid identity (CRC32 of the grid section body).
    pub grid_hash: u32,
}

impl ParameterKey {
    pub fn edition(&self) -> u8 {
        self.param.edition()
    }
}

/// Position of one record in the variable's coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordTuple {
    pub run: DateTime<Utc>,
    pub time: TimeCoord,
    pub level: Option<LevelCoord>,
    pub ensemble: Option<u16>,
}

/// Derives parameter keys and coordinate tuples from scanned records.
#[derive(Debug, Clone, Default)]
pub struct CoordinateExtractor {
    split_intervals_by_length: bool,
}

impl CoordinateExtractor {
    pub fn new(config: &IndexConfig) -> Self {
        Self {
            split_intervals_by_length: config.split_intervals_by_length,
        }
    }

    /// Extract the variable identity and coordinates of `record`.
    ///
    /// Fails for records whose time cannot be expressed in minutes
    /// (calendar units such as months).
    pub fn extract<R: GribRecord + ?Sized>(&self, record: &R) -> Result<(ParameterKey, CoordTuple)> {
        let time: TimeCoord = record.time_info().map_err(time_error)?.into();
        let level_info = record.level_info();
        let edition = record.edition();

        let level = if tables::is_vertical_coordinate(edition, level_info.level_type) {
            Some(LevelCoord {
                value1: level_info.value1,
                value2: level_info.value2,
            })
        } else {
            None
        };

        let ensemble = record.ensemble().map(|e| e.number);
        let error_kind = match record.generating_process() {
            kind @ (6 | 7) => Some(kind),
            _ => None,
        };
        let interval_length = if self.split_intervals_by_length && time.is_interval() {
            Some(time.width())
        } else {
            None
        };

        let key = ParameterKey {
            param: record.parameter_id(),
            level_type: level_info.level_type,
            layer: level_info.is_layer(),
            interval: time.is_interval(),
            statistic: record.statistic(),
            interval_length,
            derived: record.derived_type(),
            error_kind,
            ensemble: ensemble.is_some(),
            grid_hash: record.grid().hash,
        };

        let tuple = CoordTuple {
            run: record.reference_time(),
            time,
            level,
            ensemble,
        };

        Ok((key, tuple))
    }
}

fn time_error(err: GribError) -> IndexError {
    IndexError::UnsupportedTimeUnit(err.to_string())
}

/// Human-readable variable name for `key`, e.g. `APCP_surface_6h_accumulation`.
///
/// Names are not guaranteed unique; the builder disambiguates collisions.
pub fn variable_name(key: &ParameterKey, tables: &ParameterTables) -> String {
    let edition = key.edition();
    let mut name = tables.parameter_name(&key.param);

    name.push('_');
    name.push_str(&tables::level_name(edition, key.level_type));
    if key.layer && !name.ends_with("_layer") {
        name.push_str("_layer");
    }

    if let Some(length) = key.interval_length {
        if length % 60 == 0 {
            name.push_str(&format!("_{}h", length / 60));
        } else {
            name.push_str(&format!("_{}min", length));
        }
    }

    if let Some(process) = key.statistic {
        name.push('_');
        name.push_str(&tables::statistic_suffix(process));
    }

    if let Some(derived) = key.derived {
        name.push('_');
        name.push_str(&tables::derived_suffix(derived));
    }

    match key.error_kind {
        Some(6) => name.push_str("_error"),
        Some(_) => name.push_str("_analysis_error"),
        None => {}
    }

    name
}
