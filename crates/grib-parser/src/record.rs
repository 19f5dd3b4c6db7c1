//! Edition-tagged record descriptors and the capability trait shared by both
//! editions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GribError, Result};
use crate::grid::GridDefinition;
use crate::sections::grib1::Grib1Pds;
use crate::sections::grib2::{DataRepresentation, Identification, ProductDefinition};
use crate::tables;

/// Physical location of a record inside its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordLocator {
    /// Byte offset of the enclosing message (`GRIB` marker).
    pub pos: u64,
    /// Length of the enclosing message in bytes.
    pub len: u64,
    /// Field index within the message; always 0 for GRIB1.
    pub field: u16,
}

/// Edition-specific parameter identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ParamId {
    Grib1 {
        center: u16,
        subcenter: u16,
        table_version: u8,
        number: u8,
    },
    Grib2 {
        discipline: u8,
        category: u8,
        number: u8,
    },
}

impl ParamId {
    pub fn edition(&self) -> u8 {
        match self {
            Self::Grib1 { .. } => 1,
            Self::Grib2 { .. } => 2,
        }
    }
}

/// Vertical level of a record. `value2` is present for layers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelInfo {
    pub level_type: u8,
    pub value1: f64,
    pub value2: Option<f64>,
}

impl LevelInfo {
    pub fn is_layer(&self) -> bool {
        self.value2.is_some()
    }
}

/// Ensemble membership of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnsembleInfo {
    /// Code table 4.6 type of ensemble forecast.
    pub kind: u8,
    /// Perturbation number.
    pub number: u16,
    /// Number of forecasts in the ensemble.
    pub size: u16,
}

/// Time units shared by GRIB1 table 4 and GRIB2 table 4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeUnit {
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Decade,
    Normal,
    Century,
    Hours3,
    Hours6,
    Hours12,
    Minutes15,
    Minutes30,
    Second,
}

impl TimeUnit {
    pub fn from_grib1(code: u8) -> Option<Self> {
        Some(match code {
            13 => Self::Minutes15,
            14 => Self::Minutes30,
            254 => Self::Second,
            15..=253 | 255 => return None,
            other => return Self::common(other),
        })
    }

    pub fn from_grib2(code: u8) -> Option<Self> {
        match code {
            13 => Some(Self::Second),
            other => Self::common(other),
        }
    }

    fn common(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Minute,
            1 => Self::Hour,
            2 => Self::Day,
            3 => Self::Month,
            4 => Self::Year,
            5 => Self::Decade,
            6 => Self::Normal,
            7 => Self::Century,
            10 => Self::Hours3,
            11 => Self::Hours6,
            12 => Self::Hours12,
            _ => return None,
        })
    }

    /// Fixed length of the unit in seconds; calendar units have none.
    pub fn seconds(self) -> Option<i64> {
        Some(match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Minutes15 => 900,
            Self::Minutes30 => 1800,
            Self::Hour => 3600,
            Self::Hours3 => 3 * 3600,
            Self::Hours6 => 6 * 3600,
            Self::Hours12 => 12 * 3600,
            Self::Day => 86_400,
            Self::Month | Self::Year | Self::Decade | Self::Normal | Self::Century => return None,
        })
    }

    /// Convert `count` units to minutes.
    pub fn to_minutes(self, count: i64) -> Result<i64> {
        let seconds = self.seconds().ok_or(GribError::UnsupportedTemplate {
            what: "calendar time unit",
            value: count as u32,
        })?;
        Ok(count * seconds / 60)
    }
}

/// Forecast time of a record, in minutes relative to its reference time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeInfo {
    Instant { offset: i64 },
    Interval { start: i64, end: i64 },
}

impl TimeInfo {
    pub fn is_interval(&self) -> bool {
        matches!(self, Self::Interval { .. })
    }
}

/// Capabilities every scanned record exposes regardless of edition.
pub trait GribRecord {
    fn edition(&self) -> u8;
    fn locator(&self) -> RecordLocator;
    fn parameter_id(&self) -> ParamId;
    fn level_info(&self) -> LevelInfo;
    fn time_info(&self) -> Result<TimeInfo>;
    fn reference_time(&self) -> DateTime<Utc>;
    fn ensemble(&self) -> Option<EnsembleInfo>;
    /// Derived ensemble statistic (code table 4.7), e.g. ensemble mean.
    fn derived_type(&self) -> Option<u8>;
    /// Statistical process (code table 4.10), e.g. accumulation.
    fn statistic(&self) -> Option<u8>;
    /// Type of generating process (code table 4.3); GRIB1 reports 2 (forecast).
    fn generating_process(&self) -> u8;
    fn grid(&self) -> &GridDefinition;
}

/// A GRIB1 message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib1Record {
    pub locator: RecordLocator,
    pub pds: Grib1Pds,
    pub grid: GridDefinition,
    pub has_bitmap: bool,
    pub bits_per_value: u8,
}

impl GribRecord for Grib1Record {
    fn edition(&self) -> u8 {
        1
    }

    fn locator(&self) -> RecordLocator {
        self.locator
    }

    fn parameter_id(&self) -> ParamId {
        ParamId::Grib1 {
            center: self.pds.center as u16,
            subcenter: self.pds.subcenter as u16,
            table_version: self.pds.table_version,
            number: self.pds.parameter,
        }
    }

    fn level_info(&self) -> LevelInfo {
        let pds = &self.pds;
        match tables::grib1_level_kind(pds.level_type) {
            tables::LevelKind::Surface => LevelInfo {
                level_type: pds.level_type,
                value1: 0.0,
                value2: None,
            },
            tables::LevelKind::Single => LevelInfo {
                level_type: pds.level_type,
                value1: f64::from(u16::from_be_bytes(pds.level)),
                value2: None,
            },
            tables::LevelKind::Layer => LevelInfo {
                level_type: pds.level_type,
                value1: f64::from(pds.level[0]),
                value2: Some(f64::from(pds.level[1])),
            },
        }
    }

    fn time_info(&self) -> Result<TimeInfo> {
        let pds = &self.pds;
        let unit = TimeUnit::from_grib1(pds.time_unit).ok_or(GribError::UnsupportedTemplate {
            what: "GRIB1 time unit",
            value: pds.time_unit as u32,
        })?;
        let p1 = i64::from(pds.p1);
        let p2 = i64::from(pds.p2);
        let info = match pds.time_range_indicator {
            0 | 1 => TimeInfo::Instant {
                offset: unit.to_minutes(p1)?,
            },
            10 => TimeInfo::Instant {
                offset: unit.to_minutes(p1 << 8 | p2)?,
            },
            2..=5 => TimeInfo::Interval {
                start: unit.to_minutes(p1)?,
                end: unit.to_minutes(p2)?,
            },
            6 => TimeInfo::Interval {
                start: unit.to_minutes(-p1)?,
                end: unit.to_minutes(-p2)?,
            },
            7 => TimeInfo::Interval {
                start: unit.to_minutes(-p1)?,
                end: unit.to_minutes(p2)?,
            },
            other => {
                return Err(GribError::UnsupportedTemplate {
                    what: "GRIB1 time range indicator",
                    value: other as u32,
                })
            }
        };
        Ok(info)
    }

    fn reference_time(&self) -> DateTime<Utc> {
        self.pds.reference_time
    }

    fn ensemble(&self) -> Option<EnsembleInfo> {
        None
    }

    fn derived_type(&self) -> Option<u8> {
        None
    }

    fn statistic(&self) -> Option<u8> {
        match self.pds.time_range_indicator {
            3 | 6 | 7 => Some(0),
            4 => Some(1),
            5 => Some(4),
            _ => None,
        }
    }

    fn generating_process(&self) -> u8 {
        2
    }

    fn grid(&self) -> &GridDefinition {
        &self.grid
    }
}

/// One field of a GRIB2 message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib2Record {
    pub locator: RecordLocator,
    pub discipline: u8,
    pub identification: Identification,
    pub grid: GridDefinition,
    pub product: ProductDefinition,
    pub data_representation: DataRepresentation,
    pub bitmap_indicator: u8,
}

impl GribRecord for Grib2Record {
    fn edition(&self) -> u8 {
        2
    }

    fn locator(&self) -> RecordLocator {
        self.locator
    }

    fn parameter_id(&self) -> ParamId {
        ParamId::Grib2 {
            discipline: self.discipline,
            category: self.product.parameter_category,
            number: self.product.parameter_number,
        }
    }

    fn level_info(&self) -> LevelInfo {
        let product = &self.product;
        match product.first_surface {
            Some((level_type, value1)) => LevelInfo {
                level_type,
                value1,
                value2: product.second_surface.map(|(_, v)| v),
            },
            None => LevelInfo {
                level_type: 255,
                value1: 0.0,
                value2: None,
            },
        }
    }

    fn time_info(&self) -> Result<TimeInfo> {
        let product = &self.product;
        let unit = TimeUnit::from_grib2(product.time_unit).ok_or(GribError::UnsupportedTemplate {
            what: "GRIB2 time unit",
            value: product.time_unit as u32,
        })?;
        let start = unit.to_minutes(product.forecast_time)?;
        match &product.statistic {
            Some(stat) => {
                let end = (stat.end_time - self.identification.reference_time).num_minutes();
                Ok(TimeInfo::Interval { start, end })
            }
            None => Ok(TimeInfo::Instant { offset: start }),
        }
    }

    fn reference_time(&self) -> DateTime<Utc> {
        self.identification.reference_time
    }

    fn ensemble(&self) -> Option<EnsembleInfo> {
        self.product.ensemble
    }

    fn derived_type(&self) -> Option<u8> {
        self.product.derived_type
    }

    fn statistic(&self) -> Option<u8> {
        self.product.statistic.as_ref().map(|s| s.process)
    }

    fn generating_process(&self) -> u8 {
        self.product.generating_process
    }

    fn grid(&self) -> &GridDefinition {
        &self.grid
    }
}

/// A scanned record of either edition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RawRecord {
    Grib1(Grib1Record),
    Grib2(Grib2Record),
}

macro_rules! dispatch {
    ($self:ident, $r:ident => $e:expr) => {
        match $self {
            RawRecord::Grib1($r) => $e,
            RawRecord::Grib2($r) => $e,
        }
    };
}

impl GribRecord for RawRecord {
    fn edition(&self) -> u8 {
        dispatch!(self, r => r.edition())
    }

    fn locator(&self) -> RecordLocator {
        dispatch!(self, r => r.locator())
    }

    fn parameter_id(&self) -> ParamId {
        dispatch!(self, r => r.parameter_id())
    }

    fn level_info(&self) -> LevelInfo {
        dispatch!(self, r => r.level_info())
    }

    fn time_info(&self) -> Result<TimeInfo> {
        dispatch!(self, r => r.time_info())
    }

    fn reference_time(&self) -> DateTime<Utc> {
        dispatch!(self, r => r.reference_time())
    }

    fn ensemble(&self) -> Option<EnsembleInfo> {
        dispatch!(self, r => r.ensemble())
    }

    fn derived_type(&self) -> Option<u8> {
        dispatch!(self, r => r.derived_type())
    }

    fn statistic(&self) -> Option<u8> {
        dispatch!(self, r => r.statistic())
    }

    fn generating_process(&self) -> u8 {
        dispatch!(self, r => r.generating_process())
    }

    fn grid(&self) -> &GridDefinition {
        dispatch!(self, r => r.grid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_unit_tables_differ_on_code_13() {
        assert_eq!(TimeUnit::from_grib1(13), Some(TimeUnit::Minutes15));
        assert_eq!(TimeUnit::from_grib2(13), Some(TimeUnit::Second));
        assert_eq!(TimeUnit::from_grib1(254), Some(TimeUnit::Second));
        assert_eq!(TimeUnit::from_grib2(254), None);
    }

    #[test]
    fn test_time_unit_to_minutes() {
        assert_eq!(TimeUnit::Hour.to_minutes(6).unwrap(), 360);
        assert_eq!(TimeUnit::Hours3.to_minutes(2).unwrap(), 360);
        assert_eq!(TimeUnit::Second.to_minutes(120).unwrap(), 2);
        assert!(TimeUnit::Month.to_minutes(1).is_err());
    }
}
