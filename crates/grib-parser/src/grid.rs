//! Grid definitions shared by GRIB1 and GRIB2 records.

use serde::{Deserialize, Serialize};

/// Shape of the earth used by a grid definition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EarthShape {
    Spherical { radius: f64 },
    Oblate { major_axis: f64, minor_axis: f64 },
}

impl EarthShape {
    /// Default GRIB sphere (radius 6367.47 km).
    pub const DEFAULT_SPHERE: EarthShape = EarthShape::Spherical { radius: 6_367_470.0 };

    /// Decode GRIB2 code table 3.2.
    ///
    /// `radius`, `major` and `minor` are the already-scaled values from the
    /// template; they are only consulted for the shapes that use them.
    pub fn from_grib2(code: u8, radius: Option<f64>, major: Option<f64>, minor: Option<f64>) -> Self {
        match code {
            0 => Self::Spherical { radius: 6_367_470.0 },
            1 => Self::Spherical {
                radius: radius.unwrap_or(6_367_470.0),
            },
            2 => Self::Oblate {
                major_axis: 6_378_160.0,
                minor_axis: 6_356_775.0,
            },
            3 => match (major, minor) {
                (Some(a), Some(b)) => Self::Oblate {
                    major_axis: a * 1000.0,
                    minor_axis: b * 1000.0,
                },
                _ => Self::DEFAULT_SPHERE,
            },
            4 => Self::Oblate {
                major_axis: 6_378_137.0,
                minor_axis: 6_356_752.314,
            },
            5 => Self::Oblate {
                major_axis: 6_378_137.0,
                minor_axis: 6_356_752.3142,
            },
            6 => Self::Spherical { radius: 6_371_229.0 },
            7 => match (major, minor) {
                (Some(a), Some(b)) => Self::Oblate {
                    major_axis: a,
                    minor_axis: b,
                },
                _ => Self::DEFAULT_SPHERE,
            },
            8 => Self::Spherical { radius: 6_371_200.0 },
            9 => Self::Oblate {
                major_axis: 6_377_563.396,
                minor_axis: 6_356_256.909,
            },
            _ => Self::DEFAULT_SPHERE,
        }
    }

    /// GRIB1 uses bit 2 of the resolution flags: set means IAU 1965 oblate.
    pub fn from_grib1(resolution_flags: u8) -> Self {
        if resolution_flags & 0x40 != 0 {
            Self::Oblate {
                major_axis: 6_378_160.0,
                minor_axis: 6_356_775.0,
            }
        } else {
            Self::DEFAULT_SPHERE
        }
    }

    /// Radius to use for spherical projection math.
    pub fn radius(&self) -> f64 {
        match *self {
            Self::Spherical { radius } => radius,
            Self::Oblate {
                major_axis,
                minor_axis,
            } => (major_axis + minor_axis) / 2.0,
        }
    }
}

/// Projection-specific parameters (all angles in degrees, lengths in meters).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    LatLon {
        la1: f64,
        lo1: f64,
        la2: f64,
        lo2: f64,
        di: f64,
        dj: f64,
    },
    LambertConformal {
        la1: f64,
        lo1: f64,
        lov: f64,
        latin1: f64,
        latin2: f64,
        dx: f64,
        dy: f64,
    },
    PolarStereographic {
        la1: f64,
        lo1: f64,
        lov: f64,
        dx: f64,
        dy: f64,
        south_pole: bool,
    },
    Mercator {
        la1: f64,
        lo1: f64,
        la2: f64,
        lo2: f64,
        lad: f64,
        di: f64,
        dj: f64,
    },
    /// Grid template this crate does not interpret; only the shape is known.
    Other,
}

/// Horizontal grid of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridDefinition {
    /// GRIB2 grid template number, or GRIB1 data representation type.
    pub template: u16,
    pub nx: u32,
    pub ny: u32,
    /// Scanning mode flags (same bit layout in both editions).
    pub scan_mode: u8,
    pub earth: EarthShape,
    pub projection: Projection,
    /// CRC32 of the raw grid section body, used as the grid identity.
    pub hash: u32,
}

impl GridDefinition {
    /// Grid referenced by a GRIB1 catalogued grid number without a GDS.
    pub fn predefined(grid_id: u8) -> Self {
        Self {
            template: 255,
            nx: 0,
            ny: 0,
            scan_mode: 0x40,
            earth: EarthShape::DEFAULT_SPHERE,
            projection: Projection::Other,
            hash: crc32fast::hash(&[0xFF, grid_id]),
        }
    }

    pub fn is_lat_lon(&self) -> bool {
        matches!(self.projection, Projection::LatLon { .. })
    }

    pub fn num_points(&self) -> usize {
        self.nx as usize * self.ny as usize
    }

    /// Two definitions describe the same grid.
    pub fn same_grid(&self, other: &GridDefinition) -> bool {
        self.hash == other.hash && self.nx == other.nx && self.ny == other.ny
    }
}
