//! Grid locators: geographic coordinates to decoded-array indices.
//!
//! Indices refer to the arrays produced by the slice reader, i.e. after
//! scan-mode normalisation: `x` runs west to east, `y` follows the row
//! order the [`ScanModePolicy`] leaves in place.

use std::f64::consts::PI;

use grib_parser::{GridDefinition, Projection, ScanModePolicy};

use crate::error::{IndexError, Result};

/// Lambert Conformal Conic projection of one grid.
///
/// Grid coordinates are relative to the first grid point, `i` growing
/// eastward and `j` northward.
#[derive(Debug, Clone)]
pub struct LambertConformal {
    /// Central meridian (LoV) in radians
    lon0: f64,
    /// Longitude of first grid point in radians
    lon1: f64,
    dx: f64,
    dy: f64,
    earth_radius: f64,
    /// Cone constant
    n: f64,
    f: f64,
    /// Rho at first grid point
    rho1: f64,
}

impl LambertConformal {
    /// Build from GRIB projection parameters (degrees, meters).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lat1_deg: f64,
        lon1_deg: f64,
        lov_deg: f64,
        latin1_deg: f64,
        latin2_deg: f64,
        dx: f64,
        dy: f64,
        earth_radius: f64,
    ) -> Self {
        let to_rad = PI / 180.0;

        let lat1 = lat1_deg * to_rad;
        let lon1 = lon1_deg * to_rad;
        let lon0 = lov_deg * to_rad;
        let latin1 = latin1_deg * to_rad;
        let latin2 = latin2_deg * to_rad;

        let n = if (latin1 - latin2).abs() < 1e-10 {
            // Tangent cone
            latin1.sin()
        } else {
            let ln_ratio = (latin1.cos() / latin2.cos()).ln();
            let tan_ratio =
                ((PI / 4.0 + latin2 / 2.0).tan() / (PI / 4.0 + latin1 / 2.0).tan()).ln();
            ln_ratio / tan_ratio
        };

        let f = (latin1.cos() * (PI / 4.0 + latin1 / 2.0).tan().powf(n)) / n;
        let rho1 = earth_radius * f / (PI / 4.0 + lat1 / 2.0).tan().powf(n);

        Self {
            lon0,
            lon1,
            dx,
            dy,
            earth_radius,
            n,
            f,
            rho1,
        }
    }

    fn rho(&self, lat: f64) -> f64 {
        self.earth_radius * self.f / (PI / 4.0 + lat / 2.0).tan().powf(self.n)
    }

    fn project(&self, rho: f64, lon: f64) -> (f64, f64) {
        let theta = self.n * normalize_radians(lon - self.lon0);
        (rho * theta.sin(), -rho * theta.cos())
    }

    /// Fractional grid coordinates of a geographic point.
    pub fn geo_to_grid(&self, lat_deg: f64, lon_deg: f64) -> (f64, f64) {
        let to_rad = PI / 180.0;
        let (x, y) = self.project(self.rho(lat_deg * to_rad), lon_deg * to_rad);
        let (x1, y1) = self.project(self.rho1, self.lon1);
        ((x - x1) / self.dx, (y - y1) / self.dy)
    }

    /// Geographic coordinates (lat, lon in degrees) of fractional grid
    /// coordinates.
    pub fn grid_to_geo(&self, i: f64, j: f64) -> (f64, f64) {
        let to_deg = 180.0 / PI;
        let (x1, y1) = self.project(self.rho1, self.lon1);
        let x = x1 + i * self.dx;
        let y = y1 + j * self.dy;

        let rho = (x * x + y * y).sqrt().copysign(self.n);
        let theta = (x / -y).atan();

        let lat = 2.0 * ((self.earth_radius * self.f / rho).powf(1.0 / self.n)).atan() - PI / 2.0;
        let lon = self.lon0 + theta / self.n;

        (lat * to_deg, normalize_degrees(lon * to_deg))
    }
}

fn normalize_radians(mut angle: f64) -> f64 {
    while angle > PI {
        angle -= 2.0 * PI;
    }
    while angle < -PI {
        angle += 2.0 * PI;
    }
    angle
}

fn normalize_degrees(lon: f64) -> f64 {
    let lon = (lon + 180.0).rem_euclid(360.0) - 180.0;
    if lon == -180.0 {
        180.0
    } else {
        lon
    }
}

#[derive(Debug, Clone)]
enum Mapping {
    LatLon {
        lat0: f64,
        lon0: f64,
        dlat: f64,
        dlon: f64,
    },
    Lambert {
        proj: LambertConformal,
        /// Array row of the first grid point
        row_origin: f64,
        /// -1 when array rows run south from the first grid point
        row_sign: f64,
    },
}

/// Translates geographic queries into grid indices for one grid.
#[derive(Debug, Clone)]
pub struct GridLocator {
    nx: usize,
    ny: usize,
    mapping: Mapping,
}

impl GridLocator {
    /// Locator for `grid`; only lat/lon and Lambert conformal grids are
    /// supported.
    pub fn new(grid: &GridDefinition, policy: &ScanModePolicy) -> Result<Self> {
        let nx = grid.nx as usize;
        let ny = grid.ny as usize;
        let mapping = match grid.projection {
            Projection::LatLon {
                la1,
                lo1,
                la2,
                lo2,
                di,
                dj,
            } => {
                // Decoded lat/lon rows always run south to north, columns west to east
                let lon0 = if grid.scan_mode & 0x80 != 0 { lo2 } else { lo1 };
                Mapping::LatLon {
                    lat0: la1.min(la2),
                    lon0,
                    dlat: dj.abs(),
                    dlon: di.abs(),
                }
            }
            Projection::LambertConformal {
                la1,
                lo1,
                lov,
                latin1,
                latin2,
                dx,
                dy,
            } => {
                let scans_north_to_south = grid.scan_mode & 0x40 == 0;
                let (row_origin, row_sign) = if !scans_north_to_south {
                    (0.0, 1.0)
                } else if policy.flip_rows(grid) {
                    (ny.saturating_sub(1) as f64, 1.0)
                } else {
                    (0.0, -1.0)
                };
                Mapping::Lambert {
                    proj: LambertConformal::new(
                        la1,
                        lo1,
                        lov,
                        latin1,
                        latin2,
                        dx,
                        dy,
                        grid.earth.radius(),
                    ),
                    row_origin,
                    row_sign,
                }
            }
            _ => {
                return Err(IndexError::invalid_config(format!(
                    "no grid locator for grid template {}",
                    grid.template
                )))
            }
        };
        Ok(Self { nx, ny, mapping })
    }

    /// Fractional (x, y) array coordinates of a point.
    pub fn fractional_index(&self, lat: f64, lon: f64) -> (f64, f64) {
        match &self.mapping {
            Mapping::LatLon {
                lat0,
                lon0,
                dlat,
                dlon,
            } => {
                let x = (lon - lon0).rem_euclid(360.0) / dlon;
                let y = (lat - lat0) / dlat;
                (x, y)
            }
            Mapping::Lambert {
                proj,
                row_origin,
                row_sign,
            } => {
                let (i, j) = proj.geo_to_grid(lat, lon);
                (i, row_origin + row_sign * j)
            }
        }
    }

    /// Nearest grid index `(x, y)` of a point, or `None` outside the grid.
    pub fn lat_lon_to_index(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        let (x, y) = self.fractional_index(lat, lon);
        let (x, y) = (x.round(), y.round());
        if x < 0.0 || y < 0.0 || x >= self.nx as f64 || y >= self.ny as f64 {
            return None;
        }
        Some((x as usize, y as usize))
    }

    /// Geographic coordinates (lat, lon) of grid index `(x, y)`.
    pub fn index_to_lat_lon(&self, x: usize, y: usize) -> (f64, f64) {
        match &self.mapping {
            Mapping::LatLon {
                lat0,
                lon0,
                dlat,
                dlon,
            } => (
                lat0 + y as f64 * dlat,
                normalize_degrees(lon0 + x as f64 * dlon),
            ),
            Mapping::Lambert {
                proj,
                row_origin,
                row_sign,
            } => proj.grid_to_geo(x as f64, (y as f64 - row_origin) * row_sign),
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.nx, self.ny)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grib_parser::EarthShape;
    use test_utils::{assert_approx_eq, fixtures::grid::*};

    fn central_us() -> GridDefinition {
        let spec = CENTRAL_US_TENTH;
        GridDefinition {
            template: 0,
            nx: spec.ni,
            ny: spec.nj,
            scan_mode: spec.scanning_mode,
            earth: EarthShape::Spherical { radius: 6_371_229.0 },
            projection: Projection::LatLon {
                la1: spec.la1,
                lo1: spec.lo1 + 360.0,
                la2: spec.la2(),
                lo2: spec.lo2() + 360.0,
                di: spec.di,
                dj: spec.dj,
            },
            hash: 0,
        }
    }

    fn hrrr() -> GridDefinition {
        GridDefinition {
            template: 30,
            nx: 1799,
            ny: 1059,
            scan_mode: 0x40,
            earth: EarthShape::Spherical { radius: 6_371_229.0 },
            projection: Projection::LambertConformal {
                la1: 21.138123,
                lo1: 237.280472,
                lov: 262.5,
                latin1: 38.5,
                latin2: 38.5,
                dx: 3000.0,
                dy: 3000.0,
            },
            hash: 0,
        }
    }

    #[test]
    fn test_central_us_documented_point() {
        let locator = GridLocator::new(&central_us(), &ScanModePolicy::default()).unwrap();
        let (lat, lon) = CENTRAL_US_POINT;
        assert_eq!(locator.lat_lon_to_index(lat, lon), Some(CENTRAL_US_INDEX));
    }

    #[test]
    fn test_lat_lon_inverse_and_bounds() {
        let locator = GridLocator::new(&central_us(), &ScanModePolicy::default()).unwrap();
        let (lat, lon) = locator.index_to_lat_lon(538, 97);
        assert_approx_eq!(lat, 41.37, 1e-9);
        assert_approx_eq!(lon, -91.1, 1e-9);

        assert_eq!(locator.lat_lon_to_index(10.0, -91.0), None);
        assert_eq!(locator.lat_lon_to_index(41.0, -60.0), None);
    }

    #[test]
    fn test_lambert_first_point_and_roundtrip() {
        let locator = GridLocator::new(&hrrr(), &ScanModePolicy::default()).unwrap();
        assert_eq!(locator.lat_lon_to_index(21.138123, -122.719528), Some((0, 0)));

        let (lat, lon) = locator.index_to_lat_lon(900, 500);
        let (x, y) = locator.fractional_index(lat, lon);
        assert_approx_eq!(x, 900.0, 0.01);
        assert_approx_eq!(y, 500.0, 0.01);

        // Kansas City sits near the middle of CONUS
        let (x, y) = locator.lat_lon_to_index(39.0, -94.5).unwrap();
        assert!(x > 700 && x < 1100, "x = {}", x);
        assert!(y > 400 && y < 700, "y = {}", y);
    }

    #[test]
    fn test_lambert_unflipped_north_to_south_rows() {
        let mut grid = hrrr();
        if let Projection::LambertConformal { la1, .. } = &mut grid.projection {
            *la1 = 47.8;
        }
        grid.scan_mode = 0x00;

        let locator = GridLocator::new(&grid, &ScanModePolicy::default()).unwrap();
        let (x, y) = locator.lat_lon_to_index(45.0, -121.0).unwrap();
        assert!(y > 0);

        let flipped = GridLocator::new(
            &grid,
            &ScanModePolicy {
                flip_projected_ns: true,
            },
        )
        .unwrap();
        assert_eq!(
            flipped.lat_lon_to_index(45.0, -121.0),
            Some((x, grid.ny as usize - 1 - y))
        );
    }

    #[test]
    fn test_unsupported_projection() {
        let mut grid = central_us();
        grid.projection = Projection::Other;
        assert!(GridLocator::new(&grid, &ScanModePolicy::default()).is_err());
    }
}
