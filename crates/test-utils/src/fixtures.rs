//! Common test fixtures for GRIB indexing tests.
//!
//! Literal interval sequences and grid layouts observed in real collections,
//! usable directly as builder inputs and expected outputs.

/// Forecast interval sequences, in hours.
pub mod intervals {
    /// Sliding 12 hour accumulations with a 3 hour stride:
    /// `{0,12},{3,15},{6,18},...,{36,48}`.
    pub fn sliding_12h() -> Vec<(u32, u32)> {
        (0..=36).step_by(3).map(|start| (start, start + 12)).collect()
    }

    /// Intervals sharing an end hour; only the narrowest is representable.
    pub const SAME_END: [(u32, u32); 3] = [(12, 15), (9, 15), (3, 15)];

    /// Mixed-interval accumulation seen in a center 57, subcenter 1,
    /// table 2 GRIB1 collection: 6 hour steps to 192, then 12 hour steps.
    pub fn grib1_57_1_2() -> Vec<(u32, u32)> {
        let mut bounds: Vec<(u32, u32)> = (0..192).step_by(6).map(|s| (s, s + 6)).collect();
        bounds.extend((192..240).step_by(12).map(|s| (s, s + 12)));
        bounds
    }
}

/// Common grid layouts for testing.
pub mod grid {
    /// Lat/lon grid layout, angles in degrees.
    #[derive(Debug, Clone, Copy)]
    pub struct LatLonSpec {
        pub ni: u32,
        pub nj: u32,
        /// First grid point latitude (south edge when scanning +j).
        pub la1: f64,
        pub lo1: f64,
        pub di: f64,
        pub dj: f64,
        pub scanning_mode: u8,
    }

    impl LatLonSpec {
        pub fn la2(&self) -> f64 {
            self.la1 + (self.nj - 1) as f64 * self.dj
        }

        pub fn lo2(&self) -> f64 {
            self.lo1 + (self.ni - 1) as f64 * self.di
        }
    }

    /// 0.1 degree grid over the central US on which (41.3669944444N,
    /// 91.140575W) falls on grid index x=538, y=97.
    pub const CENTRAL_US_TENTH: LatLonSpec = LatLonSpec {
        ni: 600,
        nj: 120,
        la1: 31.67,
        lo1: -144.9,
        di: 0.1,
        dj: 0.1,
        scanning_mode: 0x40,
    };

    /// The documented lookup point on [`CENTRAL_US_TENTH`].
    pub const CENTRAL_US_POINT: (f64, f64) = (41.3669944444, -91.140575);
    pub const CENTRAL_US_INDEX: (usize, usize) = (538, 97);
}
