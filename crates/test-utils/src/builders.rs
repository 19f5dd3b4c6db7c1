//! Synthetic GRIB1/GRIB2 message builders.
//!
//! Messages produced here have valid structure and simple-packed data so
//! tests can exercise the scanner, the indexer and the decoder without
//! shipping binary fixtures. NaN values in the data become bitmap holes.

use chrono::{Datelike, Duration, NaiveDate, Timelike};

/// Grid template written into GRIB2 section 3.
#[derive(Debug, Clone, PartialEq)]
pub enum Grib2Grid {
    /// Template 3.0, angles in microdegrees.
    LatLon {
        ni: u32,
        nj: u32,
        la1: i32,
        lo1: i32,
        la2: i32,
        lo2: i32,
        di: u32,
        dj: u32,
    },
    /// Template 3.30, angles in microdegrees and grid lengths in millimetres.
    Lambert {
        nx: u32,
        ny: u32,
        la1: i32,
        lo1: i32,
        lov: i32,
        dx: u32,
        dy: u32,
        latin1: i32,
        latin2: i32,
    },
}

impl Grib2Grid {
    fn dims(&self) -> (u32, u32) {
        match *self {
            Grib2Grid::LatLon { ni, nj, .. } => (ni, nj),
            Grib2Grid::Lambert { nx, ny, .. } => (nx, ny),
        }
    }
}

/// Build a GRIB2 message (or one field of a multi-field message).
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    // Grid definition
    grid: Grib2Grid,
    earth_shape: u8,
    scanning_mode: u8,
    // Product definition
    param_category: u8,
    param_number: u8,
    generating_process: u8,
    time_unit: u8,
    forecast_time: i32,
    level_type: u8,
    level_scale: i8,
    level_value: u32,
    second_level: Option<(u8, u32)>,
    ensemble: Option<(u8, u8, u8)>,
    derived: Option<u8>,
    /// (statistical process, end of interval in `time_unit` units)
    statistic: Option<(u8, i32)>,
    // Data
    decimal_scale: i16,
    bits_per_value: u8,
    data_values: Vec<f32>,
    reuse_bitmap: bool,
    declared_length: Option<u64>,
}

impl Grib2Builder {
    /// Create a new builder with defaults for GFS-like data
    pub fn new_gfs() -> Self {
        // Small 10x10 grid over CONUS, 2 m temperature
        Self {
            discipline: 0,
            center: 7,
            year: 2025,
            month: 12,
            day: 10,
            hour: 12,
            minute: 0,
            grid: Grib2Grid::LatLon {
                ni: 10,
                nj: 10,
                la1: 45_000_000,
                lo1: 230_000_000,
                la2: 36_000_000,
                lo2: 239_000_000,
                di: 1_000_000,
                dj: 1_000_000,
            },
            earth_shape: 6,
            scanning_mode: 0b0000_0000, // +i, -j, i consecutive
            param_category: 0,
            param_number: 0,
            generating_process: 2,
            time_unit: 1,
            forecast_time: 0,
            level_type: 103,
            level_scale: 0,
            level_value: 2,
            second_level: None,
            ensemble: None,
            derived: None,
            statistic: None,
            decimal_scale: 0,
            bits_per_value: 16,
            data_values: vec![288.15; 100],
            reuse_bitmap: false,
            declared_length: None,
        }
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Lat/lon grid of `ni` x `nj` points with 1 degree spacing, scanning
    /// north to south from 45N 230E.
    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.grid = Grib2Grid::LatLon {
            ni,
            nj,
            la1: 45_000_000,
            lo1: 230_000_000,
            la2: 45_000_000 - (nj as i32 - 1) * 1_000_000,
            lo2: 230_000_000 + (ni as i32 - 1) * 1_000_000,
            di: 1_000_000,
            dj: 1_000_000,
        };
        self.data_values = vec![0.0; (ni * nj) as usize];
        self
    }

    pub fn with_grid_template(mut self, grid: Grib2Grid) -> Self {
        let (nx, ny) = grid.dims();
        self.grid = grid;
        self.data_values = vec![0.0; (nx * ny) as usize];
        self
    }

    pub fn with_scanning_mode(mut self, scanning_mode: u8) -> Self {
        self.scanning_mode = scanning_mode;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.param_category = category;
        self.param_number = number;
        self
    }

    pub fn with_generating_process(mut self, process: u8) -> Self {
        self.generating_process = process;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    /// Layer between two surfaces of the same type.
    pub fn with_layer(mut self, level_type: u8, top: u32, bottom: u32) -> Self {
        self.level_type = level_type;
        self.level_value = top;
        self.second_level = Some((level_type, bottom));
        self
    }

    pub fn with_time_unit(mut self, time_unit: u8) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.time_unit = 1;
        self.forecast_time = hour as i32;
        self
    }

    /// Statistically processed interval `[start, end]` in hours (template 4.8).
    pub fn with_interval(mut self, start: u32, end: u32, process: u8) -> Self {
        self.time_unit = 1;
        self.forecast_time = start as i32;
        self.statistic = Some((process, end as i32));
        self
    }

    /// Ensemble member (template 4.1, or 4.11 with an interval).
    pub fn with_ensemble(mut self, kind: u8, number: u8, size: u8) -> Self {
        self.ensemble = Some((kind, number, size));
        self
    }

    /// Derived ensemble forecast (template 4.2, or 4.12 with an interval).
    pub fn with_derived(mut self, derived: u8) -> Self {
        self.derived = Some(derived);
        self
    }

    pub fn with_decimal_scale(mut self, decimal_scale: i16) -> Self {
        self.decimal_scale = decimal_scale;
        self
    }

    pub fn with_bits_per_value(mut self, bits: u8) -> Self {
        self.bits_per_value = bits;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        let (nx, ny) = self.grid.dims();
        self.data_values = vec![value; (nx * ny) as usize];
        self
    }

    /// Values in scanning order; NaN marks a missing point.
    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    /// Write bitmap indicator 254 (reuse the previous field's bitmap).
    pub fn with_reused_bitmap(mut self) -> Self {
        self.reuse_bitmap = true;
        self
    }

    /// Write this length into section 0 instead of the real one.
    pub fn with_declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }

    /// Build the complete GRIB2 message bytes
    pub fn build(&self) -> Vec<u8> {
        Self::build_multi(std::slice::from_ref(self))
    }

    /// Build one message holding every field; section 0 and 1 come from the
    /// first builder, sections 3 to 7 repeat per field.
    pub fn build_multi(fields: &[Grib2Builder]) -> Vec<u8> {
        let first = &fields[0];
        let mut body = first.build_section1();
        for field in fields {
            body.extend_from_slice(&field.build_section3());
            body.extend_from_slice(&field.build_section4());
            let (section5, section6, section7) = field.build_data_sections();
            body.extend_from_slice(&section5);
            body.extend_from_slice(&section6);
            body.extend_from_slice(&section7);
        }

        let message_length = 16 + body.len() as u64 + 4;
        let mut message = Vec::with_capacity(message_length as usize);

        // Section 0: Indicator
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(first.discipline);
        message.push(2);
        message.extend_from_slice(&first.declared_length.unwrap_or(message_length).to_be_bytes());

        message.extend_from_slice(&body);

        // Section 8: End
        message.extend_from_slice(b"7777");
        message
    }

    fn build_section1(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&21u32.to_be_bytes());
        section.push(1);

        section.extend_from_slice(&self.center.to_be_bytes());
        section.extend_from_slice(&0u16.to_be_bytes()); // Sub-center
        section.push(2); // Master table version
        section.push(1); // Local table version
        section.push(1); // Significance of reference time (start of forecast)

        section.extend_from_slice(&self.year.to_be_bytes());
        section.push(self.month);
        section.push(self.day);
        section.push(self.hour);
        section.push(self.minute);
        section.push(0); // Second

        section.push(0); // Production status (operational)
        section.push(1); // Type of data (forecast)
        section
    }

    fn build_section3(&self) -> Vec<u8> {
        let (nx, ny) = self.grid.dims();
        let (template, mut data) = match self.grid {
            Grib2Grid::LatLon {
                la1,
                lo1,
                la2,
                lo2,
                di,
                dj,
                ..
            } => {
                let mut t = self.earth_and_dims();
                t.extend_from_slice(&0u32.to_be_bytes()); // Basic angle
                t.extend_from_slice(&0xFFFF_FFFFu32.to_be_bytes()); // Subdivisions
                t.extend_from_slice(&sign_magnitude_32(la1));
                t.extend_from_slice(&sign_magnitude_32(lo1));
                t.push(48); // Resolution and component flags
                t.extend_from_slice(&sign_magnitude_32(la2));
                t.extend_from_slice(&sign_magnitude_32(lo2));
                t.extend_from_slice(&di.to_be_bytes());
                t.extend_from_slice(&dj.to_be_bytes());
                t.push(self.scanning_mode);
                (0u16, t)
            }
            Grib2Grid::Lambert {
                la1,
                lo1,
                lov,
                dx,
                dy,
                latin1,
                latin2,
                ..
            } => {
                let mut t = self.earth_and_dims();
                t.extend_from_slice(&sign_magnitude_32(la1));
                t.extend_from_slice(&sign_magnitude_32(lo1));
                t.push(8); // Resolution and component flags
                t.extend_from_slice(&sign_magnitude_32(latin1)); // LaD
                t.extend_from_slice(&sign_magnitude_32(lov));
                t.extend_from_slice(&dx.to_be_bytes());
                t.extend_from_slice(&dy.to_be_bytes());
                t.push(0); // Projection centre flag
                t.push(self.scanning_mode);
                t.extend_from_slice(&sign_magnitude_32(latin1));
                t.extend_from_slice(&sign_magnitude_32(latin2));
                t.extend_from_slice(&sign_magnitude_32(-90_000_000)); // Southern pole lat
                t.extend_from_slice(&0u32.to_be_bytes()); // Southern pole lon
                (30u16, t)
            }
        };

        let mut section = Vec::new();
        section.extend_from_slice(&(14 + data.len() as u32).to_be_bytes());
        section.push(3);
        section.push(0); // Source of grid definition
        section.extend_from_slice(&(nx * ny).to_be_bytes());
        section.push(0); // Number of octets for optional list
        section.push(0); // Interpretation of optional list
        section.extend_from_slice(&template.to_be_bytes());
        section.append(&mut data);
        section
    }

    fn earth_and_dims(&self) -> Vec<u8> {
        let (nx, ny) = self.grid.dims();
        let mut t = Vec::new();
        t.push(self.earth_shape);
        t.push(0); // Scale factor of radius
        t.extend_from_slice(&0u32.to_be_bytes());
        t.push(0); // Scale factor of major axis
        t.extend_from_slice(&0u32.to_be_bytes());
        t.push(0); // Scale factor of minor axis
        t.extend_from_slice(&0u32.to_be_bytes());
        t.extend_from_slice(&nx.to_be_bytes());
        t.extend_from_slice(&ny.to_be_bytes());
        t
    }

    fn product_template(&self) -> u16 {
        match (self.ensemble.is_some(), self.derived.is_some(), self.statistic.is_some()) {
            (true, _, true) => 11,
            (_, true, true) => 12,
            (_, _, true) => 8,
            (true, _, false) => 1,
            (_, true, false) => 2,
            _ => 0,
        }
    }

    fn build_section4(&self) -> Vec<u8> {
        let mut section = Vec::new();
        section.extend_from_slice(&0u32.to_be_bytes()); // Length, patched below
        section.push(4);

        section.extend_from_slice(&0u16.to_be_bytes()); // Number of coordinate values
        section.extend_from_slice(&self.product_template().to_be_bytes());

        section.push(self.param_category);
        section.push(self.param_number);
        section.push(self.generating_process);
        section.push(0); // Background generating process
        section.push(0); // Analysis or forecast process
        section.extend_from_slice(&0u16.to_be_bytes()); // Hours of cutoff
        section.push(0); // Minutes of cutoff
        section.push(self.time_unit);
        section.extend_from_slice(&sign_magnitude_32(self.forecast_time));

        section.push(self.level_type);
        section.push(sign_magnitude_8(self.level_scale));
        section.extend_from_slice(&self.level_value.to_be_bytes());

        match self.second_level {
            Some((level_type, value)) => {
                section.push(level_type);
                section.push(sign_magnitude_8(self.level_scale));
                section.extend_from_slice(&value.to_be_bytes());
            }
            None => {
                section.push(255);
                section.push(0);
                section.extend_from_slice(&0u32.to_be_bytes());
            }
        }

        if let Some((kind, number, size)) = self.ensemble {
            section.extend_from_slice(&[kind, number, size]);
        } else if let Some(derived) = self.derived {
            section.extend_from_slice(&[derived, 10]);
        }

        if let Some((process, end)) = self.statistic {
            let end_time = self.reference_time() + self.unit_duration(end as i64);
            section.extend_from_slice(&(end_time.year() as u16).to_be_bytes());
            section.push(end_time.month() as u8);
            section.push(end_time.day() as u8);
            section.push(end_time.hour() as u8);
            section.push(end_time.minute() as u8);
            section.push(end_time.second() as u8);
            section.push(1); // Number of time range specifications
            section.extend_from_slice(&0u32.to_be_bytes()); // Missing values
            section.push(process);
            section.push(2); // Successive times, same reference time
            section.push(self.time_unit);
            section.extend_from_slice(&((end - self.forecast_time) as u32).to_be_bytes());
            section.push(self.time_unit);
            section.extend_from_slice(&0u32.to_be_bytes()); // Increment
        }

        let len = section.len() as u32;
        section[0..4].copy_from_slice(&len.to_be_bytes());
        section
    }

    fn reference_time(&self) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .and_then(|d| d.and_hms_opt(self.hour as u32, self.minute as u32, 0))
            .expect("valid reference time")
    }

    fn unit_duration(&self, count: i64) -> Duration {
        match self.time_unit {
            0 => Duration::minutes(count),
            2 => Duration::days(count),
            10 => Duration::hours(3 * count),
            11 => Duration::hours(6 * count),
            12 => Duration::hours(12 * count),
            13 => Duration::seconds(count),
            _ => Duration::hours(count),
        }
    }

    fn build_data_sections(&self) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let packing = pack_values(&self.data_values, self.decimal_scale, self.bits_per_value, |v| v);

        let mut section5 = Vec::new();
        section5.extend_from_slice(&21u32.to_be_bytes());
        section5.push(5);
        section5.extend_from_slice(&(packing.present as u32).to_be_bytes());
        section5.extend_from_slice(&0u16.to_be_bytes()); // Template 5.0
        section5.extend_from_slice(&packing.reference.to_be_bytes());
        section5.extend_from_slice(&sign_magnitude_16(packing.binary_scale));
        section5.extend_from_slice(&sign_magnitude_16(self.decimal_scale));
        section5.push(packing.bits_per_value);
        section5.push(0); // Original field type (floating point)

        let mut section6 = Vec::new();
        if self.reuse_bitmap {
            section6.extend_from_slice(&6u32.to_be_bytes());
            section6.push(6);
            section6.push(254);
        } else if let Some(bitmap) = &packing.bitmap {
            section6.extend_from_slice(&(6 + bitmap.len() as u32).to_be_bytes());
            section6.push(6);
            section6.push(0);
            section6.extend_from_slice(bitmap);
        } else {
            section6.extend_from_slice(&6u32.to_be_bytes());
            section6.push(6);
            section6.push(255); // No bitmap
        }

        let mut section7 = Vec::new();
        section7.extend_from_slice(&(5 + packing.data.len() as u32).to_be_bytes());
        section7.push(7);
        section7.extend_from_slice(&packing.data);

        (section5, section6, section7)
    }
}

/// Build a GRIB1 message with a lat/lon GDS and simple packing.
#[derive(Debug, Clone)]
pub struct Grib1Builder {
    table_version: u8,
    center: u8,
    subcenter: u8,
    process: u8,
    grid_id: u8,
    parameter: u8,
    level_type: u8,
    level: [u8; 2],
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    time_unit: u8,
    p1: u8,
    p2: u8,
    time_range_indicator: u8,
    decimal_scale: i16,
    include_gds: bool,
    // Grid, angles in millidegrees
    ni: u16,
    nj: u16,
    la1: i32,
    lo1: i32,
    la2: i32,
    lo2: i32,
    di: u16,
    dj: u16,
    scanning_mode: u8,
    resolution_flags: u8,
    bits_per_value: u8,
    data_values: Vec<f32>,
    declared_length: Option<u32>,
}

impl Grib1Builder {
    /// NCEP-style 2 m temperature on a 4x3 one-degree grid.
    pub fn new() -> Self {
        Self {
            table_version: 2,
            center: 7,
            subcenter: 0,
            process: 96,
            grid_id: 255,
            parameter: 11,
            level_type: 105,
            level: [0, 2],
            year: 2024,
            month: 1,
            day: 15,
            hour: 12,
            time_unit: 1,
            p1: 0,
            p2: 0,
            time_range_indicator: 0,
            decimal_scale: 0,
            include_gds: true,
            ni: 4,
            nj: 3,
            la1: 45_000,
            lo1: -100_000,
            la2: 43_000,
            lo2: -97_000,
            di: 1_000,
            dj: 1_000,
            scanning_mode: 0,
            resolution_flags: 0x80,
            bits_per_value: 16,
            data_values: vec![273.15; 12],
            declared_length: None,
        }
    }

    pub fn with_center(mut self, center: u8, subcenter: u8, table_version: u8) -> Self {
        self.center = center;
        self.subcenter = subcenter;
        self.table_version = table_version;
        self
    }

    pub fn with_parameter(mut self, parameter: u8) -> Self {
        self.parameter = parameter;
        self
    }

    /// Level with a single 16-bit value.
    pub fn with_level(mut self, level_type: u8, value: u16) -> Self {
        self.level_type = level_type;
        self.level = value.to_be_bytes();
        self
    }

    /// Layer with two 8-bit values.
    pub fn with_layer(mut self, level_type: u8, top: u8, bottom: u8) -> Self {
        self.level_type = level_type;
        self.level = [top, bottom];
        self
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.year = year;
        self.month = month;
        self.day = day;
        self.hour = hour;
        self
    }

    /// Time unit, P1, P2 and time range indicator.
    pub fn with_time(mut self, unit: u8, p1: u8, p2: u8, indicator: u8) -> Self {
        self.time_unit = unit;
        self.p1 = p1;
        self.p2 = p2;
        self.time_range_indicator = indicator;
        self
    }

    pub fn with_grid(mut self, ni: u16, nj: u16) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.la2 = self.la1 - (nj as i32 - 1) * self.dj as i32;
        self.lo2 = self.lo1 + (ni as i32 - 1) * self.di as i32;
        self.data_values = vec![0.0; ni as usize * nj as usize];
        self
    }

    pub fn with_scanning_mode(mut self, scanning_mode: u8) -> Self {
        self.scanning_mode = scanning_mode;
        self
    }

    /// Omit the GDS and reference catalogued grid `grid_id` instead.
    pub fn without_gds(mut self, grid_id: u8) -> Self {
        self.include_gds = false;
        self.grid_id = grid_id;
        self
    }

    pub fn with_decimal_scale(mut self, decimal_scale: i16) -> Self {
        self.decimal_scale = decimal_scale;
        self
    }

    pub fn with_data(mut self, data: Vec<f32>) -> Self {
        self.data_values = data;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.data_values = vec![value; self.ni as usize * self.nj as usize];
        self
    }

    pub fn with_declared_length(mut self, length: u32) -> Self {
        self.declared_length = Some(length);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let packing = pack_values(&self.data_values, self.decimal_scale, self.bits_per_value, |r| {
            ibm_to_f64(f32_to_ibm(r)) as f32
        });

        let mut body = self.build_pds(packing.bitmap.is_some());
        if self.include_gds {
            body.extend_from_slice(&self.build_gds());
        }
        if let Some(bitmap) = &packing.bitmap {
            let len = 6 + bitmap.len();
            let unused = (bitmap.len() * 8 - self.data_values.len()) as u8;
            body.extend_from_slice(&u24(len as u32));
            body.push(unused);
            body.extend_from_slice(&0u16.to_be_bytes());
            body.extend_from_slice(bitmap);
        }

        let bds_len = 11 + packing.data.len();
        let bits_used = packing.present * packing.bits_per_value as usize;
        let unused = ((8 - bits_used % 8) % 8) as u8;
        body.extend_from_slice(&u24(bds_len as u32));
        body.push(unused);
        body.extend_from_slice(&sign_magnitude_16(packing.binary_scale));
        body.extend_from_slice(&f32_to_ibm(packing.reference));
        body.push(packing.bits_per_value);
        body.extend_from_slice(&packing.data);

        let total = 8 + body.len() as u32 + 4;
        let mut message = Vec::with_capacity(total as usize);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&u24(self.declared_length.unwrap_or(total)));
        message.push(1);
        message.extend_from_slice(&body);
        message.extend_from_slice(b"7777");
        message
    }

    fn build_pds(&self, has_bitmap: bool) -> Vec<u8> {
        let century = (self.year - 1) / 100 + 1;
        let year_of_century = self.year - (century - 1) * 100;
        let mut flags = 0u8;
        if self.include_gds {
            flags |= 0x80;
        }
        if has_bitmap {
            flags |= 0x40;
        }

        let mut pds = Vec::with_capacity(28);
        pds.extend_from_slice(&u24(28));
        pds.push(self.table_version);
        pds.push(self.center);
        pds.push(self.process);
        pds.push(self.grid_id);
        pds.push(flags);
        pds.push(self.parameter);
        pds.push(self.level_type);
        pds.extend_from_slice(&self.level);
        pds.push(year_of_century as u8);
        pds.push(self.month);
        pds.push(self.day);
        pds.push(self.hour);
        pds.push(0); // Minute
        pds.push(self.time_unit);
        pds.push(self.p1);
        pds.push(self.p2);
        pds.push(self.time_range_indicator);
        pds.extend_from_slice(&0u16.to_be_bytes()); // Number in average
        pds.push(0); // Number missing
        pds.push(century as u8);
        pds.push(self.subcenter);
        pds.extend_from_slice(&sign_magnitude_16(self.decimal_scale));
        pds
    }

    fn build_gds(&self) -> Vec<u8> {
        let mut gds = Vec::with_capacity(32);
        gds.extend_from_slice(&u24(32));
        gds.push(0); // NV
        gds.push(255); // PV/PL
        gds.push(0); // Lat/lon grid
        gds.extend_from_slice(&self.ni.to_be_bytes());
        gds.extend_from_slice(&self.nj.to_be_bytes());
        gds.extend_from_slice(&sign_magnitude_24(self.la1));
        gds.extend_from_slice(&sign_magnitude_24(self.lo1));
        gds.push(self.resolution_flags);
        gds.extend_from_slice(&sign_magnitude_24(self.la2));
        gds.extend_from_slice(&sign_magnitude_24(self.lo2));
        gds.extend_from_slice(&self.di.to_be_bytes());
        gds.extend_from_slice(&self.dj.to_be_bytes());
        gds.push(self.scanning_mode);
        gds.extend_from_slice(&[0; 4]);
        gds
    }
}

impl Default for Grib1Builder {
    fn default() -> Self {
        Self::new()
    }
}

struct Packing {
    reference: f32,
    binary_scale: i16,
    bits_per_value: u8,
    present: usize,
    bitmap: Option<Vec<u8>>,
    data: Vec<u8>,
}

/// Simple packing shared by both editions. `round_reference` maps the
/// reference value to what the decoder will read back.
fn pack_values(
    values: &[f32],
    decimal_scale: i16,
    bits: u8,
    round_reference: impl Fn(f32) -> f32,
) -> Packing {
    let factor = 10f64.powi(decimal_scale as i32);
    let present: Vec<f64> = values
        .iter()
        .filter(|v| !v.is_nan())
        .map(|&v| v as f64 * factor)
        .collect();
    let bitmap = if present.len() < values.len() {
        let mut bm = vec![0u8; values.len().div_ceil(8)];
        for (i, v) in values.iter().enumerate() {
            if !v.is_nan() {
                bm[i / 8] |= 0x80 >> (i % 8);
            }
        }
        Some(bm)
    } else {
        None
    };

    let min = present.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = present.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = if min.is_finite() { min } else { 0.0 };
    let reference = round_reference(min as f32);
    let range = max - reference as f64;

    if present.is_empty() || range <= 0.0 || bits == 0 {
        return Packing {
            reference,
            binary_scale: 0,
            bits_per_value: 0,
            present: present.len(),
            bitmap,
            data: Vec::new(),
        };
    }

    let max_packed = ((1u64 << bits) - 1) as f64;
    let binary_scale = (range / max_packed).log2().ceil() as i16;
    let scale = 2f64.powi(binary_scale as i32);
    let packed: Vec<u32> = present
        .iter()
        .map(|v| (((v - reference as f64) / scale).round().max(0.0) as u64).min(max_packed as u64) as u32)
        .collect();

    Packing {
        reference,
        binary_scale,
        bits_per_value: bits,
        present: present.len(),
        bitmap,
        data: pack_bits(&packed, bits),
    }
}

fn pack_bits(values: &[u32], bits: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * bits as usize / 8 + 1);
    let mask = (1u64 << bits) - 1;
    let mut acc: u64 = 0;
    let mut pending = 0u32;
    for &v in values {
        acc = (acc << bits) | (v as u64 & mask);
        pending += bits as u32;
        while pending >= 8 {
            pending -= 8;
            out.push((acc >> pending) as u8);
        }
        acc &= (1u64 << pending) - 1;
    }
    if pending > 0 {
        out.push((acc << (8 - pending)) as u8);
    }
    out
}

fn u24(v: u32) -> [u8; 3] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

fn sign_magnitude_8(v: i8) -> u8 {
    if v < 0 {
        0x80 | v.unsigned_abs()
    } else {
        v as u8
    }
}

fn sign_magnitude_16(v: i16) -> [u8; 2] {
    let raw = if v < 0 { 0x8000 | v.unsigned_abs() } else { v as u16 };
    raw.to_be_bytes()
}

fn sign_magnitude_24(v: i32) -> [u8; 3] {
    let raw = if v < 0 { 0x80_0000 | v.unsigned_abs() } else { v as u32 };
    u24(raw)
}

/// Sign-magnitude 32-bit encoding used by GRIB2 for signed quantities.
fn sign_magnitude_32(v: i32) -> [u8; 4] {
    let raw = if v < 0 { 0x8000_0000 | v.unsigned_abs() } else { v as u32 };
    raw.to_be_bytes()
}

/// Encode an IBM System/360 single precision float, truncating the mantissa.
fn f32_to_ibm(value: f32) -> [u8; 4] {
    if value == 0.0 || !value.is_finite() {
        return [0; 4];
    }
    let sign = if value < 0.0 { 0x80u8 } else { 0 };
    let mut mantissa = (value as f64).abs();
    let mut exponent: i32 = 64;
    while mantissa >= 1.0 {
        mantissa /= 16.0;
        exponent += 1;
    }
    while mantissa < 1.0 / 16.0 {
        mantissa *= 16.0;
        exponent -= 1;
    }
    let bits = ((mantissa * 16_777_216.0) as u32).min(0xFF_FFFF);
    [
        sign | exponent as u8,
        (bits >> 16) as u8,
        (bits >> 8) as u8,
        bits as u8,
    ]
}

fn ibm_to_f64(bytes: [u8; 4]) -> f64 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;
    let mantissa = ((bytes[1] as u32) << 16 | (bytes[2] as u32) << 8 | bytes[3] as u32) as f64;
    sign * mantissa / 16_777_216.0 * 16f64.powi(exponent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_gfs_message() {
        let data = Grib2Builder::new_gfs().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 2);
        assert_eq!(data[6], 0);
        assert_eq!(&data[data.len() - 4..], b"7777");
        let declared = u64::from_be_bytes(data[8..16].try_into().unwrap());
        assert_eq!(declared as usize, data.len());
    }

    #[test]
    fn test_build_grib1_message() {
        let data = Grib1Builder::new().build();

        assert_eq!(&data[0..4], b"GRIB");
        assert_eq!(data[7], 1);
        let declared = (data[4] as usize) << 16 | (data[5] as usize) << 8 | data[6] as usize;
        assert_eq!(declared, data.len());
        assert_eq!(&data[data.len() - 4..], b"7777");
    }

    #[test]
    fn test_ibm_round_trip_is_close() {
        for v in [1.0f32, 273.15, -12.5, 0.001] {
            let back = ibm_to_f64(f32_to_ibm(v));
            assert!((back - v as f64).abs() < 1e-5 * v.abs() as f64);
        }
        assert_eq!(f32_to_ibm(1.0), [0x41, 0x10, 0x00, 0x00]);
    }

    #[test]
    fn test_pack_bits_12() {
        let packed = pack_bits(&[0xABC, 0x123], 12);
        assert_eq!(packed, vec![0xAB, 0xC1, 0x23]);
    }

    #[test]
    fn test_nan_values_produce_bitmap() {
        let packing = pack_values(&[1.0, f32::NAN, 3.0], 0, 8, |r| r);
        assert_eq!(packing.present, 2);
        assert_eq!(packing.bitmap, Some(vec![0b1010_0000]));
    }
}
