//! GRIB1 section parsing.
//!
//! A GRIB1 message is an 8-byte indicator followed by the product
//! definition section (PDS), an optional grid description section (GDS), an
//! optional bitmap section (BMS), the binary data section (BDS) and `7777`.
//! Every section starts with a 3-byte length.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{ibm_to_f32, read_i24, read_u24, sign_magnitude_i16};
use crate::error::{GribError, Result};
use crate::grid::{EarthShape, GridDefinition, Projection};

/// Length of the GRIB1 indicator section.
pub const INDICATOR_LEN: usize = 8;

/// Product definition section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib1Pds {
    pub table_version: u8,
    pub center: u8,
    pub subcenter: u8,
    pub process_id: u8,
    /// Catalogued grid number, used when no GDS is present.
    pub grid_id: u8,
    pub has_gds: bool,
    pub has_bms: bool,
    pub parameter: u8,
    pub level_type: u8,
    /// Octets 11-12, interpreted according to `level_type`.
    pub level: [u8; 2],
    pub reference_time: DateTime<Utc>,
    pub time_unit: u8,
    pub p1: u8,
    pub p2: u8,
    pub time_range_indicator: u8,
    pub decimal_scale_factor: i16,
}

/// Fixed header of the binary data section.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BdsHeader {
    /// Upper four bits of octet 4 (bit 1 set means spherical harmonics).
    pub flags: u8,
    /// Unused bits at the end of the section.
    pub unused_bits: u8,
    pub binary_scale_factor: i16,
    pub reference_value: f32,
    pub bits_per_value: u8,
}

/// Read a 3-byte section length.
pub fn section_length(bytes: &[u8]) -> usize {
    read_u24(bytes) as usize
}

/// Parse the product definition section.
pub fn parse_pds(sec: &[u8]) -> Result<Grib1Pds> {
    if sec.len() < 28 {
        return Err(GribError::section(1, format!("PDS too short: {} bytes", sec.len())));
    }

    let year_of_century = sec[12] as i32;
    let century = sec[24] as i32;
    let year = (century - 1) * 100 + year_of_century;
    let (month, day, hour, minute) = (sec[13], sec[14], sec[15], sec[16]);
    let reference_time = NaiveDate::from_ymd_opt(year, month as u32, day as u32)
        .and_then(|d| d.and_hms_opt(hour as u32, minute as u32, 0))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| {
            GribError::section(
                1,
                format!("Invalid date: {}-{:02}-{:02} {:02}:{:02}", year, month, day, hour, minute),
            )
        })?;

    Ok(Grib1Pds {
        table_version: sec[3],
        center: sec[4],
        process_id: sec[5],
        grid_id: sec[6],
        has_gds: sec[7] & 0x80 != 0,
        has_bms: sec[7] & 0x40 != 0,
        parameter: sec[8],
        level_type: sec[9],
        level: [sec[10], sec[11]],
        reference_time,
        time_unit: sec[17],
        p1: sec[18],
        p2: sec[19],
        time_range_indicator: sec[20],
        subcenter: sec[25],
        decimal_scale_factor: sign_magnitude_i16([sec[26], sec[27]]),
    })
}

fn millidegrees(b: &[u8]) -> f64 {
    read_i24(b) as f64 * 1e-3
}

/// Parse the grid description section.
pub fn parse_gds(sec: &[u8]) -> Result<GridDefinition> {
    if sec.len() < 28 {
        return Err(GribError::section(2, format!("GDS too short: {} bytes", sec.len())));
    }

    let data_type = sec[5];
    let nx = u16::from_be_bytes([sec[6], sec[7]]) as u32;
    let ny = u16::from_be_bytes([sec[8], sec[9]]) as u32;
    let resolution_flags = sec[16];
    let hash = crc32fast::hash(&sec[3..]);

    let projection = match data_type {
        0 => Projection::LatLon {
            la1: millidegrees(&sec[10..13]),
            lo1: millidegrees(&sec[13..16]),
            la2: millidegrees(&sec[17..20]),
            lo2: millidegrees(&sec[20..23]),
            di: u16::from_be_bytes([sec[23], sec[24]]) as f64 * 1e-3,
            dj: u16::from_be_bytes([sec[25], sec[26]]) as f64 * 1e-3,
        },
        1 if sec.len() >= 34 => Projection::Mercator {
            la1: millidegrees(&sec[10..13]),
            lo1: millidegrees(&sec[13..16]),
            la2: millidegrees(&sec[17..20]),
            lo2: millidegrees(&sec[20..23]),
            lad: millidegrees(&sec[23..26]),
            di: read_u24(&sec[28..31]) as f64,
            dj: read_u24(&sec[31..34]) as f64,
        },
        3 if sec.len() >= 34 => Projection::LambertConformal {
            la1: millidegrees(&sec[10..13]),
            lo1: millidegrees(&sec[13..16]),
            lov: millidegrees(&sec[17..20]),
            dx: read_u24(&sec[20..23]) as f64,
            dy: read_u24(&sec[23..26]) as f64,
            latin1: millidegrees(&sec[28..31]),
            latin2: millidegrees(&sec[31..34]),
        },
        5 => Projection::PolarStereographic {
            la1: millidegrees(&sec[10..13]),
            lo1: millidegrees(&sec[13..16]),
            lov: millidegrees(&sec[17..20]),
            dx: read_u24(&sec[20..23]) as f64,
            dy: read_u24(&sec[23..26]) as f64,
            south_pole: sec[26] & 0x80 != 0,
        },
        _ => Projection::Other,
    };

    Ok(GridDefinition {
        template: data_type as u16,
        nx,
        ny,
        scan_mode: sec[27],
        earth: EarthShape::from_grib1(resolution_flags),
        projection,
        hash,
    })
}

/// Parse the fixed 11-byte header of the binary data section.
pub fn parse_bds_header(sec: &[u8]) -> Result<BdsHeader> {
    if sec.len() < 11 {
        return Err(GribError::section(4, format!("BDS too short: {} bytes", sec.len())));
    }
    Ok(BdsHeader {
        flags: sec[3] >> 4,
        unused_bits: sec[3] & 0x0F,
        binary_scale_factor: sign_magnitude_i16([sec[4], sec[5]]),
        reference_value: ibm_to_f32([sec[6], sec[7], sec[8], sec[9]]),
        bits_per_value: sec[10],
    })
}

/// Sections of an in-memory GRIB1 message.
#[derive(Debug, Clone, Copy)]
pub struct MessageSections<'a> {
    pub pds: &'a [u8],
    pub gds: Option<&'a [u8]>,
    pub bms: Option<&'a [u8]>,
    pub bds: &'a [u8],
}

/// Split an in-memory GRIB1 message into its sections.
pub fn split_message(message: &[u8]) -> Result<MessageSections<'_>> {
    if message.len() < INDICATOR_LEN || &message[0..4] != b"GRIB" {
        return Err(GribError::InvalidFormat("Missing GRIB marker".to_string()));
    }
    if message[7] != 1 {
        return Err(GribError::UnsupportedEdition(message[7]));
    }

    let mut offset = INDICATOR_LEN;
    let mut take = |section: u8| -> Result<&[u8]> {
        if offset + 3 > message.len() {
            return Err(GribError::section(section, "Truncated section header"));
        }
        let len = section_length(&message[offset..]);
        if len < 3 || offset + len > message.len() {
            return Err(GribError::section(section, format!("Invalid section length {}", len)));
        }
        let sec = &message[offset..offset + len];
        offset += len;
        Ok(sec)
    };

    let pds_bytes = take(1)?;
    let pds = parse_pds(pds_bytes)?;
    let gds = if pds.has_gds { Some(take(2)?) } else { None };
    let bms = if pds.has_bms { Some(take(3)?) } else { None };
    let bds = take(4)?;

    Ok(MessageSections {
        pds: pds_bytes,
        gds,
        bms,
        bds,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pds_bytes() -> Vec<u8> {
        let mut pds = vec![0u8; 28];
        pds[0..3].copy_from_slice(&[0, 0, 28]);
        pds[3] = 2; // table version
        pds[4] = 7; // NCEP
        pds[6] = 255;
        pds[7] = 0x80;
        pds[8] = 61; // APCP
        pds[9] = 1; // surface
        pds[12] = 24;
        pds[13] = 3;
        pds[14] = 15;
        pds[15] = 12;
        pds[17] = 1; // hour
        pds[18] = 6;
        pds[19] = 12;
        pds[20] = 4; // accumulation
        pds[24] = 21;
        pds[26..28].copy_from_slice(&[0x80, 0x01]);
        pds
    }

    #[test]
    fn test_parse_pds() {
        let pds = parse_pds(&pds_bytes()).unwrap();
        assert_eq!(pds.center, 7);
        assert_eq!(pds.parameter, 61);
        assert!(pds.has_gds);
        assert!(!pds.has_bms);
        assert_eq!(pds.time_range_indicator, 4);
        assert_eq!(pds.decimal_scale_factor, -1);
        assert_eq!(pds.reference_time.to_rfc3339(), "2024-03-15T12:00:00+00:00");
    }

    #[test]
    fn test_year_2000_uses_year_of_century_100() {
        let mut bytes = pds_bytes();
        bytes[12] = 100;
        bytes[24] = 20;
        let pds = parse_pds(&bytes).unwrap();
        assert_eq!(pds.reference_time.to_rfc3339(), "2000-03-15T12:00:00+00:00");
    }

    #[test]
    fn test_parse_bds_header() {
        // R = 1.0 in IBM format is 0x41 0x10 0x00 0x00
        let sec = [0, 0, 11, 0x08, 0x80, 0x02, 0x41, 0x10, 0x00, 0x00, 12];
        let bds = parse_bds_header(&sec).unwrap();
        assert_eq!(bds.unused_bits, 8);
        assert_eq!(bds.binary_scale_factor, -2);
        assert_eq!(bds.reference_value, 1.0);
        assert_eq!(bds.bits_per_value, 12);
    }
}
