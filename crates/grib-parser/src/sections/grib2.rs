//! GRIB2 section parsing.
//!
//! Each GRIB2 message consists of an indicator (section 0), an
//! identification section (1), optional local use (2) and one or more
//! repetitions of grid (3), product (4), data representation (5), bitmap (6)
//! and data (7) sections, terminated by `7777`.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{decode_grib2_signed, grib2_section_header, scaled_value, sign_magnitude_i16};
use crate::error::{GribError, Result};
use crate::grid::{EarthShape, GridDefinition, Projection};
use crate::record::EnsembleInfo;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub table_version: u8,
    pub local_table_version: u8,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Statistical processing attached to product templates 4.8, 4.11 and 4.12.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalProcess {
    /// Code table 4.10 (0 average, 1 accumulation, 2 maximum, ...).
    pub process: u8,
    /// End of the overall time interval.
    pub end_time: DateTime<Utc>,
    pub length_unit: u8,
    pub length: u32,
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub generating_process: u8,
    pub time_unit: u8,
    pub forecast_time: i64,
    /// (type, value) of the first fixed surface.
    pub first_surface: Option<(u8, f64)>,
    /// (type, value) of the second fixed surface, present for layers.
    pub second_surface: Option<(u8, f64)>,
    pub ensemble: Option<EnsembleInfo>,
    pub derived_type: Option<u8>,
    pub statistic: Option<StatisticalProcess>,
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataRepresentation {
    pub num_data_points: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    pub original_data_type: u8,
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from the start of a message.
pub fn parse_indicator(data: &[u8]) -> Result<Indicator> {
    if data.len() < 16 {
        return Err(GribError::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(GribError::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octet 7: discipline, octet 8: edition, octets 9-16: total length
    let edition = data[7];
    if edition != 2 {
        return Err(GribError::UnsupportedEdition(edition));
    }

    let message_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline: data[6],
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification).
pub fn parse_identification(sec: &[u8]) -> Result<Identification> {
    if sec.len() < 21 {
        return Err(GribError::section(1, "Not enough data"));
    }

    // Skip section header (4 bytes length + 1 byte number)
    let sec_data = &sec[5..];

    let center = u16::from_be_bytes([sec_data[0], sec_data[1]]);
    let sub_center = u16::from_be_bytes([sec_data[2], sec_data[3]]);
    let table_version = sec_data[4];
    let local_table_version = sec_data[5];
    let significance_of_reference_time = sec_data[6];

    let year = u16::from_be_bytes([sec_data[7], sec_data[8]]);
    let reference_time = make_time(1, year, &sec_data[9..14])?;

    Ok(Identification {
        center,
        sub_center,
        table_version,
        local_table_version,
        significance_of_reference_time,
        reference_time,
        production_status: sec_data[14],
        data_type: sec_data[15],
    })
}

/// Build a UTC time from a year and the five following octets
/// (month, day, hour, minute, second).
fn make_time(section: u8, year: u16, mdhms: &[u8]) -> Result<DateTime<Utc>> {
    let (month, day, hour, minute, second) = (mdhms[0], mdhms[1], mdhms[2], mdhms[3], mdhms[4]);
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .ok_or_else(|| {
            GribError::section(
                section,
                format!(
                    "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ),
            )
        })
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Microdegrees (sign-magnitude) to degrees.
fn micro_degrees(b: &[u8]) -> f64 {
    decode_grib2_signed(&b[..4]) as f64 * 1e-6
}

/// Parse Section 3 (Grid Definition).
pub fn parse_grid_definition(sec: &[u8]) -> Result<GridDefinition> {
    if sec.len() < 14 {
        return Err(GribError::section(3, "Not enough data"));
    }

    // Bytes 12-13: grid definition template number, template data from 14
    let template = u16::from_be_bytes([sec[12], sec[13]]);
    let gd = &sec[14..];
    let hash = crc32fast::hash(&sec[5..]);

    if gd.len() < 24 {
        return Ok(GridDefinition {
            template,
            nx: 0,
            ny: 0,
            scan_mode: 0,
            earth: EarthShape::DEFAULT_SPHERE,
            projection: Projection::Other,
            hash,
        });
    }

    // Bytes 0-15 of every earth-based template: shape of the earth
    let radius = scaled_value(gd[1], be_u32(&gd[2..6]));
    let major = scaled_value(gd[6], be_u32(&gd[7..11]));
    let minor = scaled_value(gd[11], be_u32(&gd[12..16]));
    let earth = EarthShape::from_grib2(gd[0], radius, major, minor);
    let nx = be_u32(&gd[16..20]);
    let ny = be_u32(&gd[20..24]);

    let need = |len: usize| -> Result<()> {
        if gd.len() < len {
            Err(GribError::section(
                3,
                format!("Template {} needs at least {} bytes, got {}", template, len, gd.len()),
            ))
        } else {
            Ok(())
        }
    };

    let (scan_mode, projection) = match template {
        // Latitude/longitude (0) and Gaussian (40)
        0 | 40 => {
            need(58)?;
            let projection = if template == 0 {
                Projection::LatLon {
                    la1: micro_degrees(&gd[32..36]),
                    lo1: micro_degrees(&gd[36..40]),
                    la2: micro_degrees(&gd[41..45]),
                    lo2: micro_degrees(&gd[45..49]),
                    di: micro_degrees(&gd[49..53]),
                    dj: micro_degrees(&gd[53..57]),
                }
            } else {
                Projection::Other
            };
            (gd[57], projection)
        }
        // Mercator
        10 => {
            need(58)?;
            (
                gd[45],
                Projection::Mercator {
                    la1: micro_degrees(&gd[24..28]),
                    lo1: micro_degrees(&gd[28..32]),
                    lad: micro_degrees(&gd[33..37]),
                    la2: micro_degrees(&gd[37..41]),
                    lo2: micro_degrees(&gd[41..45]),
                    di: be_u32(&gd[50..54]) as f64 * 1e-3,
                    dj: be_u32(&gd[54..58]) as f64 * 1e-3,
                },
            )
        }
        // Polar stereographic
        20 => {
            need(51)?;
            (
                gd[50],
                Projection::PolarStereographic {
                    la1: micro_degrees(&gd[24..28]),
                    lo1: micro_degrees(&gd[28..32]),
                    lov: micro_degrees(&gd[37..41]),
                    dx: be_u32(&gd[41..45]) as f64 * 1e-3,
                    dy: be_u32(&gd[45..49]) as f64 * 1e-3,
                    south_pole: gd[49] & 0x80 != 0,
                },
            )
        }
        // Lambert conformal
        30 => {
            need(59)?;
            (
                gd[50],
                Projection::LambertConformal {
                    la1: micro_degrees(&gd[24..28]),
                    lo1: micro_degrees(&gd[28..32]),
                    lov: micro_degrees(&gd[37..41]),
                    dx: be_u32(&gd[41..45]) as f64 * 1e-3,
                    dy: be_u32(&gd[45..49]) as f64 * 1e-3,
                    latin1: micro_degrees(&gd[51..55]),
                    latin2: micro_degrees(&gd[55..59]),
                },
            )
        }
        _ => (0x40, Projection::Other),
    };

    Ok(GridDefinition {
        template,
        nx,
        ny,
        scan_mode,
        earth,
        projection,
        hash,
    })
}

/// Product templates whose first 34 octets follow the template 4.0 layout.
fn has_horizontal_prefix(template: u16) -> bool {
    template <= 15
}

/// Parse Section 4 (Product Definition).
pub fn parse_product_definition(sec: &[u8]) -> Result<ProductDefinition> {
    if sec.len() < 9 {
        return Err(GribError::section(4, "Not enough data"));
    }

    let template = u16::from_be_bytes([sec[7], sec[8]]);
    if !has_horizontal_prefix(template) {
        return Err(GribError::UnsupportedTemplate {
            what: "product definition template",
            value: template as u32,
        });
    }
    if sec.len() < 34 {
        return Err(GribError::section(
            4,
            format!("Template {} needs 34 bytes, got {}", template, sec.len()),
        ));
    }

    // Octet 18: time range unit, octets 19-22: forecast time
    let time_unit = sec[17];
    let forecast_time = decode_grib2_signed(&sec[18..22]) as i64;

    let surface = |type_idx: usize| -> Option<(u8, f64)> {
        let level_type = sec[type_idx];
        if level_type == 255 {
            return None;
        }
        let value = scaled_value(sec[type_idx + 1], be_u32(&sec[type_idx + 2..type_idx + 6]));
        Some((level_type, value.unwrap_or(0.0)))
    };
    let first_surface = surface(22);
    let second_surface = surface(28);

    let need = |len: usize| -> Result<()> {
        if sec.len() < len {
            Err(GribError::section(
                4,
                format!("Template {} needs {} bytes, got {}", template, len, sec.len()),
            ))
        } else {
            Ok(())
        }
    };

    let ensemble_at = |idx: usize| EnsembleInfo {
        kind: sec[idx],
        number: sec[idx + 1] as u16,
        size: sec[idx + 2] as u16,
    };

    let mut ensemble = None;
    let mut derived_type = None;
    let mut statistic = None;
    match template {
        1 => {
            need(37)?;
            ensemble = Some(ensemble_at(34));
        }
        2 => {
            need(36)?;
            derived_type = Some(sec[34]);
        }
        8 => {
            need(53)?;
            statistic = Some(parse_statistic(&sec[34..53])?);
        }
        11 => {
            need(56)?;
            ensemble = Some(ensemble_at(34));
            statistic = Some(parse_statistic(&sec[37..56])?);
        }
        12 => {
            need(55)?;
            derived_type = Some(sec[34]);
            statistic = Some(parse_statistic(&sec[36..55])?);
        }
        _ => {}
    }

    Ok(ProductDefinition {
        template,
        parameter_category: sec[9],
        parameter_number: sec[10],
        generating_process: sec[11],
        time_unit,
        forecast_time,
        first_surface,
        second_surface,
        ensemble,
        derived_type,
        statistic,
    })
}

/// Parse the statistical block starting at "end of overall time interval".
///
/// Layout: year(2) month day hour minute second, number of ranges (1),
/// missing count (4), then the first time range specification.
fn parse_statistic(b: &[u8]) -> Result<StatisticalProcess> {
    let year = u16::from_be_bytes([b[0], b[1]]);
    let end_time = make_time(4, year, &b[2..7])?;
    Ok(StatisticalProcess {
        process: b[12],
        end_time,
        length_unit: b[14],
        length: be_u32(&b[15..19]),
    })
}

/// Parse Section 5 (Data Representation).
pub fn parse_data_representation(sec: &[u8]) -> Result<DataRepresentation> {
    if sec.len() < 11 {
        return Err(GribError::section(5, "Not enough data"));
    }

    let num_data_points = be_u32(&sec[5..9]);
    let template = u16::from_be_bytes([sec[9], sec[10]]);

    // Templates 5.0, 5.2, 5.3, 5.40 and 5.41 share the simple packing prefix:
    // R (IEEE f32), E and D (sign-magnitude), bits per value, original type.
    let t = &sec[11..];
    if t.len() < 10 {
        return Ok(DataRepresentation {
            num_data_points,
            template,
            reference_value: 0.0,
            binary_scale_factor: 0,
            decimal_scale_factor: 0,
            bits_per_value: 0,
            original_data_type: 0,
        });
    }

    Ok(DataRepresentation {
        num_data_points,
        template,
        reference_value: f32::from_be_bytes([t[0], t[1], t[2], t[3]]),
        binary_scale_factor: sign_magnitude_i16([t[4], t[5]]),
        decimal_scale_factor: sign_magnitude_i16([t[6], t[7]]),
        bits_per_value: t[8],
        original_data_type: t[9],
    })
}

/// Sections of one field inside an in-memory GRIB2 message.
#[derive(Debug, Clone, Copy)]
pub struct FieldSections<'a> {
    pub identification: &'a [u8],
    pub grid: &'a [u8],
    pub product: &'a [u8],
    pub data_representation: &'a [u8],
    /// Bitmap section in effect for this field, if any (indicator 254 is
    /// resolved to the previously defined bitmap).
    pub bitmap: Option<&'a [u8]>,
    pub data: &'a [u8],
}

/// Split an in-memory GRIB2 message into its fields.
pub fn split_fields(message: &[u8]) -> Result<Vec<FieldSections<'_>>> {
    let indicator = parse_indicator(message)?;
    let end = (indicator.message_length as usize).min(message.len());

    let mut fields = Vec::new();
    let mut identification: Option<&[u8]> = None;
    let mut grid: Option<&[u8]> = None;
    let mut product: Option<&[u8]> = None;
    let mut drs: Option<&[u8]> = None;
    let mut bitmap: Option<&[u8]> = None;
    let mut previous_bitmap: Option<&[u8]> = None;

    let mut offset = 16;
    while offset + 4 <= end {
        if &message[offset..offset + 4] == b"7777" {
            break;
        }
        if offset + 5 > end {
            return Err(GribError::section(0, "Truncated section header"));
        }
        let (length, number) = grib2_section_header(&message[offset..offset + 5]);
        let length = length as usize;
        if length < 5 || offset + length > end {
            return Err(GribError::section(number, "Invalid section length"));
        }
        let sec = &message[offset..offset + length];
        match number {
            1 => identification = Some(sec),
            2 => {}
            3 => grid = Some(sec),
            4 => product = Some(sec),
            5 => drs = Some(sec),
            6 => {
                let indicator = sec.get(5).copied().unwrap_or(255);
                bitmap = match indicator {
                    0 => {
                        previous_bitmap = Some(sec);
                        Some(sec)
                    }
                    254 => previous_bitmap,
                    _ => None,
                };
            }
            7 => {
                let missing = |n: u8| GribError::section(n, "Section missing before data section");
                fields.push(FieldSections {
                    identification: identification.ok_or_else(|| missing(1))?,
                    grid: grid.ok_or_else(|| missing(3))?,
                    product: product.ok_or_else(|| missing(4))?,
                    data_representation: drs.ok_or_else(|| missing(5))?,
                    bitmap,
                    data: &sec[5..],
                });
            }
            other => {
                return Err(GribError::section(other, "Unknown section number"));
            }
        }
        offset += length;
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indicator_rejects_edition_1() {
        let mut data = b"GRIB".to_vec();
        data.extend_from_slice(&[0, 0, 28, 1]);
        data.extend_from_slice(&[0; 8]);
        assert!(matches!(
            parse_indicator(&data),
            Err(GribError::UnsupportedEdition(1))
        ));
    }

    #[test]
    fn test_product_template_4_8_interval() {
        let mut sec = vec![0u8; 58];
        sec[0..4].copy_from_slice(&58u32.to_be_bytes());
        sec[4] = 4;
        sec[7..9].copy_from_slice(&8u16.to_be_bytes());
        sec[9] = 1; // moisture
        sec[10] = 8; // total precipitation
        sec[11] = 2;
        sec[17] = 1; // hours
        sec[18..22].copy_from_slice(&3u32.to_be_bytes());
        sec[22] = 1; // surface
        sec[28] = 255;
        // end of overall interval 2024-01-01 15:00:00
        sec[34..36].copy_from_slice(&2024u16.to_be_bytes());
        sec[36] = 1;
        sec[37] = 1;
        sec[38] = 15;
        sec[41] = 1;
        sec[46] = 1; // accumulation
        sec[48] = 1;
        sec[49..53].copy_from_slice(&12u32.to_be_bytes());

        let pd = parse_product_definition(&sec).unwrap();
        assert_eq!(pd.forecast_time, 3);
        assert_eq!(pd.first_surface, Some((1, 0.0)));
        assert_eq!(pd.second_surface, None);
        let stat = pd.statistic.unwrap();
        assert_eq!(stat.process, 1);
        assert_eq!(stat.length, 12);
        assert_eq!(stat.end_time.to_rfc3339(), "2024-01-01T15:00:00+00:00");
    }

    #[test]
    fn test_unsupported_product_template() {
        let mut sec = vec![0u8; 34];
        sec[7..9].copy_from_slice(&40u16.to_be_bytes());
        assert!(matches!(
            parse_product_definition(&sec),
            Err(GribError::UnsupportedTemplate { value: 40, .. })
        ));
    }
}
