//! Payload decoding for scanned records.
//!
//! Simple packing (GRIB1 grid-point data and GRIB2 template 5.0) is decoded
//! here; every other GRIB2 packing is delegated to the `grib` crate. Decoded
//! values are normalized to row-major order with x increasing eastward, and
//! rows flipped south to north according to the [`ScanModePolicy`].

use std::io::Cursor;

use crate::error::{GribError, Result};
use crate::grid::GridDefinition;
use crate::options::ScanModePolicy;
use crate::sections::{grib1, grib2};

/// Decoded values of one record, missing points as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    /// Row-major values, `ny` rows of `nx` points.
    pub values: Vec<f32>,
    pub nx: usize,
    pub ny: usize,
}

impl DecodedField {
    pub fn get(&self, y: usize, x: usize) -> Option<f32> {
        if y < self.ny && x < self.nx {
            Some(self.values[y * self.nx + x])
        } else {
            None
        }
    }
}

/// Unpack simple packed data.
///
/// Simple packing formula: value = (reference_value + (packed_value * 2^binary_scale)) * 10^(-decimal_scale)
///
/// Points cleared in `bitmap` are NaN and consume no packed bits. With zero
/// bits per value every present point equals the reference value.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: usize,
    bits_per_value: u8,
    reference_value: f32,
    binary_scale_factor: i16,
    decimal_scale_factor: i16,
    bitmap: Option<&[u8]>,
) -> Result<Vec<f32>> {
    let binary_scale = 2.0_f64.powi(binary_scale_factor as i32);
    let decimal_scale = 10.0_f64.powi(-(decimal_scale_factor as i32));
    let reference = reference_value as f64;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0;
    let bits_per_value = bits_per_value as usize;

    for i in 0..num_points {
        // Bitmap: 1 bit per data point, 1 = value present, 0 = missing
        let has_value = match bitmap {
            Some(bm) => {
                let byte_idx = i / 8;
                let bit_idx = 7 - (i % 8);
                byte_idx < bm.len() && (bm[byte_idx] >> bit_idx) & 1 == 1
            }
            None => true,
        };

        if !has_value {
            values.push(f32::NAN);
            continue;
        }

        if bits_per_value == 0 {
            values.push((reference * decimal_scale) as f32);
            continue;
        }

        let packed_value = extract_bits(packed_data, bit_position, bits_per_value)
            .map_err(|e| GribError::unpacking(format!("Failed to extract bits: {}", e)))?;
        bit_position += bits_per_value;

        let value = (reference + packed_value as f64 * binary_scale) * decimal_scale;
        values.push(value as f32);
    }

    Ok(values)
}

/// Extract bits from a byte array
/// Returns the bits as a 32-bit unsigned integer
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> std::result::Result<u32, String> {
    if num_bits > 32 || num_bits == 0 {
        return Err(format!("Invalid number of bits: {}", num_bits));
    }

    let mut result = 0u32;

    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let byte_idx = absolute_bit / 8;
        let bit_idx = 7 - (absolute_bit % 8); // MSB first

        if byte_idx >= data.len() {
            return Err("Not enough data to extract bits".to_string());
        }

        let bit = (data[byte_idx] >> bit_idx) & 1;
        result = (result << 1) | (bit as u32);
    }

    Ok(result)
}

/// Decode field `field` of a complete GRIB message held in memory.
pub fn decode_message(message: &[u8], field: u16, policy: &ScanModePolicy) -> Result<DecodedField> {
    if message.len() < 8 || &message[0..4] != b"GRIB" {
        return Err(GribError::InvalidFormat("Missing GRIB marker".to_string()));
    }
    match message[7] {
        1 => decode_grib1(message, policy),
        2 => decode_grib2(message, field, policy),
        other => Err(GribError::UnsupportedEdition(other)),
    }
}

fn decode_grib1(message: &[u8], policy: &ScanModePolicy) -> Result<DecodedField> {
    let sections = grib1::split_message(message)?;
    let pds = grib1::parse_pds(sections.pds)?;
    let grid = match sections.gds {
        Some(gds) => grib1::parse_gds(gds)?,
        None => GridDefinition::predefined(pds.grid_id),
    };
    let bds = grib1::parse_bds_header(sections.bds)?;
    if bds.flags & 0x8 != 0 {
        return Err(GribError::UnsupportedTemplate {
            what: "GRIB1 spherical harmonic packing",
            value: bds.flags as u32,
        });
    }
    if bds.flags & 0x4 != 0 {
        return Err(GribError::UnsupportedTemplate {
            what: "GRIB1 complex packing",
            value: bds.flags as u32,
        });
    }

    let bitmap = match sections.bms {
        Some(bms) => {
            if bms.len() < 6 {
                return Err(GribError::section(3, "BMS too short"));
            }
            let table_ref = u16::from_be_bytes([bms[4], bms[5]]);
            if table_ref != 0 {
                return Err(GribError::UnsupportedTemplate {
                    what: "GRIB1 predefined bitmap",
                    value: table_ref as u32,
                });
            }
            Some(&bms[6..])
        }
        None => None,
    };

    let packed = &sections.bds[11..];
    let num_points = if grid.num_points() > 0 {
        grid.num_points()
    } else if bds.bits_per_value > 0 {
        (packed.len() * 8).saturating_sub(bds.unused_bits as usize) / bds.bits_per_value as usize
    } else {
        0
    };

    let values = unpack_simple(
        packed,
        num_points,
        bds.bits_per_value,
        bds.reference_value,
        bds.binary_scale_factor,
        pds.decimal_scale_factor,
        bitmap,
    )?;
    normalize(values, &grid, policy)
}

fn decode_grib2(message: &[u8], field: u16, policy: &ScanModePolicy) -> Result<DecodedField> {
    let fields = grib2::split_fields(message)?;
    let sections = fields.get(field as usize).ok_or_else(|| {
        GribError::InvalidFormat(format!(
            "field {} requested, message has {}",
            field,
            fields.len()
        ))
    })?;
    let grid = grib2::parse_grid_definition(sections.grid)?;
    let drs = grib2::parse_data_representation(sections.data_representation)?;

    let values = match drs.template {
        0 => {
            let bitmap = sections.bitmap.map(|bm| &bm[6..]);
            let num_points = if grid.num_points() > 0 {
                grid.num_points()
            } else {
                drs.num_data_points as usize
            };
            unpack_simple(
                sections.data,
                num_points,
                drs.bits_per_value,
                drs.reference_value,
                drs.binary_scale_factor,
                drs.decimal_scale_factor,
                bitmap,
            )?
        }
        _ => decode_with_grib_crate(message, field)?,
    };
    normalize(values, &grid, policy)
}

/// Delegate packings we do not implement (complex, JPEG2000, PNG, ...) to
/// the `grib` crate.
fn decode_with_grib_crate(message: &[u8], field: u16) -> Result<Vec<f32>> {
    let grib2 = grib::from_reader(Cursor::new(message))
        .map_err(|e| GribError::unpacking(format!("grib crate failed to parse message: {}", e)))?;
    let (_, submessage) = grib2
        .iter()
        .nth(field as usize)
        .ok_or_else(|| GribError::unpacking(format!("grib crate found no field {}", field)))?;
    let decoder = grib::Grib2SubmessageDecoder::from(submessage)
        .map_err(|e| GribError::unpacking(format!("grib crate decoder: {}", e)))?;
    let values = decoder
        .dispatch()
        .map_err(|e| GribError::unpacking(format!("grib crate decode: {}", e)))?;
    Ok(values.collect())
}

/// Reorder values from scanning order to row-major, west to east, with rows
/// flipped south to north when the policy asks for it.
fn normalize(values: Vec<f32>, grid: &GridDefinition, policy: &ScanModePolicy) -> Result<DecodedField> {
    let (nx, ny) = (grid.nx as usize, grid.ny as usize);
    if nx == 0 || ny == 0 {
        let n = values.len();
        return Ok(DecodedField {
            values,
            nx: n,
            ny: 1,
        });
    }
    if values.len() != nx * ny {
        return Err(GribError::unpacking(format!(
            "decoded {} values for a {}x{} grid",
            values.len(),
            nx,
            ny
        )));
    }

    let scan = grid.scan_mode;
    let j_consecutive = scan & 0x20 != 0;
    // Length of a scanned row and the number of rows in scanning order.
    let (run, runs) = if j_consecutive { (ny, nx) } else { (nx, ny) };

    let mut scanned = values;
    if scan & 0x10 != 0 {
        for r in (1..runs).step_by(2) {
            scanned[r * run..(r + 1) * run].reverse();
        }
    }

    let mut out = vec![f32::NAN; nx * ny];
    for r in 0..runs {
        for k in 0..run {
            let (x, y) = if j_consecutive { (r, k) } else { (k, r) };
            out[y * nx + x] = scanned[r * run + k];
        }
    }

    if scan & 0x80 != 0 {
        for row in out.chunks_mut(nx) {
            row.reverse();
        }
    }
    if policy.flip_rows(grid) {
        let mut flipped = Vec::with_capacity(out.len());
        for row in out.chunks(nx).rev() {
            flipped.extend_from_slice(row);
        }
        out = flipped;
    }

    Ok(DecodedField { values: out, nx, ny })
}
