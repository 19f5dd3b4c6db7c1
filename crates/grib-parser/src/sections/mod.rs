//! Section-level parsing for both GRIB editions.
//!
//! Parsers here operate on byte slices holding exactly one section (section
//! header included), so the scanner can feed them sections read
//! incrementally from a file while the decoder feeds them slices of an
//! in-memory message.

pub mod grib1;
pub mod grib2;

/// Decode a 4-byte GRIB2 sign-magnitude integer.
///
/// GRIB2 stores negative numbers with the most significant bit as a sign
/// flag rather than in two's complement. Anything other than 4 bytes
/// decodes to 0.
pub fn decode_grib2_signed(bytes: &[u8]) -> i32 {
    if bytes.len() != 4 {
        return 0;
    }
    let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a 2-byte sign-magnitude integer (scale factors in both editions).
pub fn sign_magnitude_i16(bytes: [u8; 2]) -> i16 {
    let raw = u16::from_be_bytes(bytes);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Decode a 1-byte sign-magnitude integer.
pub fn sign_magnitude_i8(byte: u8) -> i8 {
    let magnitude = (byte & 0x7F) as i8;
    if byte & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Read an unsigned 24-bit big-endian integer.
pub fn read_u24(bytes: &[u8]) -> u32 {
    (bytes[0] as u32) << 16 | (bytes[1] as u32) << 8 | bytes[2] as u32
}

/// Read a GRIB1 24-bit sign-magnitude integer.
pub fn read_i24(bytes: &[u8]) -> i32 {
    let raw = read_u24(bytes);
    let magnitude = (raw & 0x7F_FFFF) as i32;
    if raw & 0x80_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Convert an IBM System/360 single precision float (GRIB1 reference values).
pub fn ibm_to_f32(bytes: [u8; 4]) -> f32 {
    let sign = if bytes[0] & 0x80 != 0 { -1.0 } else { 1.0 };
    let exponent = (bytes[0] & 0x7F) as i32 - 64;
    let mantissa = ((bytes[1] as u32) << 16 | (bytes[2] as u32) << 8 | bytes[3] as u32) as f64;
    (sign * mantissa / 16_777_216.0 * 16f64.powi(exponent)) as f32
}

/// Apply a GRIB2 scale factor to a scaled value; all-ones means missing.
pub fn scaled_value(scale_factor: u8, value: u32) -> Option<f64> {
    if value == u32::MAX {
        return None;
    }
    let scale = if scale_factor == u8::MAX {
        0
    } else {
        sign_magnitude_i8(scale_factor) as i32
    };
    if scale >= 0 {
        Some(value as f64 / 10f64.powi(scale))
    } else {
        Some(value as f64 * 10f64.powi(-scale))
    }
}

/// Read a section length and number from a 5-byte GRIB2 section header.
pub(crate) fn grib2_section_header(bytes: &[u8]) -> (u32, u8) {
    (
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        bytes[4],
    )
}
