//! Explicit scanner and decoder options.
//!
//! These values are threaded into [`RecordScanner`](crate::RecordScanner)
//! and [`decode_message`](crate::decode_message) at construction time; there
//! is no process-wide switch.

use serde::{Deserialize, Serialize};

use crate::grid::GridDefinition;

/// Options controlling how tolerant the record scanner is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOptions {
    /// Accept messages whose declared length does not end on `7777`.
    ///
    /// When set, the scanner trusts the start of the next message (or the end
    /// of the stream) instead of failing with a format error.
    pub allow_bad_section_length: bool,

    /// Upper bound on a single message length; larger declared lengths are
    /// treated as malformed.
    pub max_message_len: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            allow_bad_section_length: false,
            max_message_len: 2 * 1024 * 1024 * 1024,
        }
    }
}

impl ScanOptions {
    /// Permissive options for known-bad encoders.
    pub fn permissive() -> Self {
        Self {
            allow_bad_section_length: true,
            ..Self::default()
        }
    }
}

/// Policy for the north/south flip implied by the scanning-mode flags.
///
/// Lat/lon grids scanned north to south are always flipped so that rows run
/// south to north. Projected grids are only flipped when
/// `flip_projected_ns` is set; the unflipped behaviour matches what the
/// coordinate system of those projections was observed to expect, and it is
/// kept configurable because the sample data never settled whether the
/// encoder or the decoder was at fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ScanModePolicy {
    pub flip_projected_ns: bool,
}

impl ScanModePolicy {
    /// Whether rows of `grid` must be reversed to run south to north.
    pub fn flip_rows(&self, grid: &GridDefinition) -> bool {
        let scans_north_to_south = grid.scan_mode & 0x40 == 0;
        if !scans_north_to_south {
            return false;
        }
        grid.is_lat_lon() || self.flip_projected_ns
    }
}
