//! Lazy record scanner over GRIB1/GRIB2 byte streams.
//!
//! The scanner searches for `GRIB` markers, reads only the section headers
//! it needs to describe each record, and seeks over the packed data. It
//! yields one [`RawRecord`] per GRIB1 message and one per field of a GRIB2
//! message.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{GribError, Result};
use crate::grid::GridDefinition;
use crate::options::ScanOptions;
use crate::record::{Grib1Record, Grib2Record, RawRecord, RecordLocator};
use crate::sections::{grib1, grib2, grib2_section_header, read_u24};

/// Size of the blocks read while searching for the next `GRIB` marker.
const SEARCH_BLOCK: usize = 64 * 1024;

const END_MARKER: &[u8; 4] = b"7777";

/// Smallest possible message: indicator plus end marker.
const MIN_MESSAGE_LEN: u64 = 12;

/// GRIB1 lengths with this bit set use the large-record encoding.
const GRIB1_LARGE_FLAG: u64 = 0x80_0000;

/// Forward-only iterator over the records of a GRIB stream.
///
/// A malformed or truncated message ends the iteration with an error;
/// nothing after it is yielded.
pub struct RecordScanner<R> {
    reader: R,
    options: ScanOptions,
    stream_len: u64,
    next_search: u64,
    pending: VecDeque<RawRecord>,
    messages_scanned: usize,
    fields_skipped: usize,
    finished: bool,
}

/// Open `path` and scan it with the given options.
pub fn scan_file(path: impl AsRef<Path>, options: ScanOptions) -> Result<RecordScanner<BufReader<File>>> {
    let file = File::open(path.as_ref())?;
    RecordScanner::new(BufReader::new(file), options)
}

/// Read the complete message containing `locator` from `reader`.
pub fn read_message<R: Read + Seek>(reader: &mut R, locator: &RecordLocator) -> Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(locator.pos))?;
    let mut buf = vec![0u8; locator.len as usize];
    reader.read_exact(&mut buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            GribError::Truncated {
                offset: locator.pos,
                needed: locator.len,
                available: 0,
            }
        } else {
            GribError::Io(e)
        }
    })?;
    if &buf[0..4] != b"GRIB" {
        return Err(GribError::InvalidFormat(format!(
            "no GRIB marker at offset {}",
            locator.pos
        )));
    }
    Ok(buf)
}

impl<R: Read + Seek> RecordScanner<R> {
    pub fn new(mut reader: R, options: ScanOptions) -> Result<Self> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;
        Ok(Self {
            reader,
            options,
            stream_len,
            next_search: 0,
            pending: VecDeque::new(),
            messages_scanned: 0,
            fields_skipped: 0,
            finished: false,
        })
    }

    /// Number of complete messages scanned so far.
    pub fn messages_scanned(&self) -> usize {
        self.messages_scanned
    }

    /// Fields skipped because their product template is not supported.
    pub fn fields_skipped(&self) -> usize {
        self.fields_skipped
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_at(&mut self, pos: u64, len: usize) -> Result<Vec<u8>> {
        if pos + len as u64 > self.stream_len {
            return Err(GribError::Truncated {
                offset: pos,
                needed: len as u64,
                available: self.stream_len.saturating_sub(pos),
            });
        }
        self.reader.seek(SeekFrom::Start(pos))?;
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Offset of the next `GRIB` marker at or after `from`.
    fn find_marker(&mut self, from: u64) -> Result<Option<u64>> {
        let mut pos = from;
        let mut buf = vec![0u8; SEARCH_BLOCK];
        while pos + 4 <= self.stream_len {
            let want = ((self.stream_len - pos) as usize).min(SEARCH_BLOCK);
            self.reader.seek(SeekFrom::Start(pos))?;
            self.reader.read_exact(&mut buf[..want])?;
            if let Some(i) = buf[..want].windows(4).position(|w| w == b"GRIB") {
                return Ok(Some(pos + i as u64));
            }
            if want < SEARCH_BLOCK {
                break;
            }
            // Overlap so a marker straddling two blocks is still found
            pos += (want - 3) as u64;
        }
        Ok(None)
    }

    fn ends_with_marker(&mut self, start: u64, len: u64) -> Result<bool> {
        if len < MIN_MESSAGE_LEN || start + len > self.stream_len {
            return Ok(false);
        }
        let tail = self.read_at(start + len - 4, 4)?;
        Ok(tail.as_slice() == END_MARKER)
    }

    /// Validate the declared length of the message at `start`, falling back
    /// to the start of the next message when bad lengths are allowed.
    fn resolve_length(&mut self, start: u64, declared: u64) -> Result<u64> {
        if declared <= self.options.max_message_len && self.ends_with_marker(start, declared)? {
            return Ok(declared);
        }

        let available = self.stream_len - start;
        let past_eof = declared > available;
        if !self.options.allow_bad_section_length {
            return Err(if past_eof {
                GribError::Truncated {
                    offset: start,
                    needed: declared,
                    available,
                }
            } else {
                GribError::BadLength {
                    offset: start,
                    declared,
                }
            });
        }

        match self.find_marker(start + 4)? {
            Some(next) => {
                warn!(
                    offset = start,
                    declared,
                    actual = next - start,
                    "Bad message length, using start of next message"
                );
                Ok(next - start)
            }
            None if past_eof => Err(GribError::Truncated {
                offset: start,
                needed: declared,
                available,
            }),
            None => {
                warn!(
                    offset = start,
                    declared,
                    actual = available,
                    "Bad message length, using end of stream"
                );
                Ok(available)
            }
        }
    }

    /// Scan the next message into `pending`. Returns false at end of stream.
    fn scan_next_message(&mut self) -> Result<bool> {
        let start = match self.find_marker(self.next_search)? {
            Some(start) => start,
            None => return Ok(false),
        };

        let header_len = (self.stream_len - start).min(16) as usize;
        if header_len < 8 {
            return Err(GribError::Truncated {
                offset: start,
                needed: 8,
                available: header_len as u64,
            });
        }
        let header = self.read_at(start, header_len)?;

        let (records, len) = match header[7] {
            1 => self.scan_grib1(start, &header)?,
            2 => self.scan_grib2(start, &header)?,
            other => {
                debug!(offset = start, edition = other, "Ignoring GRIB marker with unknown edition");
                self.next_search = start + 4;
                return Ok(true);
            }
        };

        self.next_search = start + len;
        self.messages_scanned += 1;
        self.pending.extend(records);
        Ok(true)
    }

    fn scan_grib1(&mut self, start: u64, header: &[u8]) -> Result<(Vec<RawRecord>, u64)> {
        let raw_len = read_u24(&header[4..7]) as u64;

        let mut offset = start + grib1::INDICATOR_LEN as u64;
        let pds_len = grib1::section_length(&self.read_at(offset, 3)?);
        let pds = grib1::parse_pds(&self.read_at(offset, pds_len)?)?;
        offset += pds_len as u64;

        let grid = if pds.has_gds {
            let gds_len = grib1::section_length(&self.read_at(offset, 3)?);
            let grid = grib1::parse_gds(&self.read_at(offset, gds_len)?)?;
            offset += gds_len as u64;
            grid
        } else {
            GridDefinition::predefined(pds.grid_id)
        };

        let has_bitmap = pds.has_bms;
        if has_bitmap {
            offset += grib1::section_length(&self.read_at(offset, 3)?) as u64;
        }

        let bds_bytes = self.read_at(offset, 11)?;
        let bds = grib1::parse_bds_header(&bds_bytes)?;

        let declared = if raw_len & GRIB1_LARGE_FLAG != 0 {
            // ECMWF large-record encoding: length counted in 120-byte units,
            // with the true remainder carried by a short BDS length.
            let bds_len = grib1::section_length(&bds_bytes) as u64;
            let mut total = (raw_len & (GRIB1_LARGE_FLAG - 1)) * 120;
            if bds_len < 120 {
                total = total.saturating_sub(bds_len) + 4;
            }
            total
        } else {
            raw_len
        };
        let len = self.resolve_length(start, declared)?;

        let record = Grib1Record {
            locator: RecordLocator {
                pos: start,
                len,
                field: 0,
            },
            pds,
            grid,
            has_bitmap,
            bits_per_value: bds.bits_per_value,
        };
        Ok((vec![RawRecord::Grib1(record)], len))
    }

    fn scan_grib2(&mut self, start: u64, header: &[u8]) -> Result<(Vec<RawRecord>, u64)> {
        if header.len() < 16 {
            return Err(GribError::Truncated {
                offset: start,
                needed: 16,
                available: header.len() as u64,
            });
        }
        let indicator = grib2::parse_indicator(header)?;
        let len = self.resolve_length(start, indicator.message_length)?;
        let end = start + len;

        let mut identification = None;
        let mut grid: Option<GridDefinition> = None;
        let mut product = None;
        let mut unsupported_product = false;
        let mut data_representation = None;
        let mut bitmap_indicator = 255u8;
        let mut field: u16 = 0;
        let mut records = Vec::new();

        let mut offset = start + 16;
        while offset + 4 <= end {
            let head_len = (end - offset).min(5) as usize;
            let head = self.read_at(offset, head_len)?;
            if &head[..4] == END_MARKER {
                break;
            }
            if head_len < 5 {
                return Err(GribError::section(0, format!("Truncated section header at {}", offset)));
            }
            let (sec_len, number) = grib2_section_header(&head);
            let sec_len = sec_len as u64;
            if sec_len < 5 || offset + sec_len > end {
                return Err(GribError::section(
                    number,
                    format!("Invalid section length {} at offset {}", sec_len, offset),
                ));
            }

            match number {
                1 => {
                    let bytes = self.read_at(offset, sec_len as usize)?;
                    identification = Some(grib2::parse_identification(&bytes)?);
                }
                2 => {}
                3 => {
                    let bytes = self.read_at(offset, sec_len as usize)?;
                    grid = Some(grib2::parse_grid_definition(&bytes)?);
                }
                4 => {
                    let bytes = self.read_at(offset, sec_len as usize)?;
                    match grib2::parse_product_definition(&bytes) {
                        Ok(pd) => {
                            product = Some(pd);
                            unsupported_product = false;
                        }
                        Err(GribError::UnsupportedTemplate { what, value }) => {
                            warn!(offset = start, field, template = value, "Skipping field with unsupported {}", what);
                            product = None;
                            unsupported_product = true;
                        }
                        Err(e) => return Err(e),
                    }
                }
                5 => {
                    let bytes = self.read_at(offset, sec_len as usize)?;
                    data_representation = Some(grib2::parse_data_representation(&bytes)?);
                }
                6 => {
                    bitmap_indicator = self.read_at(offset + 5, 1)?[0];
                }
                7 => {
                    if unsupported_product {
                        self.fields_skipped += 1;
                    } else {
                        let missing = |n: u8| GribError::section(n, "Section missing before data section");
                        let record = Grib2Record {
                            locator: RecordLocator {
                                pos: start,
                                len,
                                field,
                            },
                            discipline: indicator.discipline,
                            identification: identification.clone().ok_or_else(|| missing(1))?,
                            grid: grid.clone().ok_or_else(|| missing(3))?,
                            product: product.clone().ok_or_else(|| missing(4))?,
                            data_representation: data_representation.ok_or_else(|| missing(5))?,
                            bitmap_indicator,
                        };
                        records.push(RawRecord::Grib2(record));
                    }
                    field += 1;
                }
                other => {
                    return Err(GribError::section(other, format!("Unknown section at offset {}", offset)));
                }
            }
            offset += sec_len;
        }

        Ok((records, len))
    }
}

impl<R: Read + Seek> Iterator for RecordScanner<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            match self.scan_next_message() {
                Ok(true) => continue,
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
