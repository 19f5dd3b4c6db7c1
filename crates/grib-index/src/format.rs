//! Versioned binary index files.
//!
//! Two kinds of index share one container layout:
//!
//! | Kind         | Extension | Payload                                  |
//! |--------------|-----------|------------------------------------------|
//! | Records      | `.gbx9`   | scanned record descriptors of one file   |
//! | Collection   | `.ncx3`   | variables, axes and record locators      |
//!
//! Layout (big-endian):
//!
//! ```text
//! magic[4] | version u16 | config fingerprint u32 | payload length u64 | payload crc32 u32 | payload
//! ```
//!
//! The payload is bincode. Every map in the payload is an ordered vector,
//! so encoding the same value twice yields identical bytes.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{IndexError, Result};

/// Version written by this build. Older or newer files are not trusted.
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4 + 8 + 4;

/// Which index a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Records,
    Collection,
}

impl IndexKind {
    pub fn magic(self) -> &'static [u8; 4] {
        match self {
            Self::Records => b"GBX9",
            Self::Collection => b"NCX3",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Records => "gbx9",
            Self::Collection => "ncx3",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "gbx9" => Some(Self::Records),
            "ncx3" => Some(Self::Collection),
            _ => None,
        }
    }
}

/// Encode `payload` into an index file image.
pub fn encode<T: Serialize>(kind: IndexKind, fingerprint: u32, payload: &T) -> Result<Vec<u8>> {
    let body = bincode::serialize(payload)?;
    let mut out = Vec::with_capacity(HEADER_LEN + body.len());
    out.extend_from_slice(kind.magic());
    out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
    out.extend_from_slice(&fingerprint.to_be_bytes());
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode an index file image, checking magic, version, fingerprint and
/// checksum before touching the payload.
pub fn decode<T: DeserializeOwned>(kind: IndexKind, fingerprint: u32, bytes: &[u8]) -> Result<T> {
    if bytes.len() < HEADER_LEN {
        return Err(IndexError::serialization("index file shorter than its header"));
    }
    if &bytes[0..4] != kind.magic() {
        return Err(IndexError::serialization(format!(
            "bad magic, expected {}",
            String::from_utf8_lossy(kind.magic())
        )));
    }

    let version = u16::from_be_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(IndexError::serialization(format!(
            "index version {} does not match {}",
            version, FORMAT_VERSION
        )));
    }

    let stored_fingerprint = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]);
    if stored_fingerprint != fingerprint {
        return Err(IndexError::serialization(format!(
            "index built with configuration {:08x}, current is {:08x}",
            stored_fingerprint, fingerprint
        )));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[10..18]);
    let len = u64::from_be_bytes(len_bytes) as usize;
    let crc = u32::from_be_bytes([bytes[18], bytes[19], bytes[20], bytes[21]]);

    let body = &bytes[HEADER_LEN..];
    if body.len() != len {
        return Err(IndexError::serialization(format!(
            "payload is {} bytes, header declares {}",
            body.len(),
            len
        )));
    }
    if crc32fast::hash(body) != crc {
        return Err(IndexError::serialization("payload checksum mismatch"));
    }

    Ok(bincode::deserialize(body)?)
}

/// Write an index file atomically: the content lands in a temporary file in
/// the same directory and is renamed over `path`.
pub fn write_file<T: Serialize>(
    path: &Path,
    kind: IndexKind,
    fingerprint: u32,
    payload: &T,
) -> Result<()> {
    let bytes = encode(kind, fingerprint, payload)?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| IndexError::Io(e.error))?;
    Ok(())
}

pub fn read_file<T: DeserializeOwned>(path: &Path, kind: IndexKind, fingerprint: u32) -> Result<T> {
    let bytes = fs::read(path)?;
    decode(kind, fingerprint, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_deterministic() {
        let payload = vec![(1u32, "a".to_string()), (2, "b".to_string())];
        let a = encode(IndexKind::Collection, 7, &payload).unwrap();
        let b = encode(IndexKind::Collection, 7, &payload).unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[0..4], b"NCX3");

        let back: Vec<(u32, String)> = decode(IndexKind::Collection, 7, &a).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_decode_rejects_version_and_fingerprint_mismatch() {
        let mut bytes = encode(IndexKind::Records, 1, &42u64).unwrap();

        assert!(decode::<u64>(IndexKind::Records, 2, &bytes).is_err());
        assert!(decode::<u64>(IndexKind::Collection, 1, &bytes).is_err());

        bytes[4..6].copy_from_slice(&(FORMAT_VERSION - 1).to_be_bytes());
        assert!(matches!(
            decode::<u64>(IndexKind::Records, 1, &bytes),
            Err(IndexError::Serialization(_))
        ));
    }

    #[test]
    fn test_decode_rejects_corrupt_payload() {
        let mut bytes = encode(IndexKind::Records, 1, &vec![1u64, 2, 3]).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(decode::<Vec<u64>>(IndexKind::Records, 1, &bytes).is_err());

        bytes.truncate(HEADER_LEN - 1);
        assert!(decode::<Vec<u64>>(IndexKind::Records, 1, &bytes).is_err());
    }

    #[test]
    fn test_write_file_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/file.gbx9");
        write_file(&path, IndexKind::Records, 3, &"payload".to_string()).unwrap();
        let back: String = read_file(&path, IndexKind::Records, 3).unwrap();
        assert_eq!(back, "payload");
    }
}
