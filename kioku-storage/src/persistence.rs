//! # Store File Format
//!
//! Binary snapshot of a store's full state, optionally wrapped in an
//! AES-256-GCM envelope (see `kioku_core::crypto`).
//!
//! ## Layout (all integers little-endian)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  magic: [u8; 4] = "KVS1"                                    │
//! │  version: u32                                               │
//! │  quantized: u8 (0 | 1)                                      │
//! │  dimension: u32                                             │
//! │  record_count: u32                                          │
//! │                                                             │
//! │  record_count × (sorted by id):                             │
//! │    id_len: u32, id: [u8; id_len] (UTF-8)                    │
//! │    quantized: scale: f32, offset: f32, codes: [i8; dim]     │
//! │    full:      components: [f32; dim]                        │
//! │                                                             │
//! │  crc32: u32 over every preceding byte                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go to a temp file in the destination directory, are fsynced, then
//! renamed over the destination, so readers see either the old file or the
//! complete new one.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use kioku_core::crypto::{self, is_sealed};
use kioku_core::error::{Error, Result, ResultExt};
use kioku_index::QuantizedVector;

use crate::record::{Embedding, StoreState};

pub const STORE_MAGIC: &[u8; 4] = b"KVS1";
pub const FORMAT_VERSION: u32 = 1;

const FLAG_QUANTIZED: u8 = 0x01;
const HEADER_SIZE: usize = 4 + 4 + 1 + 4 + 4;
const CHECKSUM_SIZE: usize = 4;

/// Serialize store state to the plaintext format
pub fn encode(state: &StoreState) -> Result<Vec<u8>> {
    let dimension = to_u32(state.dimension, "dimension")?;
    let count = to_u32(state.records.len(), "record count")?;

    let per_record = if state.quantized { 8 + state.dimension } else { 4 * state.dimension };
    let mut buf = Vec::with_capacity(HEADER_SIZE + state.records.len() * (per_record + 16) + CHECKSUM_SIZE);

    // Header
    buf.write_all(STORE_MAGIC)?;
    buf.write_u32::<LittleEndian>(FORMAT_VERSION)?;
    buf.write_u8(if state.quantized { FLAG_QUANTIZED } else { 0 })?;
    buf.write_u32::<LittleEndian>(dimension)?;
    buf.write_u32::<LittleEndian>(count)?;

    // Records
    for (id, embedding) in &state.records {
        if embedding.is_quantized() != state.quantized || embedding.dimension() != state.dimension {
            return Err(Error::Internal {
                message: format!("record {:?} does not match store layout", id),
            });
        }

        buf.write_u32::<LittleEndian>(to_u32(id.len(), "id length")?)?;
        buf.write_all(id.as_bytes())?;

        match embedding {
            Embedding::Quantized(q) => {
                buf.write_f32::<LittleEndian>(q.scale)?;
                buf.write_f32::<LittleEndian>(q.offset)?;
                for &code in &q.codes {
                    buf.write_i8(code)?;
                }
            }
            Embedding::Full(values) => {
                for &v in values {
                    buf.write_f32::<LittleEndian>(v)?;
                }
            }
        }
    }

    let checksum = crypto::crc32_checksum(&buf);
    buf.write_u32::<LittleEndian>(checksum)?;
    Ok(buf)
}

/// Parse the plaintext format back into store state.
///
/// Rejects unknown versions, bad checksums, truncation, trailing bytes, and
/// records that would break store invariants (duplicate ids, empty ids,
/// non-finite values).
pub fn decode(bytes: &[u8]) -> Result<StoreState> {
    if bytes.len() < STORE_MAGIC.len() || &bytes[..STORE_MAGIC.len()] != STORE_MAGIC {
        return Err(Error::format("not a store file (bad magic)"));
    }
    if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
        return Err(Error::format("store file is truncated"));
    }

    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version != FORMAT_VERSION {
        return Err(Error::format(format!("unsupported store format version: {}", version)));
    }

    let (body, trailer) = bytes.split_at(bytes.len() - CHECKSUM_SIZE);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if !crypto::verify_crc32(body, expected) {
        return Err(Error::format("checksum mismatch (file corrupted or truncated)"));
    }

    let mut cursor = Cursor::new(body);
    cursor.set_position(8);

    let quantized = match cursor.read_u8()? {
        0 => false,
        FLAG_QUANTIZED => true,
        other => return Err(Error::format(format!("invalid quantization flag: {}", other))),
    };
    let dimension = cursor.read_u32::<LittleEndian>()? as usize;
    let count = cursor.read_u32::<LittleEndian>()? as usize;

    if count > 0 && dimension == 0 {
        return Err(Error::format("records present but dimension is zero"));
    }

    let mut records = BTreeMap::new();
    for _ in 0..count {
        let id = read_id(&mut cursor)?;

        let payload = if quantized { 8 + dimension } else { 4 * dimension };
        if payload > body.len() - cursor.position() as usize {
            return Err(Error::format(format!("record {:?} runs past end of data", id)));
        }

        let embedding = if quantized {
            let scale = cursor.read_f32::<LittleEndian>()?;
            let offset = cursor.read_f32::<LittleEndian>()?;
            if !(scale.is_finite() && scale > 0.0 && offset.is_finite()) {
                return Err(Error::format(format!("invalid quantization params for {:?}", id)));
            }
            let mut raw = vec![0u8; dimension];
            cursor.read_exact(&mut raw)?;
            if raw.iter().any(|&b| b as i8 == i8::MIN) {
                return Err(Error::format(format!("code -128 in {:?} is outside the quantized range", id)));
            }
            let codes = raw.into_iter().map(|b| b as i8).collect();
            Embedding::Quantized(QuantizedVector { codes, scale, offset })
        } else {
            let mut values = vec![0f32; dimension];
            cursor.read_f32_into::<LittleEndian>(&mut values)?;
            if values.iter().any(|v| !v.is_finite()) {
                return Err(Error::format(format!("non-finite component in {:?}", id)));
            }
            Embedding::Full(values)
        };

        if records.insert(id.clone(), embedding).is_some() {
            return Err(Error::format(format!("duplicate id {:?}", id)));
        }
    }

    if cursor.position() as usize != body.len() {
        return Err(Error::format(format!(
            "{} trailing bytes after last record",
            body.len() - cursor.position() as usize
        )));
    }

    Ok(StoreState {
        quantized,
        dimension: if records.is_empty() { 0 } else { dimension },
        records,
    })
}

fn read_id(cursor: &mut Cursor<&[u8]>) -> Result<String> {
    let len = cursor.read_u32::<LittleEndian>()? as usize;
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len == 0 {
        return Err(Error::format("empty record id"));
    }
    if len > remaining {
        return Err(Error::format("record id runs past end of data"));
    }
    let mut raw = vec![0u8; len];
    cursor.read_exact(&mut raw)?;
    String::from_utf8(raw).map_err(|_| Error::format("record id is not valid UTF-8"))
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::invalid_input(format!("{} {} exceeds u32", what, value)))
}

/// Encrypt plaintext if a key is given
pub fn seal_payload(plaintext: Vec<u8>, key: Option<&str>, kdf_iterations: u32) -> Result<Vec<u8>> {
    match key {
        Some(key) => crypto::seal(&plaintext, key, kdf_iterations),
        None => Ok(plaintext),
    }
}

/// Turn file contents back into plaintext, checking the key matches the file
pub fn open_payload(raw: Vec<u8>, key: Option<&str>) -> Result<Vec<u8>> {
    match (is_sealed(&raw), key) {
        (true, Some(key)) => crypto::open(&raw, key),
        (true, None) => Err(Error::decryption("file is encrypted; a key is required")),
        (false, Some(_)) if raw.starts_with(STORE_MAGIC) => {
            Err(Error::format("file is not encrypted but a key was supplied"))
        }
        (false, Some(_)) => Err(Error::format("not a store file (bad magic)")),
        (false, None) => Ok(raw),
    }
}

/// Read a whole file
pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {:?}", path))
}

/// Replace `path` with `bytes` atomically.
///
/// On any error the destination is untouched and the temp file is removed
/// when it is dropped.
pub fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let mut tmp = tempfile::Builder::new()
        .prefix(".kioku-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("Failed to create temp file in {:?}", dir))?;

    tmp.write_all(bytes)
        .with_context(|| format!("Failed to write {:?}", tmp.path()))?;
    tmp.flush()?;
    if sync {
        tmp.as_file()
            .sync_all()
            .with_context(|| "Failed to fsync temp file".to_string())?;
    }

    tmp.persist(path)
        .map_err(|e| Error::io(format!("Failed to move temp file over {:?}", path), e.error))?;

    if sync {
        sync_dir(dir)?;
    }
    debug!("Wrote {} bytes to {:?}", bytes.len(), path);
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("Failed to fsync directory {:?}", dir))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state(quantized: bool) -> StoreState {
        let mut state = StoreState::new(quantized);
        state.dimension = 3;
        for (id, v) in [("b", [0.0, 1.0, 0.0]), ("a", [1.0, 0.0, 0.0]), ("c", [0.5, 0.5, 2.0])] {
            state.records.insert(id.to_string(), Embedding::encode(&v, quantized));
        }
        state
    }

    #[test]
    fn test_roundtrip_full() {
        let state = sample_state(false);
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_roundtrip_quantized() {
        let state = sample_state(true);
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_layout_sizes() {
        let full = encode(&sample_state(false)).unwrap();
        // header + 3 × (4 + 1 + 12) + crc
        assert_eq!(full.len(), HEADER_SIZE + 3 * 17 + CHECKSUM_SIZE);

        let quant = encode(&sample_state(true)).unwrap();
        // header + 3 × (4 + 1 + 8 + 3) + crc
        assert_eq!(quant.len(), HEADER_SIZE + 3 * 16 + CHECKSUM_SIZE);
    }

    #[test]
    fn test_deterministic_bytes() {
        let a = encode(&sample_state(false)).unwrap();
        let b = encode(&sample_state(false)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_state() {
        let state = StoreState::new(true);
        let bytes = encode(&state).unwrap();
        assert_eq!(decode(&bytes).unwrap(), state);
    }

    #[test]
    fn test_unknown_version() {
        let mut bytes = encode(&sample_state(false)).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"), "{}", err);
    }

    #[test]
    fn test_truncated() {
        let bytes = encode(&sample_state(false)).unwrap();
        for cut in [3, 10, bytes.len() / 2, bytes.len() - 1] {
            assert!(matches!(decode(&bytes[..cut]), Err(Error::Format { .. })), "cut at {}", cut);
        }
    }

    #[test]
    fn test_bit_flip_detected() {
        let mut bytes = encode(&sample_state(false)).unwrap();
        bytes[HEADER_SIZE + 6] ^= 0x40;
        assert!(matches!(decode(&bytes), Err(Error::Format { .. })));
    }

    #[test]
    fn test_code_outside_symmetric_range_rejected() {
        let mut bytes = encode(&sample_state(true)).unwrap();
        // first code of record "a": id length, id, scale, offset
        let first_code = HEADER_SIZE + 4 + 1 + 8;
        bytes[first_code] = 0x80;
        let body_len = bytes.len() - CHECKSUM_SIZE;
        let checksum = crypto::crc32_checksum(&bytes[..body_len]);
        bytes[body_len..].copy_from_slice(&checksum.to_le_bytes());

        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert!(err.to_string().contains("-128"), "{}", err);
    }

    #[test]
    fn test_key_policy() {
        let plain = encode(&sample_state(false)).unwrap();

        assert_eq!(open_payload(plain.clone(), None).unwrap(), plain);
        assert!(matches!(open_payload(plain.clone(), Some("k")), Err(Error::Format { .. })));

        let sealed = seal_payload(plain.clone(), Some("k"), 1_000).unwrap();
        assert!(matches!(open_payload(sealed.clone(), None), Err(Error::Decryption { .. })));
        assert!(matches!(open_payload(sealed.clone(), Some("x")), Err(Error::Decryption { .. })));
        assert_eq!(open_payload(sealed, Some("k")).unwrap(), plain);
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.kvs");
        write_atomic(&path, b"first", true).unwrap();
        write_atomic(&path, b"second", false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
