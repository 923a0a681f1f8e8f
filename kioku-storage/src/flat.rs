//! # Memory-Mapped Flat Snapshot
//!
//! Read-only export of a store that can be searched straight from the page
//! cache, without decoding into an `EmbeddingStore` first.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Flat File (.kvf)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Header (64 bytes):                                         │
//! │    magic: [u8; 4] = "KVF1"                                  │
//! │    version: u32                                             │
//! │    dimension: u32                                           │
//! │    flags: u32 (bit0 = quantized)                            │
//! │    count: u64                                               │
//! │    vectors_offset: u64                                      │
//! │    params_offset: u64 (0 when not quantized)                │
//! │    ids_offset: u64                                          │
//! │    reserved: [u8; 16]                                       │
//! │                                                             │
//! │  Vectors: count × dimension × (f32 | i8), in id order       │
//! │  Params:  count × (scale: f32, offset: f32), 4-byte aligned │
//! │  Ids:     count × u64 offsets, then NUL-terminated UTF-8    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use kioku_core::error::{Error, Result, ResultExt};
use kioku_core::SearchHit;
use kioku_index::quantize::dequantize_scalar;
use kioku_index::{cosine_similarity, top_k};

use crate::record::{Embedding, StoreState};

const MAGIC: &[u8; 4] = b"KVF1";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;
const FLAG_QUANTIZED: u32 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq)]
struct FlatHeader {
    dimension: u32,
    flags: u32,
    count: u64,
    vectors_offset: u64,
    params_offset: u64,
    ids_offset: u64,
}

impl FlatHeader {
    fn is_quantized(&self) -> bool {
        self.flags & FLAG_QUANTIZED != 0
    }

    fn element_size(&self) -> usize {
        if self.is_quantized() {
            1
        } else {
            4
        }
    }

    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.dimension.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.count.to_le_bytes());
        buf[24..32].copy_from_slice(&self.vectors_offset.to_le_bytes());
        buf[32..40].copy_from_slice(&self.params_offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.ids_offset.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::format("flat file header too small"));
        }
        if &buf[0..4] != MAGIC {
            return Err(Error::format("not a flat snapshot (bad magic)"));
        }
        let version = read_u32(buf, 4);
        if version != VERSION {
            return Err(Error::format(format!("unsupported flat format version: {}", version)));
        }
        Ok(Self {
            dimension: read_u32(buf, 8),
            flags: read_u32(buf, 12),
            count: read_u64(buf, 16),
            vectors_offset: read_u64(buf, 24),
            params_offset: read_u64(buf, 32),
            ids_offset: read_u64(buf, 40),
        })
    }
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn read_f32(buf: &[u8], at: usize) -> f32 {
    f32::from_bits(read_u32(buf, at))
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Serialize store state into the flat layout
pub fn encode_flat(state: &StoreState) -> Result<Vec<u8>> {
    let count = state.records.len();
    let dimension = u32::try_from(state.dimension)
        .map_err(|_| Error::invalid_input("dimension exceeds u32"))?;

    if let Some(id) = state.records.keys().find(|id| id.contains('\0')) {
        return Err(Error::invalid_input(format!(
            "id {:?} contains a NUL byte and cannot be exported to a flat snapshot",
            id
        )));
    }

    let element_size = if state.quantized { 1 } else { 4 };
    let vectors_offset = HEADER_SIZE;
    let vectors_end = vectors_offset + count * state.dimension * element_size;
    let (params_offset, params_end) = if state.quantized {
        let start = align4(vectors_end);
        (start, start + count * 8)
    } else {
        (0, vectors_end)
    };
    let ids_offset = align4(params_end);
    let strings_len: usize = state.records.keys().map(|id| id.len() + 1).sum();
    let total = ids_offset + count * 8 + strings_len;

    let header = FlatHeader {
        dimension,
        flags: if state.quantized { FLAG_QUANTIZED } else { 0 },
        count: count as u64,
        vectors_offset: vectors_offset as u64,
        params_offset: params_offset as u64,
        ids_offset: ids_offset as u64,
    };

    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&header.to_bytes());

    for embedding in state.records.values() {
        match embedding {
            Embedding::Full(values) => {
                for v in values {
                    buf.extend_from_slice(&v.to_le_bytes());
                }
            }
            Embedding::Quantized(q) => {
                buf.extend(q.codes.iter().map(|&c| c as u8));
            }
        }
    }

    if state.quantized {
        buf.resize(params_offset, 0);
        for embedding in state.records.values() {
            if let Embedding::Quantized(q) = embedding {
                buf.extend_from_slice(&q.scale.to_le_bytes());
                buf.extend_from_slice(&q.offset.to_le_bytes());
            }
        }
    }

    buf.resize(ids_offset, 0);
    let mut next = (count * 8) as u64;
    for id in state.records.keys() {
        buf.extend_from_slice(&next.to_le_bytes());
        next += id.len() as u64 + 1;
    }
    for id in state.records.keys() {
        buf.extend_from_slice(id.as_bytes());
        buf.push(0);
    }

    debug_assert_eq!(buf.len(), total);
    Ok(buf)
}

/// Read-only, memory-mapped view of a flat snapshot
pub struct FlatVectorStore {
    path: PathBuf,
    mmap: Mmap,
    header: FlatHeader,
    /// Byte range of each id within the mapping
    id_spans: Vec<(usize, usize)>,
}

impl FlatVectorStore {
    /// Map a flat snapshot and validate every offset against the file size
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("Failed to open flat file {:?}", path))?;

        // SAFETY: the mapping is read-only and snapshots are only ever
        // replaced by rename, never rewritten in place.
        let mmap = unsafe { MmapOptions::new().map(&file) }
            .with_context(|| format!("Failed to mmap {:?}", path))?;

        let header = FlatHeader::from_bytes(&mmap)?;
        let id_spans = Self::validate(&mmap, &header)?;

        tracing::debug!(
            "Opened flat snapshot {:?}: {} vectors, dim {}",
            path,
            header.count,
            header.dimension
        );

        Ok(Self { path, mmap, header, id_spans })
    }

    fn validate(data: &[u8], header: &FlatHeader) -> Result<Vec<(usize, usize)>> {
        let out_of_bounds = || Error::format("flat file section out of bounds (truncated?)");

        let count = usize::try_from(header.count).map_err(|_| out_of_bounds())?;
        let dim = header.dimension as usize;
        if count > 0 && dim == 0 {
            return Err(Error::format("records present but dimension is zero"));
        }

        let vectors_offset = usize::try_from(header.vectors_offset).map_err(|_| out_of_bounds())?;
        let vectors_len = count
            .checked_mul(dim)
            .and_then(|n| n.checked_mul(header.element_size()))
            .ok_or_else(out_of_bounds)?;
        check_range(data, vectors_offset, vectors_len)?;

        if header.is_quantized() {
            let codes = data.get(vectors_offset..vectors_offset + vectors_len).unwrap_or_default();
            if codes.iter().any(|&b| b as i8 == i8::MIN) {
                return Err(Error::format("code -128 is outside the quantized range"));
            }
            let params_offset = usize::try_from(header.params_offset).map_err(|_| out_of_bounds())?;
            if params_offset % 4 != 0 {
                return Err(Error::format("params section is not 4-byte aligned"));
            }
            check_range(data, params_offset, count.checked_mul(8).ok_or_else(out_of_bounds)?)?;
        }

        let ids_offset = usize::try_from(header.ids_offset).map_err(|_| out_of_bounds())?;
        check_range(data, ids_offset, count.checked_mul(8).ok_or_else(out_of_bounds)?)?;

        let mut spans = Vec::with_capacity(count);
        for i in 0..count {
            let rel = usize::try_from(read_u64(data, ids_offset + i * 8)).map_err(|_| out_of_bounds())?;
            let start = ids_offset.checked_add(rel).ok_or_else(out_of_bounds)?;
            if start >= data.len() {
                return Err(out_of_bounds());
            }
            let len = data[start..]
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::format("unterminated id in flat file"))?;
            if std::str::from_utf8(&data[start..start + len]).is_err() {
                return Err(Error::format("flat file id is not valid UTF-8"));
            }
            spans.push((start, len));
        }
        Ok(spans)
    }

    pub fn len(&self) -> usize {
        self.id_spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_spans.is_empty()
    }

    pub fn dimension(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.header.dimension as usize
        }
    }

    pub fn is_quantized(&self) -> bool {
        self.header.is_quantized()
    }

    /// Id at position `idx` (ids are stored in ascending order)
    pub fn id(&self, idx: usize) -> Option<&str> {
        let &(start, len) = self.id_spans.get(idx)?;
        std::str::from_utf8(&self.mmap[start..start + len]).ok()
    }

    /// Vector at position `idx`, dequantized if needed
    pub fn vector(&self, idx: usize) -> Option<Vec<f32>> {
        if idx >= self.len() {
            return None;
        }
        let mut out = Vec::with_capacity(self.dimension());
        self.read_vector(idx, &mut out);
        Some(out)
    }

    fn read_vector(&self, idx: usize, out: &mut Vec<f32>) {
        out.clear();
        let dim = self.header.dimension as usize;
        let base = self.header.vectors_offset as usize + idx * dim * self.header.element_size();

        if self.is_quantized() {
            let params = self.header.params_offset as usize + idx * 8;
            let scale = read_f32(&self.mmap, params);
            let offset = read_f32(&self.mmap, params + 4);
            out.extend(
                self.mmap[base..base + dim]
                    .iter()
                    .map(|&b| dequantize_scalar(b as i8, scale, offset)),
            );
        } else {
            out.extend((0..dim).map(|j| read_f32(&self.mmap, base + j * 4)));
        }
    }

    /// Same ranking as `EmbeddingStore::search`; a query of the wrong
    /// length yields no hits.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<SearchHit> {
        self.try_search(query, limit).unwrap_or_default()
    }

    pub fn try_search(&self, query: &[f32], limit: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension() {
            return Err(Error::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }

        let mut buf = Vec::with_capacity(self.dimension());
        let mut scored = Vec::with_capacity(self.len());
        for idx in 0..self.len() {
            let Some(id) = self.id(idx) else { continue };
            self.read_vector(idx, &mut buf);
            scored.push((id, cosine_similarity(query, &buf)));
        }
        Ok(top_k(scored, limit))
    }
}

impl std::fmt::Debug for FlatVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatVectorStore")
            .field("path", &self.path)
            .field("len", &self.len())
            .field("dimension", &self.dimension())
            .field("quantized", &self.is_quantized())
            .finish()
    }
}

fn check_range(data: &[u8], offset: usize, len: usize) -> Result<()> {
    match offset.checked_add(len) {
        Some(end) if offset >= HEADER_SIZE && end <= data.len() => Ok(()),
        Some(_) if len == 0 => Ok(()),
        _ => Err(Error::format("flat file section out of bounds (truncated?)")),
    }
}
