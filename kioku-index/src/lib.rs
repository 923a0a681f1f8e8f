//! # KiokuDB Vector Index
//!
//! Exact similarity search and scalar quantization for embedding vectors.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Vector Index Layer                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                              │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │  │    SIMD     │    │    Rank     │    │  Quantize   │     │
//! │  │   Cosine    │───>│  (Exact,    │    │   (SQ8,     │     │
//! │  │ (AVX2/NEON) │    │   top-k)    │    │ per-vector) │     │
//! │  └─────────────┘    └─────────────┘    └─────────────┘     │
//! │                                                              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `simd`: SIMD-accelerated dot product and cosine similarity
//! - `rank`: brute-force scoring with deterministic ordering
//! - `quantize`: f32 <-> int8 codec with a half-step error bound

pub mod quantize;
pub mod rank;
pub mod simd;

pub use quantize::{dequantize, quantize, QuantizedVector};
pub use rank::{compare_hits, rank, top_k};
pub use simd::{cosine_similarity, dot_product};
