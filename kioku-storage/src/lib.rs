//! # KiokuDB Storage
//!
//! The embedding store and everything it writes to disk.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Write Path                             │
//! │                                                             │
//! │  add_vector ──> validate ──> quantize? ──> RwLock<State>    │
//! │                                                             │
//! │  save ──> encode (KVS1 + crc32) ──> seal? ──> temp + rename │
//! └─────────────────────────────────────────────────────────────┘
//!
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Read Path                              │
//! │                                                             │
//! │  search ──> score every record ──> top-k (score, id)        │
//! │                                                             │
//! │  load ──> open? ──> decode ──> swap state under write lock  │
//! │                                                             │
//! │  FlatVectorStore ──> mmap KVF1 snapshot ──> search in place │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod flat;
pub mod persistence;
pub mod record;
pub mod store;

pub use flat::FlatVectorStore;
pub use record::{Embedding, StoreState};
pub use store::EmbeddingStore;
