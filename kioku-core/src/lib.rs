//! # KiokuDB Core
//!
//! This crate provides the fundamental building blocks for KiokuDB:
//! - Error types
//! - Configuration
//! - Cryptographic envelope for encrypted store files
//! - Operation metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   kioku-core                    │
//! ├─────────────────────────────────────────────────┤
//! │  • types    - Search hits, input validation    │
//! │  • error    - Error handling                   │
//! │  • config   - Store / persistence / logging    │
//! │  • crypto   - CRC32, PBKDF2, AES-256-GCM       │
//! │  • metrics  - Operation counters               │
//! └─────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod metrics;
pub mod types;

// Re-export commonly used types
pub use config::{Config, LoggingConfig, PersistenceConfig, StoreConfig};
pub use error::{Error, Result};
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use types::SearchHit;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
