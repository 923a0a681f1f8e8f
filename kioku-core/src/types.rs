//! # Core Types
//!
//! Value types that cross crate boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One ranked result from a similarity search.
///
/// Always an owned copy; nothing in a hit points back into the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
}

impl SearchHit {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self { id: id.into(), score }
    }
}

impl fmt::Display for SearchHit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{:.6}", self.id, self.score)
    }
}

/// Check that every component is finite
pub fn validate_components(vector: &[f32]) -> crate::Result<()> {
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(crate::Error::invalid_input(format!(
            "component {} is not finite ({})",
            pos, vector[pos]
        )));
    }
    Ok(())
}
