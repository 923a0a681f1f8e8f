//! Stored representation of vectors and the state a store owns.

use std::borrow::Cow;
use std::collections::BTreeMap;

use kioku_index::{quantize, QuantizedVector};

/// One stored embedding, in whichever representation the store uses
#[derive(Debug, Clone, PartialEq)]
pub enum Embedding {
    Full(Vec<f32>),
    Quantized(QuantizedVector),
}

impl Embedding {
    /// Encode `vector` for a store in the given mode
    pub fn encode(vector: &[f32], quantized: bool) -> Self {
        if quantized {
            Embedding::Quantized(quantize(vector))
        } else {
            Embedding::Full(vector.to_vec())
        }
    }

    pub fn dimension(&self) -> usize {
        match self {
            Embedding::Full(v) => v.len(),
            Embedding::Quantized(q) => q.dimension(),
        }
    }

    pub fn is_quantized(&self) -> bool {
        matches!(self, Embedding::Quantized(_))
    }

    /// Component values; borrowed for full precision, reconstructed for quantized
    pub fn values(&self) -> Cow<'_, [f32]> {
        match self {
            Embedding::Full(v) => Cow::Borrowed(v.as_slice()),
            Embedding::Quantized(q) => Cow::Owned(q.dequantize()),
        }
    }
}

/// Everything a store holds, and everything that gets persisted.
///
/// `records` is ordered by id so encoding the same state always produces the
/// same bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    pub quantized: bool,
    /// `0` until the first insert
    pub dimension: usize,
    pub records: BTreeMap<String, Embedding>,
}

impl StoreState {
    pub fn new(quantized: bool) -> Self {
        Self {
            quantized,
            dimension: 0,
            records: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_modes() {
        let full = Embedding::encode(&[1.0, 2.0], false);
        assert!(!full.is_quantized());
        assert_eq!(full.values().as_ref(), &[1.0, 2.0]);

        let quant = Embedding::encode(&[1.0, 2.0], true);
        assert!(quant.is_quantized());
        assert_eq!(quant.dimension(), 2);
    }
}
