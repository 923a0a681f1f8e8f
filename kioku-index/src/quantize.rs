//! # Scalar Quantization (SQ8)
//!
//! Per-vector linear mapping from f32 components to int8 codes.
//!
//! ```text
//!   min ─────────────── offset ─────────────── max
//!  -127 ·····························0···························· +127
//!
//!   code = round((x - offset) / scale)      x' = offset + code * scale
//! ```
//!
//! `offset` sits at the midpoint of the vector's own range and `scale` is chosen
//! so that both ends land inside `-127..=127`, which keeps the code range
//! symmetric (no `-128`).
//!
//! Both parameters are whole multiples of a power-of-two grid of twice the f32
//! ulp of the largest magnitude in the vector. Every `x'` is then an exact f32,
//! and picking the nearest code bounds the reconstruction error by `scale / 2`
//! with no rounding slack on top.
//!
//! A constant vector has no range: it gets `scale = 1`, `offset = value` and all
//! codes `0`, which reconstructs the value exactly.

use serde::{Deserialize, Serialize};

/// Largest code magnitude
pub const CODE_MAX: i8 = 127;
/// Smallest code (symmetric with `CODE_MAX`)
pub const CODE_MIN: i8 = -127;

/// Quantized representation of a vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedVector {
    pub codes: Vec<i8>,
    pub scale: f32,
    pub offset: f32,
}

impl QuantizedVector {
    /// Number of components
    pub fn dimension(&self) -> usize {
        self.codes.len()
    }

    /// Upper bound on `|x - x'|` for any component
    pub fn max_error(&self) -> f32 {
        self.scale * 0.5
    }

    /// Memory used by codes and parameters
    pub fn size_bytes(&self) -> usize {
        self.codes.len() + 2 * std::mem::size_of::<f32>()
    }

    /// Reconstruct an approximation of the original vector
    pub fn dequantize(&self) -> Vec<f32> {
        dequantize(&self.codes, self.scale, self.offset)
    }
}

/// Quantize a vector using its own min/max.
///
/// Components are expected to be finite; the store rejects anything else
/// before it gets here.
pub fn quantize(vector: &[f32]) -> QuantizedVector {
    let Some((min, max)) = min_max(vector) else {
        return QuantizedVector { codes: Vec::new(), scale: 1.0, offset: 0.0 };
    };

    if min == max {
        return QuantizedVector {
            codes: vec![0; vector.len()],
            scale: 1.0,
            offset: min,
        };
    }

    let (scale, offset) = params_for_range(min, max);
    let codes = vector
        .iter()
        .map(|&x| quantize_scalar(x, scale, offset))
        .collect();

    QuantizedVector { codes, scale, offset }
}

/// Dequantize codes back to f32
pub fn dequantize(codes: &[i8], scale: f32, offset: f32) -> Vec<f32> {
    codes
        .iter()
        .map(|&q| dequantize_scalar(q, scale, offset))
        .collect()
}

/// Quantize a single value to the code whose reconstruction is nearest
#[inline]
pub fn quantize_scalar(value: f32, scale: f32, offset: f32) -> i8 {
    let q = ((value as f64 - offset as f64) / scale as f64).round();
    let guess = q.clamp(CODE_MIN as f64, CODE_MAX as f64) as i8;

    // the f64 division can round a half-way value to the wrong side
    let distance = |code: i8| (value as f64 - dequantize_scalar(code, scale, offset) as f64).abs();
    [guess.saturating_sub(1).max(CODE_MIN), guess.saturating_add(1)]
        .into_iter()
        .fold(guess, |best, c| if distance(c) < distance(best) { c } else { best })
}

/// Dequantize a single value
#[inline]
pub fn dequantize_scalar(code: i8, scale: f32, offset: f32) -> f32 {
    let x = offset as f64 + code as f64 * scale as f64;
    // the last code can overshoot ±f32::MAX when the range spans all of f32
    x.clamp(f32::MIN as f64, f32::MAX as f64) as f32
}

fn min_max(vector: &[f32]) -> Option<(f32, f32)> {
    let first = *vector.first()?;
    Some(
        vector
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

/// Pick `(scale, offset)` so every value in `[min, max]` maps into the code range.
///
/// Both come out as whole multiples of `grid`, so `offset + code * scale` is
/// exact in f32 for every code. `scale` is rounded up to the grid, which keeps
/// both endpoints within half a step of the outermost codes.
fn params_for_range(min: f32, max: f32) -> (f32, f32) {
    let (lo, hi) = (min as f64, max as f64);
    let grid = 2.0 * ulp(min.abs().max(max.abs()));

    let mid = lo * 0.5 + hi * 0.5;
    let offset = (mid / grid).trunc() * grid;

    let reach = (hi - offset).max(offset - lo);
    let steps = (reach / CODE_MAX as f64 / grid).ceil().max(1.0);
    ((steps * grid) as f32, offset as f32)
}

/// Spacing of f32 values at the magnitude of a finite `x`
fn ulp(x: f32) -> f64 {
    let exponent = ((x.to_bits() >> 23) & 0xff) as i32;
    // subnormals share the spacing of the smallest normal binade
    2f64.powi(exponent.max(1) - 127 - 23)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_within_bound(original: &[f32], q: &QuantizedVector) {
        let restored = q.dequantize();
        assert_eq!(restored.len(), original.len());
        for (&x, &r) in original.iter().zip(restored.iter()) {
            let err = (x as f64 - r as f64).abs();
            assert!(
                err <= q.max_error() as f64,
                "x={} restored={} err={} bound={}",
                x, r, err, q.max_error()
            );
        }
    }

    #[test]
    fn test_quantization_roundtrip() {
        let original = vec![0.5, -0.5, 1.0, -1.0, 0.0];
        let q = quantize(&original);
        assert_eq!(q.dimension(), 5);
        assert_within_bound(&original, &q);
        // extremes hit the ends of the code range
        assert_eq!(q.codes[2], CODE_MAX);
        assert_eq!(q.codes[3], CODE_MIN);
    }

    #[test]
    fn test_constant_vector_is_exact() {
        let q = quantize(&[5.0, 5.0, 5.0]);
        assert_eq!(q.scale, 1.0);
        assert_eq!(q.offset, 5.0);
        assert_eq!(q.codes, vec![0, 0, 0]);
        assert_eq!(q.dequantize(), vec![5.0, 5.0, 5.0]);
    }

    #[test]
    fn test_constant_negative_and_zero() {
        assert_eq!(quantize(&[-3.25; 4]).dequantize(), vec![-3.25; 4]);
        assert_eq!(quantize(&[0.0; 2]).dequantize(), vec![0.0; 2]);
    }

    #[test]
    fn test_empty_vector() {
        let q = quantize(&[]);
        assert!(q.codes.is_empty());
        assert!(q.dequantize().is_empty());
    }

    #[test]
    fn test_deterministic() {
        let v = vec![0.1, 0.7, -0.3, 2.5];
        assert_eq!(quantize(&v), quantize(&v));
    }

    #[test]
    fn test_extreme_range_does_not_overflow() {
        let v = vec![-f32::MAX, 0.0, f32::MAX];
        let q = quantize(&v);
        assert!(q.scale.is_finite());
        assert_within_bound(&v, &q);
    }

    #[test]
    fn test_narrow_range_at_large_magnitude() {
        // range much smaller than ulp-scale of the midpoint
        let v = vec![1_000_000.0, 1_000_000.125, 1_000_000.0625];
        let q = quantize(&v);
        assert_within_bound(&v, &q);
    }

    #[test]
    fn test_narrow_range_just_above_one() {
        let v = vec![1.0, 1.0000067, 1.0000201];
        let q = quantize(&v);
        assert_within_bound(&v, &q);
    }

    #[test]
    fn test_ranges_of_a_few_ulps() {
        let one = 1.0f32.to_bits();
        for width in 1..=300u32 {
            for start in [0u32, 1, 7, 1000] {
                let lo = f32::from_bits(one + start);
                let hi = f32::from_bits(one + start + width);
                let mid = f32::from_bits(one + start + width / 2);
                let v = vec![lo, mid, hi];
                assert_within_bound(&v, &quantize(&v));

                let neg: Vec<f32> = v.iter().map(|x| -x).collect();
                assert_within_bound(&neg, &quantize(&neg));
            }
        }
    }

    #[test]
    fn test_subnormal_range() {
        let v = vec![f32::from_bits(1), f32::from_bits(5), -f32::from_bits(3), 0.0];
        let q = quantize(&v);
        assert!(q.scale > 0.0);
        assert_within_bound(&v, &q);
    }

    #[test]
    fn test_size_bytes() {
        let q = quantize(&[1.0; 384]);
        assert_eq!(q.size_bytes(), 384 + 8);
    }

    proptest! {
        #[test]
        fn prop_error_within_half_step(v in prop::collection::vec(-1.0e6f32..1.0e6f32, 1..256)) {
            let q = quantize(&v);
            assert_within_bound(&v, &q);
        }

        #[test]
        fn prop_error_within_half_step_any_finite(
            v in prop::collection::vec(prop::num::f32::NORMAL | prop::num::f32::SUBNORMAL | prop::num::f32::ZERO, 1..64)
        ) {
            let q = quantize(&v);
            assert_within_bound(&v, &q);
        }

        #[test]
        fn prop_codes_symmetric_range(v in prop::collection::vec(-10.0f32..10.0f32, 1..64)) {
            let q = quantize(&v);
            prop_assert!(q.codes.iter().all(|&c| c >= CODE_MIN));
        }
    }
}
