//! # SIMD-Accelerated Similarity
//!
//! Dot product and cosine similarity using CPU intrinsics where available.
//!
//! ## Implementation Strategy
//! 1. Detect CPU features at runtime
//! 2. Dispatch to fastest available: AVX2+FMA (x86_64), NEON (aarch64), scalar
//!
//! Cosine is built from three dot products, so every path shares one kernel.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

/// Compute dot product of two vectors using best available SIMD
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return unsafe { dot_product_avx2_fma(a, b) };
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        return unsafe { dot_product_neon(a, b) };
    }

    #[allow(unreachable_code)]
    dot_product_scalar(a, b)
}

/// Cosine similarity: `dot(a, b) / (‖a‖ · ‖b‖)`, in `[-1, 1]`.
///
/// Returns `0.0` when either vector is all zeros. Inputs whose squared
/// magnitudes overflow or underflow f32 are rescored in f64.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let dot = dot_product(a, b);
    let norm_a = dot_product(a, a);
    let norm_b = dot_product(b, b);

    // subnormal or overflowing squares are rescored in f64
    let in_range = |n: f32| n.is_finite() && n >= f32::MIN_POSITIVE;
    let denom = norm_a.sqrt() * norm_b.sqrt();
    let score = if dot.is_finite() && in_range(norm_a) && in_range(norm_b) && in_range(denom) {
        dot / denom
    } else {
        cosine_similarity_f64(a, b)
    };

    finish_score(score)
}

/// Clamp rounding spill into `[-1, 1]` and fold `-0.0` into `0.0` so equal
/// scores compare equal under `total_cmp`.
#[inline]
fn finish_score(score: f32) -> f32 {
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(-1.0, 1.0) + 0.0
}

fn cosine_similarity_f64(a: &[f32], b: &[f32]) -> f32 {
    // Scale by the largest magnitude first so the squares stay finite.
    let max = a
        .iter()
        .chain(b.iter())
        .fold(0.0f64, |m, &x| m.max((x as f64).abs()));
    if max == 0.0 {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64 / max, y as f64 / max);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        (dot / denom) as f32
    } else {
        0.0
    }
}

// ============================================================================
// Scalar implementation (fallback)
// ============================================================================

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ============================================================================
// AVX2 + FMA implementation (256-bit, 8 floats at a time)
// ============================================================================

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn dot_product_avx2_fma(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / 8;

    let mut sum = _mm256_setzero_ps();
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let offset = i * 8;
        let va = _mm256_loadu_ps(a_ptr.add(offset));
        let vb = _mm256_loadu_ps(b_ptr.add(offset));
        sum = _mm256_fmadd_ps(va, vb, sum);
    }

    // Horizontal sum: fold the high half onto the low half, then 4 -> 1
    let low = _mm256_castps256_ps128(sum);
    let high = _mm256_extractf128_ps(sum, 1);
    let quad = _mm_add_ps(low, high);
    let mut lanes = [0.0f32; 4];
    _mm_storeu_ps(lanes.as_mut_ptr(), quad);
    let mut result = (lanes[0] + lanes[1]) + (lanes[2] + lanes[3]);

    for i in (chunks * 8)..n {
        result += a[i] * b[i];
    }
    result
}

// ============================================================================
// NEON implementation (128-bit, 4 floats at a time)
// ============================================================================

#[cfg(target_arch = "aarch64")]
unsafe fn dot_product_neon(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let chunks = n / 4;

    let mut sum = vdupq_n_f32(0.0);
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    for i in 0..chunks {
        let offset = i * 4;
        let va = vld1q_f32(a_ptr.add(offset));
        let vb = vld1q_f32(b_ptr.add(offset));
        sum = vfmaq_f32(sum, va, vb);
    }

    let mut result = vaddvq_f32(sum);
    for i in (chunks * 4)..n {
        result += a[i] * b[i];
    }
    result
}
