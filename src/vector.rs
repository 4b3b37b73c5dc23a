//! Vector helpers - validation, similarity and on-disk encoding of embeddings

use crate::{Error, Result};

/// Check that `vector` has exactly `dimensions` finite components.
pub fn validate(vector: &[f32], dimensions: usize) -> Result<()> {
    if vector.len() != dimensions {
        return Err(Error::invalid_input(format!(
            "vector dimension mismatch: expected {}, got {}",
            dimensions,
            vector.len()
        )));
    }
    if let Some(pos) = vector.iter().position(|v| !v.is_finite()) {
        return Err(Error::invalid_input(format!(
            "vector component {} is not a finite number",
            pos
        )));
    }
    Ok(())
}

/// Cosine similarity in [-1, 1]; zero for empty, mismatched or zero-norm input.
///
/// Accumulates in f64 so large finite components cannot overflow.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot_product, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let cosine = dot_product / (norm_a.sqrt() * norm_b.sqrt());
    if cosine.is_finite() {
        cosine.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Search similarity in [0, 1] where 1 means identical direction.
pub fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let score = cosine_similarity(a, b);
    if score.is_nan() { 0.0 } else { score.clamp(0.0, 1.0) }
}

/// Little-endian f32 blob, bit-exact.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode(blob: &[u8]) -> Result<Vec<f32>> {
    let chunks = blob.chunks_exact(4);
    if !chunks.remainder().is_empty() {
        return Err(Error::Internal(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(chunks
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn test_dimension_mismatch_is_invalid_input() {
        let err = validate(&[0.1, 0.2], 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(validate(&[0.1, 0.2, 0.3], 3).is_ok());
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = validate(&[0.1, f32::NAN, 0.3], 3).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn test_similarity_bounds() {
        let a = [1.0, 0.0, 0.0];
        assert!((similarity(&a, &[2.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(similarity(&a, &[0.0, 1.0, 0.0]), 0.0);
        assert_eq!(similarity(&a, &[-1.0, 0.0, 0.0]), 0.0);
        assert_eq!(similarity(&a, &[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_large_magnitudes_do_not_overflow() {
        let big = [1e20f32, 1e20, 0.0];
        assert!((similarity(&big, &[1.0, 1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((similarity(&big, &big) - 1.0).abs() < 1e-6);

        let score = similarity(&big, &[f32::MAX, 0.0, 0.0]);
        assert!((score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);

        let tiny = [f32::MIN_POSITIVE, 0.0, 0.0];
        assert!((similarity(&tiny, &[1.0, 0.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_blob_is_bit_exact() {
        let vector = vec![0.1f32, -3.25, f32::MIN_POSITIVE, 1e-30];
        let decoded = decode(&encode(&vector)).unwrap();
        let bits = |v: &[f32]| v.iter().map(|f| f.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&decoded), bits(&vector));
    }

    #[test]
    fn test_truncated_blob_is_internal_error() {
        let err = decode(&[0, 0, 128]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
