//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait describing the external
//! embedding backend, plus the pure helpers that define the embedding wire
//! format and the similarity measure used by search.
//!
//! Concrete provider implementations (OpenAI-compatible HTTP) live in the
//! `embedstore` app crate. The core only consumes their output.

use crate::error::{Result, StoreError};

/// Bytes per stored vector component (`f32`).
pub const COMPONENT_SIZE: usize = std::mem::size_of::<f32>();

/// Trait for embedding providers.
///
/// Implementations are created by the application and consulted for the
/// model identifier recorded on each part and the expected vector width.
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes with no header or padding.
///
/// # Example
///
/// ```rust
/// use embedstore_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob).unwrap(), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * COMPONENT_SIZE);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]. Fails with [`StoreError::MalformedVector`] when
/// the buffer length is not a multiple of four.
pub fn blob_to_vec(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % COMPONENT_SIZE != 0 {
        return Err(StoreError::MalformedVector(blob.len()));
    }
    Ok(blob
        .chunks_exact(COMPONENT_SIZE)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Number of components a BLOB of `len` bytes holds.
pub fn components_in(len: usize) -> usize {
    len / COMPONENT_SIZE
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `dot(a, b) / (|a| × |b|)`, clamped to `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Sums are accumulated in `f64` so `cosine_similarity(v, v)` lands on
/// `1.0` for ordinary vectors and the result is exactly symmetric.
///
/// If either vector is all zeros the result is `NaN`; callers must drop NaN
/// scores before ranking. Vectors of different lengths fail with
/// [`StoreError::DimensionMismatch`].
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(StoreError::DimensionMismatch {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok((sim as f32).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MIN_POSITIVE, f32::MAX];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob).unwrap();
        assert_eq!(
            vec.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            restored.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_blob_layout_is_little_endian() {
        let blob = vec_to_blob(&[1.0]);
        assert_eq!(blob, vec![0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(components_in(blob.len()), 1);
    }

    #[test]
    fn test_blob_bad_length() {
        let err = blob_to_vec(&[0u8; 7]).unwrap_err();
        assert!(matches!(err, StoreError::MalformedVector(7)));
        assert!(blob_to_vec(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v).unwrap();
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        let sim = cosine_similarity(&a, &b).unwrap();
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_symmetric_and_bounded() {
        let a = vec![0.3, -1.7, 2.2, 9.0];
        let b = vec![-4.1, 0.25, 0.5, 3.0];
        let ab = cosine_similarity(&a, &b).unwrap();
        let ba = cosine_similarity(&b, &a).unwrap();
        assert_eq!(ab, ba);
        assert!((-1.0..=1.0).contains(&ab));
    }

    #[test]
    fn test_cosine_zero_vector_is_nan() {
        let sim = cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).unwrap();
        assert!(sim.is_nan());
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        let err = cosine_similarity(&a, &b).unwrap_err();
        assert!(matches!(
            err,
            StoreError::DimensionMismatch {
                expected: 2,
                actual: 1
            }
        ));
    }
}
