//! Vector distance helpers (spec §4.9). The Postgres backend delegates this
//! to `pgvector`'s `<=>` operator; the SQLite test backend scores in Rust.

/// Cosine distance: `1 - cosine_similarity`. Matches `pgvector`'s `<=>`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    let cosine_similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    (1.0 - cosine_similarity).clamp(0.0, 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![1.0, 2.0, 3.0];
        assert!(cosine_distance(&v, &v) < 1e-5);
    }

    #[test]
    fn orthogonal_vectors_have_unit_distance() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((cosine_distance(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_vector_is_maximally_distant() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_distance(&a, &b), 1.0);
    }
}
