//! Embedding vectors stored as little-endian f32 blobs in SQLite.
//!
//! No vector extension — the candidate sets here (active memories, notes)
//! are small enough that a linear L2 scan in process is faster than the
//! round-trip to an external index would be.

/// Encode an f32 vector as a little-endian byte blob.
pub fn encode(vec: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode a blob back into an f32 vector. Trailing partial floats are
/// dropped rather than erroring — a corrupt row should not poison retrieval.
pub fn decode(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Euclidean (L2) distance. Vectors of unequal length compare over the
/// shorter prefix; the mismatch is logged upstream when models change.
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Rank `candidates` (id, vector) by L2 distance to `query`, ascending,
/// truncated to `top_k`.
pub fn rank_by_distance(query: &[f32], candidates: Vec<(i64, Vec<f32>)>, top_k: usize) -> Vec<(i64, f32)> {
    let mut ranked: Vec<(i64, f32)> = candidates
        .into_iter()
        .map(|(id, v)| (id, l2_distance(query, &v)))
        .collect();
    ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(top_k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(decode(&encode(&v)), v);
    }

    #[test]
    fn decode_drops_trailing_partial() {
        let mut blob = encode(&[1.0, 2.0]);
        blob.push(0xAB);
        assert_eq!(decode(&blob), vec![1.0, 2.0]);
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = vec![1.0, 2.0, 3.0];
        assert_eq!(l2_distance(&v, &v), 0.0);
    }

    #[test]
    fn ranking_is_ascending_and_truncated() {
        let query = vec![0.0, 0.0];
        let cands = vec![
            (1, vec![3.0, 4.0]), // distance 5
            (2, vec![1.0, 0.0]), // distance 1
            (3, vec![0.0, 2.0]), // distance 2
        ];
        let ranked = rank_by_distance(&query, cands, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].0, 2);
        assert_eq!(ranked[1].0, 3);
    }
}
