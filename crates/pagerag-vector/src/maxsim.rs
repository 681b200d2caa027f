//! Late-interaction scoring.
//!
//! MaxSim: for every query sub-vector take the best dot product against the
//! document's sub-vectors, then sum. The binary variant works on sign bits and
//! is used only to pick candidates before full-precision rescoring.

use std::cmp::Ordering;

use pagerag_core::types::MultiVector;

pub fn max_sim(query: &MultiVector, doc: &MultiVector) -> f32 {
    query
        .iter()
        .map(|q| {
            doc.iter()
                .map(|d| dot(q, d))
                .fold(f32::NEG_INFINITY, f32::max)
        })
        .filter(|s| s.is_finite())
        .sum()
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Sign-bit packed multivector, one `Vec<u64>` per sub-vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMultiVector {
    dim: usize,
    rows: Vec<Vec<u64>>,
}

impl BinaryMultiVector {
    pub fn quantize(vectors: &MultiVector) -> Self {
        let dim = vectors.first().map_or(0, Vec::len);
        let rows = vectors
            .iter()
            .map(|v| {
                let mut words = vec![0u64; v.len().div_ceil(64)];
                for (i, x) in v.iter().enumerate() {
                    if *x > 0.0 {
                        words[i / 64] |= 1 << (i % 64);
                    }
                }
                words
            })
            .collect();
        Self { dim, rows }
    }

    pub fn len(&self) -> usize { self.rows.len() }

    pub fn is_empty(&self) -> bool { self.rows.is_empty() }

    /// MaxSim over approximate cosines `1 - 2 * hamming / dim`.
    pub fn max_sim(&self, doc: &BinaryMultiVector) -> f32 {
        if self.dim == 0 {
            return 0.0;
        }
        let dim = self.dim as f32;
        self.rows
            .iter()
            .filter_map(|q| {
                doc.rows
                    .iter()
                    .map(|d| {
                        let hamming: u32 = q.iter().zip(d).map(|(a, b)| (a ^ b).count_ones()).sum();
                        1.0 - 2.0 * hamming as f32 / dim
                    })
                    .reduce(f32::max)
            })
            .sum()
    }
}

/// Best first; ties broken by ascending id so equal scores rank stably.
pub fn rank_desc<T>(items: &mut [(f32, u64, T)]) {
    items.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));
}
