use crate::tfidf::TfIdfVectors;
use crate::{DocId, SparseVector};
use std::cmp::Ordering;

pub fn dot(u: &SparseVector, v: &SparseVector) -> f64 {
    // walk the shorter map, look up in the longer
    let (small, large) = if u.len() <= v.len() { (u, v) } else { (v, u) };
    small
        .iter()
        .filter_map(|(t, a)| large.get(t).map(|b| a * b))
        .sum()
}

pub fn norm(v: &SparseVector) -> f64 {
    v.values().map(|w| w * w).sum::<f64>().sqrt()
}

/// Cosine similarity; 0 when either side has no magnitude.
pub fn cosine(u: &SparseVector, v: &SparseVector) -> f64 {
    let nu = norm(u);
    let nv = norm(v);
    if nu == 0.0 || nv == 0.0 {
        return 0.0;
    }
    // clamp away rounding drift above 1
    (dot(u, v) / (nu * nv)).min(1.0)
}

/// Squared euclidean distance over the union of both key sets.
pub fn squared_distance(u: &SparseVector, v: &SparseVector) -> f64 {
    let mut total = 0.0;
    for (t, a) in u {
        let b = v.get(t).copied().unwrap_or(0.0);
        total += (a - b) * (a - b);
    }
    for (t, b) in v {
        if !u.contains_key(t) {
            total += b * b;
        }
    }
    total
}

/// Descending by score, ascending doc id on ties.
pub(crate) fn rank_desc(a: &(DocId, f64), b: &(DocId, f64)) -> Ordering {
    b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then(a.0.cmp(&b.0))
}

/// The `n` documents most similar to `doc_id`, excluding itself.
///
/// Every other document is scored, zero-similarity ones included, so the
/// result is short only when the corpus has fewer than `n + 1` documents.
/// An unknown `doc_id` yields nothing.
pub fn most_similar(vectors: &TfIdfVectors, doc_id: DocId, n: usize) -> Vec<(DocId, f64)> {
    let Some(target) = vectors.get(doc_id) else {
        return Vec::new();
    };
    let mut scored: Vec<(DocId, f64)> = vectors
        .vectors
        .iter()
        .filter(|(&other, _)| other != doc_id)
        .map(|(&other, v)| (other, cosine(target, v)))
        .collect();
    scored.sort_by(rank_desc);
    scored.truncate(n);
    scored
}
