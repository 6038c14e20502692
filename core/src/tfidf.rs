use crate::config::{IdfMode, TfScaling};
use crate::index::InvertedIndex;
use crate::{DocId, SparseVector, TermId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-document TF-IDF weights plus the corpus statistics they came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TfIdfVectors {
    pub num_docs: u32,
    pub df: BTreeMap<TermId, u32>,
    pub vectors: BTreeMap<DocId, SparseVector>,
}

impl TfIdfVectors {
    pub fn get(&self, doc_id: DocId) -> Option<&SparseVector> {
        self.vectors.get(&doc_id)
    }

    pub fn len(&self) -> usize { self.vectors.len() }

    pub fn is_empty(&self) -> bool { self.vectors.is_empty() }

    /// Documents whose vector holds at least one weight.
    pub fn non_empty(&self) -> impl Iterator<Item = (DocId, &SparseVector)> + '_ {
        self.vectors.iter().filter(|(_, v)| !v.is_empty()).map(|(&d, v)| (d, v))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Vectorizer {
    pub tf: TfScaling,
    pub idf: IdfMode,
}

impl Vectorizer {
    pub fn new(tf: TfScaling, idf: IdfMode) -> Self {
        Self { tf, idf }
    }

    /// Inverse document frequency; zero for terms no document contains.
    pub fn idf(&self, num_docs: u32, df: u32) -> f64 {
        if df == 0 || num_docs == 0 {
            return 0.0;
        }
        let ratio = num_docs as f64 / df as f64;
        match self.idf {
            IdfMode::Plain => ratio.ln(),
            IdfMode::Smoothed => (1.0 + ratio).ln(),
        }
    }

    pub fn tf_weight(&self, tf: u32) -> f64 {
        if tf == 0 {
            return 0.0;
        }
        match self.tf {
            TfScaling::Raw => tf as f64,
            TfScaling::Log => 1.0 + (tf as f64).ln(),
        }
    }

    /// Weight every document in `index`. Zero weights are left out, so a
    /// term present in every document vanishes under plain idf.
    pub fn vectorize(&self, index: &InvertedIndex) -> TfIdfVectors {
        let num_docs = index.num_docs() as u32;
        let df: BTreeMap<TermId, u32> = index
            .terms()
            .map(|(term_id, plist)| (term_id, plist.len() as u32))
            .collect();
        let idf: BTreeMap<TermId, f64> =
            df.iter().map(|(&t, &d)| (t, self.idf(num_docs, d))).collect();

        let mut vectors = BTreeMap::new();
        for (doc_id, counts) in index.documents() {
            let mut weights = SparseVector::new();
            for (&term_id, &tf) in counts {
                let w = self.tf_weight(tf) * idf.get(&term_id).copied().unwrap_or(0.0);
                if w != 0.0 {
                    weights.insert(term_id, w);
                }
            }
            vectors.insert(doc_id, weights);
        }
        tracing::debug!(num_docs, num_terms = df.len(), "computed tf-idf vectors");
        TfIdfVectors { num_docs, df, vectors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> InvertedIndex {
        // terms: 0 = the, 1 = cat, 2 = sat, 3 = dog
        let mut idx = InvertedIndex::new();
        idx.add_document(0, [(0, 1), (1, 2), (2, 1)]);
        idx.add_document(1, [(0, 1), (1, 1)]);
        idx.add_document(2, [(0, 3), (3, 1)]);
        idx
    }

    #[test]
    fn idf_is_non_negative() {
        let v = Vectorizer::default();
        for df in 1..=10 {
            assert!(v.idf(10, df) >= 0.0);
        }
        assert_eq!(v.idf(10, 0), 0.0);
        assert_eq!(v.idf(0, 0), 0.0);
    }

    #[test]
    fn weights_are_raw_tf_times_idf() {
        let vecs = Vectorizer::default().vectorize(&corpus());
        assert_eq!(vecs.num_docs, 3);
        assert_eq!(vecs.df.get(&1), Some(&2));
        let a = vecs.get(0).unwrap();
        let expected_cat = 2.0 * (3.0f64 / 2.0).ln();
        assert!((a[&1] - expected_cat).abs() < 1e-12);
        assert!((a[&2] - 3.0f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn ubiquitous_terms_drop_out_under_plain_idf() {
        let vecs = Vectorizer::default().vectorize(&corpus());
        assert!(vecs.vectors.values().all(|v| !v.contains_key(&0)));

        let smoothed = Vectorizer::new(TfScaling::Raw, IdfMode::Smoothed).vectorize(&corpus());
        assert!(smoothed.vectors.values().all(|v| v.contains_key(&0)));
    }

    #[test]
    fn vector_terms_are_document_terms() {
        let idx = corpus();
        let vecs = Vectorizer::new(TfScaling::Log, IdfMode::Smoothed).vectorize(&idx);
        for (doc_id, counts) in idx.documents() {
            let v = vecs.get(doc_id).unwrap();
            let vk: Vec<_> = v.keys().collect();
            let ck: Vec<_> = counts.keys().collect();
            assert_eq!(vk, ck);
        }
    }

    #[test]
    fn zero_term_document_gets_empty_vector() {
        let mut idx = corpus();
        idx.add_document(9, std::iter::empty());
        let vecs = Vectorizer::default().vectorize(&idx);
        assert_eq!(vecs.num_docs, 4);
        assert!(vecs.get(9).unwrap().is_empty());
        assert_eq!(vecs.non_empty().count(), 3);
    }
}
