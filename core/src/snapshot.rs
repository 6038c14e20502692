//! One published, internally consistent view of the index.

use crate::builder::SourceDocument;
use crate::index::InvertedIndex;
use crate::tfidf::{TfIdfVectors, Vectorizer};
use crate::tokenizer::tokenize;
use crate::vocab::{DocumentRegistry, Vocabulary};
use crate::{DocId, TermId};
use std::collections::BTreeMap;

/// Registry, vocabulary, postings and vectors from a single epoch/revision.
///
/// Snapshots are immutable once published; writers clone, modify and
/// publish a replacement.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub epoch: u64,
    pub revision: u64,
    pub registry: DocumentRegistry,
    pub vocabulary: Vocabulary,
    pub index: InvertedIndex,
    pub vectors: TfIdfVectors,
    pub vectorizer: Vectorizer,
}

impl Snapshot {
    pub fn empty(vectorizer: Vectorizer) -> Self {
        Self { vectorizer, ..Self::default() }
    }

    pub fn num_docs(&self) -> usize { self.registry.len() }

    pub fn is_empty(&self) -> bool { self.registry.is_empty() }

    /// Tokenize `doc` and replace whatever was indexed under its slug.
    /// Vectors are left stale; call [`Snapshot::revectorize`] afterwards.
    pub fn upsert_document(&mut self, doc: &SourceDocument) -> DocId {
        let doc_id = self.registry.assign_document_id(&doc.slug);
        self.registry.set_title(doc_id, &doc.title);
        // ids are handed out in token order so rebuilds are reproducible
        let mut counts: BTreeMap<TermId, u32> = BTreeMap::new();
        for token in tokenize(&doc.raw_text) {
            *counts.entry(self.vocabulary.assign_term_id(&token)).or_insert(0) += 1;
        }
        if counts.is_empty() {
            tracing::debug!(slug = %doc.slug, "indexing zero-term document");
        }
        self.index.add_document(doc_id, counts);
        doc_id
    }

    /// Remove `slug` from registry and postings. Vectors are left stale.
    pub fn remove_document(&mut self, slug: &str) -> Option<DocId> {
        let doc_id = self.registry.remove(slug)?;
        self.index.remove_document(doc_id);
        Some(doc_id)
    }

    pub fn revectorize(&mut self) {
        self.vectors = self.vectorizer.vectorize(&self.index);
    }

    /// Re-register every registry document with the index so zero-term
    /// documents, which have no postings on disk, count towards N again.
    pub(crate) fn reconcile_documents(&mut self) {
        let ids: Vec<DocId> = self.registry.doc_ids().collect();
        for doc_id in ids {
            self.index.ensure_document(doc_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::term_counts;

    fn doc(slug: &str, text: &str) -> SourceDocument {
        SourceDocument::new(slug, text, slug)
    }

    #[test]
    fn posting_tf_matches_token_count() {
        let mut snap = Snapshot::default();
        let text = "Rust rust RUST, borrow checker; borrow!";
        let id = snap.upsert_document(&doc("r", text));
        let tokens = tokenize(text);
        for (term, expected) in term_counts(&tokens) {
            let term_id = snap.vocabulary.resolve_term(term).unwrap();
            assert_eq!(snap.index.term_frequency(term_id, id), expected);
        }
    }

    #[test]
    fn upsert_keeps_ids_and_adds_terms() {
        let mut snap = Snapshot::default();
        let a = snap.upsert_document(&doc("a", "one two"));
        let b = snap.upsert_document(&doc("b", "two three"));
        let two = snap.vocabulary.resolve_term("two").unwrap();

        let a2 = snap.upsert_document(&doc("a", "four"));
        assert_eq!(a, a2);
        assert_eq!(snap.vocabulary.resolve_term("two"), Some(two));
        assert!(snap.vocabulary.resolve_term("four").is_some());
        let docs: Vec<_> = snap.index.postings(two).iter().map(|p| p.doc_id).collect();
        assert_eq!(docs, vec![b]);
    }

    #[test]
    fn remove_then_revectorize() {
        let mut snap = Snapshot::default();
        snap.upsert_document(&doc("a", "cat"));
        snap.upsert_document(&doc("b", "dog"));
        snap.revectorize();
        assert_eq!(snap.vectors.len(), 2);

        assert!(snap.remove_document("a").is_some());
        assert!(snap.remove_document("a").is_none());
        snap.revectorize();
        assert_eq!(snap.vectors.len(), 1);
        assert_eq!(snap.num_docs(), 1);
    }
}
