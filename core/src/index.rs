//! Inverted index: term-id -> postings of (document-id, raw term frequency).
//!
//! A forward map of each document's term counts is kept beside the postings
//! so a document can be pulled out of every list it appears in without
//! scanning the whole index. Only the postings are persisted; the forward map
//! is rebuilt on load.

use crate::{DocId, TermId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One (document, term frequency) entry under a term-id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    #[serde(rename = "page_id")]
    pub doc_id: DocId,
    #[serde(rename = "tf")]
    pub term_frequency: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<TermId, Vec<Posting>>", into = "BTreeMap<TermId, Vec<Posting>>")]
pub struct InvertedIndex {
    /// postings sorted by doc_id, at most one per (term, doc)
    postings: BTreeMap<TermId, Vec<Posting>>,
    doc_terms: BTreeMap<DocId, BTreeMap<TermId, u32>>,
}

impl From<BTreeMap<TermId, Vec<Posting>>> for InvertedIndex {
    fn from(raw: BTreeMap<TermId, Vec<Posting>>) -> Self {
        let mut index = InvertedIndex::new();
        for (term_id, plist) in raw {
            for p in plist {
                if p.term_frequency == 0 {
                    continue;
                }
                index.doc_terms.entry(p.doc_id).or_default().insert(term_id, p.term_frequency);
                index.insert_posting(term_id, p);
            }
        }
        index
    }
}

impl From<InvertedIndex> for BTreeMap<TermId, Vec<Posting>> {
    fn from(index: InvertedIndex) -> Self {
        index.postings
    }
}

impl InvertedIndex {
    pub fn new() -> Self { Self::default() }

    /// Replace everything indexed for `doc_id` with `counts`.
    ///
    /// An empty `counts` registers a zero-term document: it is known to the
    /// index but contributes no postings.
    pub fn add_document<I>(&mut self, doc_id: DocId, counts: I)
    where
        I: IntoIterator<Item = (TermId, u32)>,
    {
        self.remove_document(doc_id);
        let mut terms = BTreeMap::new();
        for (term_id, tf) in counts {
            if tf == 0 {
                continue;
            }
            *terms.entry(term_id).or_insert(0) += tf;
        }
        for (&term_id, &tf) in terms.iter() {
            self.insert_posting(term_id, Posting { doc_id, term_frequency: tf });
        }
        self.doc_terms.insert(doc_id, terms);
    }

    /// Drop every posting referencing `doc_id`. Returns whether it was present.
    pub fn remove_document(&mut self, doc_id: DocId) -> bool {
        let Some(terms) = self.doc_terms.remove(&doc_id) else {
            return false;
        };
        for term_id in terms.keys() {
            if let Some(plist) = self.postings.get_mut(term_id) {
                if let Ok(pos) = plist.binary_search_by_key(&doc_id, |p| p.doc_id) {
                    plist.remove(pos);
                }
                if plist.is_empty() {
                    self.postings.remove(term_id);
                }
            }
        }
        true
    }

    fn insert_posting(&mut self, term_id: TermId, posting: Posting) {
        let plist = self.postings.entry(term_id).or_default();
        match plist.binary_search_by_key(&posting.doc_id, |p| p.doc_id) {
            Ok(pos) => plist[pos] = posting,
            Err(pos) => plist.insert(pos, posting),
        }
    }

    pub fn postings(&self, term_id: TermId) -> &[Posting] {
        self.postings.get(&term_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of documents containing `term_id` at least once.
    pub fn document_frequency(&self, term_id: TermId) -> u32 {
        self.postings(term_id).len() as u32
    }

    pub fn term_counts(&self, doc_id: DocId) -> Option<&BTreeMap<TermId, u32>> {
        self.doc_terms.get(&doc_id)
    }

    pub fn term_frequency(&self, term_id: TermId, doc_id: DocId) -> u32 {
        self.doc_terms
            .get(&doc_id)
            .and_then(|terms| terms.get(&term_id))
            .copied()
            .unwrap_or(0)
    }

    pub fn contains_document(&self, doc_id: DocId) -> bool {
        self.doc_terms.contains_key(&doc_id)
    }

    /// Make sure `doc_id` is known, as a zero-term document if it has no postings.
    pub(crate) fn ensure_document(&mut self, doc_id: DocId) {
        self.doc_terms.entry(doc_id).or_default();
    }

    pub fn terms(&self) -> impl Iterator<Item = (TermId, &[Posting])> + '_ {
        self.postings.iter().map(|(&t, p)| (t, p.as_slice()))
    }

    pub fn documents(&self) -> impl Iterator<Item = (DocId, &BTreeMap<TermId, u32>)> + '_ {
        self.doc_terms.iter().map(|(&d, t)| (d, t))
    }

    pub fn num_terms(&self) -> usize { self.postings.len() }

    pub fn num_docs(&self) -> usize { self.doc_terms.len() }

    pub fn is_empty(&self) -> bool { self.postings.is_empty() }
}
