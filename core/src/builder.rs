use crate::snapshot::Snapshot;
use crate::tfidf::Vectorizer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A page as handed over by the page store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub slug: String,
    pub raw_text: String,
    pub title: String,
    #[serde(default)]
    pub frontmatter: BTreeMap<String, String>,
}

impl SourceDocument {
    pub fn new(slug: &str, raw_text: &str, title: &str) -> Self {
        Self {
            slug: slug.to_string(),
            raw_text: raw_text.to_string(),
            title: title.to_string(),
            frontmatter: BTreeMap::new(),
        }
    }
}

/// Build a fresh snapshot for `epoch` from scratch: new vocabulary, new
/// registry, postings and vectors for every supplied document.
///
/// Documents are processed in the order given; a repeated slug replaces the
/// earlier copy. Empty text yields a zero-term document, never an error.
pub fn build_snapshot<I>(docs: I, epoch: u64, vectorizer: Vectorizer) -> Snapshot
where
    I: IntoIterator<Item = SourceDocument>,
{
    let mut snapshot = Snapshot::empty(vectorizer);
    snapshot.epoch = epoch;
    for doc in docs {
        if doc.slug.is_empty() {
            tracing::warn!(title = %doc.title, "skipping document without slug");
            continue;
        }
        let doc_id = snapshot.upsert_document(&doc);
        tracing::debug!(slug = %doc.slug, doc_id, "indexed document");
    }
    snapshot.revectorize();
    tracing::info!(
        epoch,
        num_docs = snapshot.num_docs(),
        num_terms = snapshot.vocabulary.len(),
        "built index snapshot"
    );
    snapshot
}
