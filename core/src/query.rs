use crate::config::Scoring;
use crate::similarity::rank_desc;
use crate::snapshot::Snapshot;
use crate::tokenizer::tokenize;
use crate::{DocId, TermId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub slug: String,
    pub title: String,
    pub score: f64,
    /// Filled in by whoever owns routing; always `None` from this crate.
    pub url: Option<String>,
}

/// Resolve query tokens against the vocabulary, with multiplicity.
/// Unknown terms are dropped.
pub fn resolve_query(snapshot: &Snapshot, query: &str) -> BTreeMap<TermId, u32> {
    let mut resolved = BTreeMap::new();
    for term in tokenize(query) {
        match snapshot.vocabulary.resolve_term(&term) {
            Some(term_id) => *resolved.entry(term_id).or_insert(0) += 1,
            None => tracing::debug!(%term, "query term not in vocabulary"),
        }
    }
    resolved
}

/// Score every document matching at least one resolved query term.
///
/// `TermFrequency` sums raw counts; `Tfidf` weights each count by the term's
/// idf. Both are sums of non-negative per-term contributions, so adding an
/// occurrence of a matched term never lowers a score.
pub fn score(snapshot: &Snapshot, query: &str, scoring: Scoring) -> Vec<(DocId, f64)> {
    let terms = resolve_query(snapshot, query);
    if terms.is_empty() {
        return Vec::new();
    }
    let num_docs = snapshot.index.num_docs() as u32;
    let mut scores: HashMap<DocId, f64> = HashMap::new();
    for (&term_id, &qtf) in terms.iter() {
        let postings = snapshot.index.postings(term_id);
        let term_weight = match scoring {
            Scoring::TermFrequency => 1.0,
            Scoring::Tfidf => snapshot.vectorizer.idf(num_docs, postings.len() as u32),
        };
        for p in postings {
            let tf = match scoring {
                Scoring::TermFrequency => p.term_frequency as f64,
                Scoring::Tfidf => snapshot.vectorizer.tf_weight(p.term_frequency),
            };
            *scores.entry(p.doc_id).or_insert(0.0) += qtf as f64 * tf * term_weight;
        }
    }
    let mut ranked: Vec<(DocId, f64)> = scores.into_iter().collect();
    ranked.sort_by(rank_desc);
    ranked
}

/// Ranked hits for `query`, titles taken from the registry.
pub fn search(snapshot: &Snapshot, query: &str, scoring: Scoring, limit: Option<usize>) -> Vec<SearchHit> {
    if snapshot.vocabulary.is_empty() || snapshot.index.is_empty() {
        tracing::warn!(epoch = snapshot.epoch, "search against an empty index");
        return Vec::new();
    }
    let ranked = score(snapshot, query, scoring);
    let limit = limit.unwrap_or(usize::MAX);
    ranked
        .into_iter()
        .filter_map(|(doc_id, score)| {
            let slug = snapshot.registry.resolve_document(doc_id)?;
            let title = snapshot.registry.title(doc_id).unwrap_or(slug);
            Some(SearchHit {
                doc_id,
                slug: slug.to_string(),
                title: title.to_string(),
                score,
                url: None,
            })
        })
        .take(limit)
        .collect()
}
