//! K-means over TF-IDF vectors, and naming of the resulting clusters.

use crate::config::{ClusterConfig, Metric, Seeding};
use crate::error::IndexError;
use crate::similarity::{cosine, squared_distance};
use crate::snapshot::Snapshot;
use crate::tfidf::TfIdfVectors;
use crate::vocab::Vocabulary;
use crate::{ClusterId, DocId, SparseVector, TermId};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Raw outcome of a k-means run, keyed by document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub assignments: BTreeMap<DocId, ClusterId>,
    pub centroids: Vec<SparseVector>,
    pub iterations: usize,
    pub converged: bool,
}

impl Clustering {
    pub fn members(&self, cluster_id: ClusterId) -> BTreeSet<DocId> {
        self.assignments
            .iter()
            .filter(|(_, &c)| c == cluster_id)
            .map(|(&d, _)| d)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub cluster_id: ClusterId,
    pub name: String,
    /// member slugs, sorted
    pub members: Vec<String>,
    pub centroid: SparseVector,
}

/// Everything a clustering run publishes. Replaces the previous run wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterReport {
    pub epoch: u64,
    pub revision: u64,
    pub clusters: Vec<ClusterSummary>,
    pub page_to_cluster: BTreeMap<String, ClusterId>,
    pub iterations: usize,
    pub converged: bool,
}

impl ClusterReport {
    pub fn cluster_of(&self, slug: &str) -> Option<&ClusterSummary> {
        let id = *self.page_to_cluster.get(slug)?;
        self.clusters.iter().find(|c| c.cluster_id == id)
    }

    pub fn is_empty(&self) -> bool { self.clusters.is_empty() }
}

/// How close two vectors are; larger means closer for both metrics.
fn affinity(metric: Metric, a: &SparseVector, b: &SparseVector) -> f64 {
    match metric {
        Metric::Cosine => cosine(a, b),
        Metric::Euclidean => -squared_distance(a, b),
    }
}

/// Partition every vectorized document into `config.num_clusters` clusters.
///
/// Fails with `InsufficientCorpus` when fewer documents than clusters carry
/// any weight. Empty clusters after convergence are kept as they are.
pub fn kmeans(vectors: &TfIdfVectors, config: &ClusterConfig) -> Result<Clustering, IndexError> {
    let k = config.num_clusters;
    if k == 0 {
        return Err(IndexError::InvalidClusterCount);
    }
    if vectors.is_empty() {
        return Err(IndexError::EmptyCorpus);
    }
    let available = vectors.non_empty().count();
    if available < k {
        return Err(IndexError::InsufficientCorpus { requested: k, available });
    }

    let docs: Vec<(DocId, &SparseVector)> = vectors.vectors.iter().map(|(&d, v)| (d, v)).collect();
    let mut centroids: Vec<SparseVector> = seed(&docs, k, config)
        .into_iter()
        .map(|i| docs[i].1.clone())
        .collect();

    let mut labels: Vec<Option<ClusterId>> = vec![None; docs.len()];
    let mut iterations = 0;
    let mut converged = false;
    while iterations < config.max_iterations.max(1) {
        iterations += 1;
        let mut changed = false;
        for (slot, (_, v)) in labels.iter_mut().zip(docs.iter()) {
            let best = nearest(config.metric, v, &centroids);
            if *slot != Some(best) {
                *slot = Some(best);
                changed = true;
            }
        }
        if !changed {
            converged = true;
            break;
        }
        recompute_centroids(&docs, &labels, &mut centroids);
        tracing::debug!(iteration = iterations, "k-means reassigned documents");
    }

    let assignments = docs
        .iter()
        .zip(labels)
        .map(|((doc_id, _), label)| (*doc_id, label.unwrap_or(0)))
        .collect();
    Ok(Clustering { assignments, centroids, iterations, converged })
}

/// Closest centroid; the lowest cluster id wins ties.
fn nearest(metric: Metric, v: &SparseVector, centroids: &[SparseVector]) -> ClusterId {
    let mut best = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let s = affinity(metric, v, c);
        if s > best_score {
            best = i;
            best_score = s;
        }
    }
    best as ClusterId
}

/// Term-wise mean of each cluster's members. A cluster that lost all its
/// members keeps its previous centroid.
fn recompute_centroids(
    docs: &[(DocId, &SparseVector)],
    labels: &[Option<ClusterId>],
    centroids: &mut [SparseVector],
) {
    let mut sums: Vec<SparseVector> = vec![SparseVector::new(); centroids.len()];
    let mut counts = vec![0usize; centroids.len()];
    for ((_, v), label) in docs.iter().zip(labels) {
        let Some(c) = label.map(|c| c as usize) else { continue };
        counts[c] += 1;
        for (&t, &w) in v.iter() {
            *sums[c].entry(t).or_insert(0.0) += w;
        }
    }
    for (c, (sum, n)) in sums.into_iter().zip(counts).enumerate() {
        if n == 0 {
            continue;
        }
        centroids[c] = sum
            .into_iter()
            .map(|(t, w)| (t, w / n as f64))
            .filter(|(_, w)| *w != 0.0)
            .collect();
    }
}

/// Pick `k` starting documents (indices into `docs`) among the non-empty ones.
/// Distinct vectors are preferred; duplicates only fill remaining slots.
fn seed(docs: &[(DocId, &SparseVector)], k: usize, config: &ClusterConfig) -> Vec<usize> {
    let candidates: Vec<usize> = (0..docs.len()).filter(|&i| !docs[i].1.is_empty()).collect();
    let mut chosen: Vec<usize> = Vec::with_capacity(k);
    match config.seeding {
        Seeding::FarthestFirst => {
            chosen.push(candidates[0]);
            while chosen.len() < k {
                let mut pick: Option<(usize, f64)> = None;
                for &i in &candidates {
                    if chosen.iter().any(|&c| docs[c].1 == docs[i].1) {
                        continue;
                    }
                    let closest = chosen
                        .iter()
                        .map(|&c| affinity(config.metric, docs[i].1, docs[c].1))
                        .fold(f64::NEG_INFINITY, f64::max);
                    if pick.map_or(true, |(_, s)| closest < s) {
                        pick = Some((i, closest));
                    }
                }
                match pick {
                    Some((i, _)) => chosen.push(i),
                    None => break,
                }
            }
        }
        Seeding::Random { seed } => {
            let mut order = candidates.clone();
            order.shuffle(&mut StdRng::seed_from_u64(seed));
            for &i in &order {
                if chosen.len() == k {
                    break;
                }
                if !chosen.iter().any(|&c| docs[c].1 == docs[i].1) {
                    chosen.push(i);
                }
            }
        }
    }
    for &i in &candidates {
        if chosen.len() == k {
            break;
        }
        if !chosen.contains(&i) {
            chosen.push(i);
        }
    }
    chosen
}

/// Top `n` terms of a centroid by weight, heaviest first, ties by term id.
pub fn top_terms(centroid: &SparseVector, n: usize) -> Vec<TermId> {
    let mut terms: Vec<(TermId, f64)> = centroid
        .iter()
        .filter(|(_, &w)| w > 0.0)
        .map(|(&t, &w)| (t, w))
        .collect();
    terms.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then(a.0.cmp(&b.0)));
    terms.into_iter().take(n).map(|(t, _)| t).collect()
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn placeholder_name(cluster_id: ClusterId) -> String {
    format!("Cluster {cluster_id}")
}

/// "Term - Term - Term" from the centroid's heaviest terms.
pub fn cluster_name(
    cluster_id: ClusterId,
    centroid: &SparseVector,
    member_count: usize,
    vocabulary: &Vocabulary,
    num_top_terms: usize,
) -> String {
    if member_count == 0 {
        return placeholder_name(cluster_id);
    }
    let words: Vec<String> = top_terms(centroid, num_top_terms)
        .into_iter()
        .map(|t| capitalize(vocabulary.term(t).unwrap_or("unknown")))
        .collect();
    if words.is_empty() {
        return placeholder_name(cluster_id);
    }
    words.join(" - ")
}

/// Cluster the snapshot's vectors and resolve ids to slugs and names.
pub fn run_clustering(snapshot: &Snapshot, config: &ClusterConfig) -> Result<ClusterReport, IndexError> {
    let clustering = kmeans(&snapshot.vectors, config)?;
    let mut clusters = Vec::with_capacity(clustering.centroids.len());
    let mut page_to_cluster = BTreeMap::new();
    for (i, centroid) in clustering.centroids.iter().enumerate() {
        let cluster_id = i as ClusterId;
        let member_ids = clustering.members(cluster_id);
        let mut members: Vec<String> = member_ids
            .iter()
            .filter_map(|&d| snapshot.registry.resolve_document(d))
            .map(str::to_string)
            .collect();
        members.sort();
        for slug in &members {
            page_to_cluster.insert(slug.clone(), cluster_id);
        }
        let name = cluster_name(
            cluster_id,
            centroid,
            member_ids.len(),
            &snapshot.vocabulary,
            config.num_top_terms,
        );
        clusters.push(ClusterSummary { cluster_id, name, members, centroid: centroid.clone() });
    }
    tracing::info!(
        k = config.num_clusters,
        iterations = clustering.iterations,
        converged = clustering.converged,
        "clustering complete"
    );
    Ok(ClusterReport {
        epoch: snapshot.epoch,
        revision: snapshot.revision,
        clusters,
        page_to_cluster,
        iterations: clustering.iterations,
        converged: clustering.converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_snapshot, SourceDocument};
    use crate::tfidf::Vectorizer;

    fn corpus() -> Snapshot {
        build_snapshot(
            vec![
                SourceDocument::new("a", "the cat sat", "A"),
                SourceDocument::new("b", "the cat ran", "B"),
                SourceDocument::new("c", "dogs bark loudly", "C"),
            ],
            1,
            Vectorizer::default(),
        )
    }

    fn config(k: usize) -> ClusterConfig {
        ClusterConfig { num_clusters: k, ..ClusterConfig::default() }
    }

    #[test]
    fn separates_disjoint_vocabularies() {
        let report = run_clustering(&corpus(), &config(2)).unwrap();
        let a = report.page_to_cluster["a"];
        assert_eq!(report.page_to_cluster["b"], a);
        assert_ne!(report.page_to_cluster["c"], a);
        assert!(report.converged);
    }

    #[test]
    fn every_document_in_exactly_one_cluster() {
        let report = run_clustering(&corpus(), &config(3)).unwrap();
        let mut seen: Vec<&String> = report.clusters.iter().flat_map(|c| c.members.iter()).collect();
        seen.sort();
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!(report.page_to_cluster.len(), 3);
    }

    #[test]
    fn euclidean_also_separates() {
        let cfg = ClusterConfig { metric: Metric::Euclidean, ..config(2) };
        let report = run_clustering(&corpus(), &cfg).unwrap();
        assert_eq!(report.page_to_cluster["a"], report.page_to_cluster["b"]);
        assert_ne!(report.page_to_cluster["a"], report.page_to_cluster["c"]);
    }

    #[test]
    fn fixed_seed_is_reproducible() {
        let cfg = ClusterConfig { seeding: Seeding::Random { seed: 42 }, ..config(2) };
        let snap = corpus();
        let one = kmeans(&snap.vectors, &cfg).unwrap();
        let two = kmeans(&snap.vectors, &cfg).unwrap();
        assert_eq!(one, two);
    }

    #[test]
    fn too_few_documents_is_an_error() {
        let err = run_clustering(&corpus(), &config(4)).unwrap_err();
        assert!(matches!(err, IndexError::InsufficientCorpus { requested: 4, available: 3 }));
        assert!(matches!(run_clustering(&corpus(), &config(0)), Err(IndexError::InvalidClusterCount)));
        assert!(matches!(
            run_clustering(&Snapshot::default(), &config(1)),
            Err(IndexError::EmptyCorpus)
        ));
    }

    #[test]
    fn empty_vectors_do_not_count_towards_k() {
        let snap = build_snapshot(
            vec![SourceDocument::new("x", "words here", "X"), SourceDocument::new("y", "", "Y")],
            1,
            Vectorizer::default(),
        );
        let err = kmeans(&snap.vectors, &config(2)).unwrap_err();
        assert!(matches!(err, IndexError::InsufficientCorpus { requested: 2, available: 1 }));
    }

    #[test]
    fn names_come_from_heaviest_terms() {
        let report = run_clustering(&corpus(), &config(2)).unwrap();
        let c = report.cluster_of("c").unwrap();
        // all three terms share the same weight, so term-id order decides
        assert_eq!(c.name, "Dogs - Bark - Loudly");
        let ab = report.cluster_of("a").unwrap();
        assert!(ab.name.starts_with("Sat") || ab.name.starts_with("Ran"));
    }

    #[test]
    fn empty_cluster_gets_placeholder() {
        let mut vocab = Vocabulary::new();
        vocab.assign_term_id("ghost");
        let centroid: SparseVector = [(0, 1.0)].into_iter().collect();
        assert_eq!(cluster_name(4, &centroid, 0, &vocab, 3), "Cluster 4");
        assert_eq!(cluster_name(4, &centroid, 2, &vocab, 3), "Ghost");
        assert_eq!(cluster_name(4, &centroid, 2, &Vocabulary::new(), 3), "Unknown");
    }

    #[test]
    fn top_terms_orders_by_weight_then_id() {
        let centroid: SparseVector = [(5, 0.5), (1, 2.0), (3, 0.5), (9, 0.0)].into_iter().collect();
        assert_eq!(top_terms(&centroid, 3), vec![1, 3, 5]);
        assert_eq!(top_terms(&centroid, 10), vec![1, 3, 5]);
    }
}
