//! Page macros backed by the index: `~~SIMILAR(N)~~`, `~~CLUSTER_MEMBERS~~`
//! and `~~CLUSTER_LIST~~`. Expansion produces Markdown; rendering it is the
//! caller's business.

use crate::engine::SearchEngine;
use crate::pages::title_from_slug;
use crate::similarity::most_similar;
use crate::snapshot::Snapshot;
use lazy_static::lazy_static;
use regex::{Captures, Regex};

lazy_static! {
    static ref SIMILAR: Regex = Regex::new(r"~~\s*SIMILAR(?:\s*\((\d+)\))?\s*~~").expect("valid regex");
}

const CLUSTER_MEMBERS: &str = "~~CLUSTER_MEMBERS~~";
const CLUSTER_LIST: &str = "~~CLUSTER_LIST~~";

fn display_title(snapshot: &Snapshot, slug: &str) -> String {
    snapshot
        .registry
        .lookup(slug)
        .and_then(|id| snapshot.registry.titles.get(&id).cloned())
        .unwrap_or_else(|| title_from_slug(slug))
}

fn link(snapshot: &Snapshot, slug: &str) -> String {
    format!("[[{}|{}]]", slug, display_title(snapshot, slug))
}

fn similar_list(snapshot: &Snapshot, slug: &str, n: usize) -> String {
    let Some(doc_id) = snapshot.registry.lookup(slug) else {
        tracing::warn!(%slug, "no index data for page with SIMILAR macro");
        return "<!-- Similar pages data not available for this page. -->".to_string();
    };
    if snapshot.vectors.get(doc_id).map_or(true, |v| v.is_empty()) {
        return "<!-- No content to compare for similar pages. -->".to_string();
    }
    let lines: Vec<String> = most_similar(&snapshot.vectors, doc_id, usize::MAX)
        .into_iter()
        .filter(|&(_, similarity)| similarity > 0.0)
        .filter_map(|(other, similarity)| Some((snapshot.registry.resolve_document(other)?, similarity)))
        .take(n)
        .map(|(other, similarity)| format!("* {} (Similarity: {:.0}%)", link(snapshot, other), similarity * 100.0))
        .collect();
    if lines.is_empty() {
        return "<!-- No similar pages found. -->".to_string();
    }
    lines.join("\n")
}

fn cluster_members(engine: &SearchEngine, snapshot: &Snapshot, slug: &str) -> String {
    let Some(cluster) = engine.cluster_of(slug) else {
        return "*This page has not been clustered yet.*".to_string();
    };
    let lines: Vec<String> = cluster
        .members
        .iter()
        .filter(|m| m.as_str() != slug)
        .map(|m| format!("* {}", link(snapshot, m)))
        .collect();
    if lines.is_empty() {
        return "*No other pages found in this cluster.*".to_string();
    }
    lines.join("\n")
}

fn cluster_list(engine: &SearchEngine, snapshot: &Snapshot) -> String {
    let Some(report) = engine.clusters().filter(|r| !r.is_empty()) else {
        return "*No clusters have been generated yet.*".to_string();
    };
    let mut parts = Vec::new();
    for cluster in &report.clusters {
        parts.push(format!("### {}", cluster.name));
        for member in &cluster.members {
            parts.push(format!("* {}", link(snapshot, member)));
        }
        parts.push(String::new());
    }
    parts.join("\n")
}

/// Replace every index-backed macro in `markdown` for the page `slug`.
pub fn expand_macros(engine: &SearchEngine, markdown: &str, slug: &str) -> String {
    let snapshot = engine.snapshot();
    let default_n = engine.config().default_similar.max(1);

    let mut replaced = 0usize;
    let mut out = SIMILAR
        .replace_all(markdown, |caps: &Captures| {
            replaced += 1;
            let n = match caps.get(1).map(|m| m.as_str().parse::<usize>()) {
                Some(Ok(n)) if n > 0 => n,
                Some(_) => {
                    tracing::warn!(%slug, "invalid count in SIMILAR macro, using default");
                    default_n
                }
                None => default_n,
            };
            similar_list(&snapshot, slug, n)
        })
        .into_owned();

    if out.contains(CLUSTER_MEMBERS) {
        out = out.replace(CLUSTER_MEMBERS, &cluster_members(engine, &snapshot, slug));
        replaced += 1;
    }
    if out.contains(CLUSTER_LIST) {
        out = out.replace(CLUSTER_LIST, &cluster_list(engine, &snapshot));
        replaced += 1;
    }
    if replaced > 0 {
        tracing::debug!(%slug, replaced, "expanded page macros");
    }
    out
}
