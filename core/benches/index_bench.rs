use criterion::{criterion_group, criterion_main, Criterion};
use pagedex_core::builder::{build_snapshot, SourceDocument};
use pagedex_core::tfidf::Vectorizer;
use pagedex_core::tokenizer::tokenize;

const WORDS: &[&str] = &[
    "index", "search", "page", "cluster", "vector", "term", "rust", "query", "score", "rank",
    "similar", "corpus", "token", "weight", "epoch", "snapshot", "posting", "document",
];

fn corpus(n: usize) -> Vec<SourceDocument> {
    (0..n)
        .map(|i| {
            let text: Vec<&str> = (0..200).map(|j| WORDS[(i * 7 + j * 13) % WORDS.len()]).collect();
            SourceDocument::new(&format!("page-{i}"), &text.join(" "), &format!("Page {i}"))
        })
        .collect()
}

fn bench_tokenize(c: &mut Criterion) {
    let text = corpus(1).remove(0).raw_text;
    c.bench_function("tokenize_page", |b| b.iter(|| tokenize(&text)));
}

fn bench_build(c: &mut Criterion) {
    let docs = corpus(500);
    c.bench_function("build_500_pages", |b| {
        b.iter(|| build_snapshot(docs.clone(), 1, Vectorizer::default()))
    });
}

criterion_group!(benches, bench_tokenize, bench_build);
criterion_main!(benches);
