//! Full-text indexing, ranked retrieval, page similarity and clustering for
//! a flat-file page collection.
//!
//! Build flows one way: [`tokenizer`] -> [`vocab`] -> [`index`] -> [`tfidf`],
//! and [`query`], [`similarity`] and [`cluster`] read the result. The
//! [`engine::SearchEngine`] ties it together behind atomic snapshot
//! publication.

use std::collections::BTreeMap;

pub mod builder;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod error;
pub mod index;
pub mod macros;
pub mod pages;
pub mod persist;
pub mod query;
pub mod similarity;
pub mod snapshot;
pub mod tfidf;
pub mod tokenizer;
pub mod vocab;

pub type TermId = u32;
pub type DocId = u32;
pub type ClusterId = u32;

/// term-id -> weight; zero weights are never stored
pub type SparseVector = BTreeMap<TermId, f64>;

pub use builder::SourceDocument;
pub use config::EngineConfig;
pub use engine::{JobState, JobStatus, SearchEngine, SimilarPage};
pub use error::{IndexError, IndexResult};
pub use query::SearchHit;
