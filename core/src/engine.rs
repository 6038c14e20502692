//! The search engine service: publishes snapshots, serves reads, runs jobs.
//!
//! Readers grab the current `Arc<Snapshot>` and work on it without holding
//! any lock, so they always see one complete epoch/revision. Every write
//! (rebuild, incremental update, removal, clustering) takes the writer mutex,
//! prepares a replacement off to the side, persists it, and only then swaps
//! the published pointer. A failed write leaves the published state alone.

use crate::builder::{build_snapshot, SourceDocument};
use crate::cluster::{run_clustering, ClusterReport, ClusterSummary};
use crate::config::{ClusterConfig, EngineConfig};
use crate::error::{IndexError, IndexResult};
use crate::pages::PageStore;
use crate::persist::{self, IndexPaths};
use crate::query::{self, SearchHit};
use crate::similarity::most_similar;
use crate::snapshot::Snapshot;
use crate::tfidf::Vectorizer;
use crate::DocId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarPage {
    pub doc_id: DocId,
    pub slug: String,
    pub title: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Status of the most recent background rebuild.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub state: JobState,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub epoch: Option<u64>,
    pub documents: Option<usize>,
    pub message: Option<String>,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self {
            state: JobState::Idle,
            started_at: None,
            finished_at: None,
            epoch: None,
            documents: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildReport {
    pub epoch: u64,
    pub documents: usize,
    pub terms: usize,
}

fn now() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "".into())
}

pub struct SearchEngine {
    config: EngineConfig,
    paths: Option<IndexPaths>,
    store: Arc<dyn PageStore>,
    current: RwLock<Arc<Snapshot>>,
    clusters: RwLock<Option<Arc<ClusterReport>>>,
    cluster_config: RwLock<ClusterConfig>,
    writer: Mutex<()>,
    job: Mutex<JobStatus>,
}

impl SearchEngine {
    /// Open the engine, loading whatever snapshot is currently published.
    pub fn open(config: EngineConfig, store: Arc<dyn PageStore>) -> Self {
        let paths = config
            .index_dir
            .as_ref()
            .map(|dir| IndexPaths::new(dir, config.artifact_format));
        let vectorizer = Vectorizer::new(config.tf, config.idf);
        let snapshot = match &paths {
            Some(p) => persist::load_snapshot(p, vectorizer),
            None => Snapshot::empty(vectorizer),
        };
        let clusters = paths.as_ref().and_then(persist::load_clusters);
        if let Some(report) = &clusters {
            if report.epoch != snapshot.epoch {
                tracing::warn!(
                    cluster_epoch = report.epoch,
                    index_epoch = snapshot.epoch,
                    "cluster data predates the published index"
                );
            }
        }
        let cluster_config = paths
            .as_ref()
            .and_then(persist::load_cluster_config)
            .unwrap_or_else(|| config.cluster.clone());
        Self {
            config,
            paths,
            store,
            current: RwLock::new(Arc::new(snapshot)),
            clusters: RwLock::new(clusters.map(Arc::new)),
            cluster_config: RwLock::new(cluster_config),
            writer: Mutex::new(()),
            job: Mutex::new(JobStatus::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig { &self.config }

    /// The currently published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    fn vectorizer(&self) -> Vectorizer {
        Vectorizer::new(self.config.tf, self.config.idf)
    }

    fn publish(&self, snapshot: Snapshot) -> IndexResult<Arc<Snapshot>> {
        if let Some(paths) = &self.paths {
            persist::save_snapshot(paths, &snapshot, self.config.retain_snapshots)?;
        }
        let snapshot = Arc::new(snapshot);
        *self.current.write() = snapshot.clone();
        Ok(snapshot)
    }

    /// Full rebuild from the page store into a new epoch. Blocks until done.
    pub fn rebuild(&self) -> IndexResult<RebuildReport> {
        let _guard = self.writer.lock();
        let docs = self
            .store
            .list_documents()
            .map_err(|e| IndexError::PageStore(format!("{e:#}")))?;
        let epoch = self.snapshot().epoch + 1;
        tracing::info!(epoch, documents = docs.len(), "starting full rebuild");
        let snapshot = build_snapshot(docs, epoch, self.vectorizer());
        let report = RebuildReport {
            epoch,
            documents: snapshot.num_docs(),
            terms: snapshot.vocabulary.len(),
        };
        self.publish(snapshot)?;
        tracing::info!(epoch, documents = report.documents, "index build complete");
        Ok(report)
    }

    /// Start a full rebuild on a background thread and return right away.
    /// While one is running, further calls just report its status.
    pub fn recalculate(self: &Arc<Self>) -> JobStatus {
        match self.start_recalculate() {
            Ok(status) => status,
            Err(_) => self.status(),
        }
    }

    /// Like [`SearchEngine::recalculate`], but refuses with
    /// `RebuildInProgress` instead of reporting the running job.
    pub fn start_recalculate(self: &Arc<Self>) -> IndexResult<JobStatus> {
        let mut job = self.job.lock();
        if job.state == JobState::Running {
            return Err(IndexError::RebuildInProgress);
        }
        *job = JobStatus { state: JobState::Running, started_at: Some(now()), ..JobStatus::default() };

        let engine = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("index-rebuild".into())
            .spawn(move || {
                let result = engine.rebuild();
                let mut job = engine.job.lock();
                job.finished_at = Some(now());
                match result {
                    Ok(report) => {
                        job.state = JobState::Completed;
                        job.epoch = Some(report.epoch);
                        job.documents = Some(report.documents);
                        job.message = None;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "background rebuild failed");
                        job.state = JobState::Failed;
                        job.message = Some(e.to_string());
                    }
                }
            });
        if let Err(e) = spawned {
            tracing::error!(error = %e, "could not start rebuild thread");
            job.state = JobState::Failed;
            job.finished_at = Some(now());
            job.message = Some(e.to_string());
        }
        Ok(job.clone())
    }

    pub fn status(&self) -> JobStatus {
        self.job.lock().clone()
    }

    /// Re-index one page from the page store, keeping the current epoch's ids.
    pub fn index_document(&self, slug: &str) -> IndexResult<DocId> {
        let doc = self
            .store
            .get_document(slug)
            .map_err(|e| IndexError::PageStore(format!("{e:#}")))?
            .ok_or_else(|| IndexError::UnknownDocument(slug.to_string()))?;
        self.index_source(&doc)
    }

    /// Add or replace `doc` directly, bypassing the page store.
    pub fn index_source(&self, doc: &SourceDocument) -> IndexResult<DocId> {
        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let doc_id = next.upsert_document(doc);
        next.revision += 1;
        next.revectorize();
        let published = self.publish(next)?;
        tracing::info!(
            slug = %doc.slug,
            doc_id,
            epoch = published.epoch,
            revision = published.revision,
            "indexed page"
        );
        Ok(doc_id)
    }

    pub fn remove_document(&self, slug: &str) -> IndexResult<DocId> {
        let _guard = self.writer.lock();
        let mut next = (*self.snapshot()).clone();
        let doc_id = next
            .remove_document(slug)
            .ok_or_else(|| IndexError::UnknownDocument(slug.to_string()))?;
        next.revision += 1;
        next.revectorize();
        self.publish(next)?;
        tracing::info!(%slug, doc_id, "removed page from index");
        Ok(doc_id)
    }

    /// The page as the store currently has it, indexed or not.
    pub fn page(&self, slug: &str) -> IndexResult<Option<SourceDocument>> {
        self.store
            .get_document(slug)
            .map_err(|e| IndexError::PageStore(format!("{e:#}")))
    }

    pub fn search(&self, query: &str, limit: Option<usize>) -> Vec<SearchHit> {
        let snapshot = self.snapshot();
        query::search(&snapshot, query, self.config.scoring, limit)
    }

    /// The `n` pages most similar to `slug`; empty if the slug is unknown.
    pub fn similar(&self, slug: &str, n: usize) -> Vec<SimilarPage> {
        let snapshot = self.snapshot();
        let Some(doc_id) = snapshot.registry.lookup(slug) else {
            tracing::warn!(%slug, "similar pages requested for unindexed page");
            return Vec::new();
        };
        most_similar(&snapshot.vectors, doc_id, n)
            .into_iter()
            .filter_map(|(other, similarity)| {
                let slug = snapshot.registry.resolve_document(other)?;
                Some(SimilarPage {
                    doc_id: other,
                    slug: slug.to_string(),
                    title: snapshot.registry.title(other).unwrap_or(slug).to_string(),
                    similarity,
                })
            })
            .collect()
    }

    pub fn cluster_config(&self) -> ClusterConfig {
        self.cluster_config.read().clone()
    }

    /// Cluster the published snapshot, replacing any previous result.
    /// `None` arguments fall back to the last used configuration.
    pub fn run_clustering(
        &self,
        num_clusters: Option<usize>,
        num_top_terms: Option<usize>,
    ) -> IndexResult<Arc<ClusterReport>> {
        let _guard = self.writer.lock();
        let mut config = self.cluster_config();
        if let Some(k) = num_clusters {
            config.num_clusters = k;
        }
        if let Some(n) = num_top_terms {
            config.num_top_terms = n;
        }
        let snapshot = self.snapshot();
        let report = match run_clustering(&snapshot, &config) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(error = %e, k = config.num_clusters, "clustering rejected");
                return Err(e);
            }
        };
        if let Some(paths) = &self.paths {
            persist::save_cluster_config(paths, &config)?;
            persist::save_clusters(paths, &report)?;
        }
        *self.cluster_config.write() = config;
        let report = Arc::new(report);
        *self.clusters.write() = Some(report.clone());
        Ok(report)
    }

    pub fn clusters(&self) -> Option<Arc<ClusterReport>> {
        self.clusters.read().clone()
    }

    pub fn cluster_of(&self, slug: &str) -> Option<ClusterSummary> {
        self.clusters.read().as_ref()?.cluster_of(slug).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pages::MemoryPageStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    fn store() -> Arc<MemoryPageStore> {
        Arc::new(MemoryPageStore::with_pages([
            SourceDocument::new("a", "the cat sat", "Cat Sat"),
            SourceDocument::new("b", "the cat ran", "Cat Ran"),
            SourceDocument::new("c", "dogs bark loudly", "Dogs"),
        ]))
    }

    fn engine(store: Arc<MemoryPageStore>) -> SearchEngine {
        SearchEngine::open(EngineConfig::default(), store)
    }

    #[test]
    fn uninitialized_engine_answers_empty() {
        let e = engine(store());
        assert!(e.search("cat", None).is_empty());
        assert!(e.similar("a", 3).is_empty());
        assert!(e.clusters().is_none());
        assert_eq!(e.status().state, JobState::Idle);
    }

    #[test]
    fn rebuild_bumps_epoch() {
        let e = engine(store());
        assert_eq!(e.rebuild().unwrap().epoch, 1);
        let report = e.rebuild().unwrap();
        assert_eq!(report.epoch, 2);
        assert_eq!(report.documents, 3);
        assert_eq!(e.snapshot().revision, 0);
    }

    #[test]
    fn similar_pages_rank_shared_terms_first() {
        let e = engine(store());
        e.rebuild().unwrap();
        let sims = e.similar("a", 5);
        assert_eq!(sims.len(), 2);
        assert_eq!(sims[0].slug, "b");
        assert_eq!(sims[1].slug, "c");
        assert!(sims[0].similarity > sims[1].similarity);
        assert_eq!(sims[1].similarity, 0.0);
    }

    #[test]
    fn incremental_update_keeps_ids() {
        let pages = store();
        let e = engine(pages.clone());
        e.rebuild().unwrap();
        let before = e.snapshot();
        let b_id = before.registry.lookup("b").unwrap();

        pages.insert(SourceDocument::new("a", "parrots squawk", "Parrots"));
        let a_id = e.index_document("a").unwrap();
        let after = e.snapshot();
        assert_eq!(after.epoch, before.epoch);
        assert_eq!(after.revision, before.revision + 1);
        assert_eq!(after.registry.lookup("a"), Some(a_id));
        assert_eq!(after.registry.lookup("b"), Some(b_id));

        let hits = e.search("cat", None);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "b");
        assert_eq!(e.search("parrots", None)[0].title, "Parrots");
        // the old snapshot is untouched
        assert_eq!(query::search(&before, "cat", e.config().scoring, None).len(), 2);
    }

    #[test]
    fn removing_unknown_page_is_an_error() {
        let e = engine(store());
        e.rebuild().unwrap();
        assert!(matches!(e.remove_document("zzz"), Err(IndexError::UnknownDocument(_))));
        assert!(matches!(e.index_document("zzz"), Err(IndexError::UnknownDocument(_))));
        e.remove_document("c").unwrap();
        assert!(e.search("dogs", None).is_empty());
    }

    #[test]
    fn clustering_replaces_previous_result() {
        let e = engine(store());
        e.rebuild().unwrap();
        let first = e.run_clustering(Some(2), Some(2)).unwrap();
        assert_eq!(first.clusters.len(), 2);
        assert_ne!(e.cluster_of("c").unwrap().cluster_id, e.cluster_of("a").unwrap().cluster_id);

        let second = e.run_clustering(Some(3), None).unwrap();
        assert_eq!(second.clusters.len(), 3);
        assert_eq!(e.clusters().unwrap().clusters.len(), 3);
        assert_eq!(e.cluster_config().num_top_terms, 2);

        assert!(matches!(e.run_clustering(Some(9), None), Err(IndexError::InsufficientCorpus { .. })));
        assert_eq!(e.clusters().unwrap().clusters.len(), 3);
    }

    #[test]
    fn background_recalculate_completes() {
        let e = Arc::new(engine(store()));
        let started = e.recalculate();
        assert_eq!(started.state, JobState::Running);
        let deadline = Instant::now() + Duration::from_secs(10);
        while e.status().state == JobState::Running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        let status = e.status();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.epoch, Some(1));
        assert_eq!(status.documents, Some(3));
        assert_eq!(e.search("cat", None).len(), 2);
    }

    fn wait_while_running(e: &SearchEngine) -> JobStatus {
        let deadline = Instant::now() + Duration::from_secs(10);
        while e.status().state == JobState::Running && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        e.status()
    }

    /// Page store whose listing can be switched to fail.
    struct FlakyStore {
        pages: MemoryPageStore,
        broken: AtomicBool,
    }

    impl PageStore for FlakyStore {
        fn list_documents(&self) -> anyhow::Result<Vec<SourceDocument>> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("pages directory unavailable");
            }
            self.pages.list_documents()
        }

        fn get_document(&self, slug: &str) -> anyhow::Result<Option<SourceDocument>> {
            self.pages.get_document(slug)
        }
    }

    /// Page store whose listing blocks until released.
    struct GatedStore {
        pages: MemoryPageStore,
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl PageStore for GatedStore {
        fn list_documents(&self) -> anyhow::Result<Vec<SourceDocument>> {
            self.gate.lock().recv()?;
            self.pages.list_documents()
        }

        fn get_document(&self, slug: &str) -> anyhow::Result<Option<SourceDocument>> {
            self.pages.get_document(slug)
        }
    }

    #[test]
    fn failed_background_rebuild_keeps_published_epoch() {
        let store = Arc::new(FlakyStore {
            pages: MemoryPageStore::with_pages([SourceDocument::new("a", "the cat sat", "Cat Sat")]),
            broken: AtomicBool::new(false),
        });
        let e = Arc::new(SearchEngine::open(EngineConfig::default(), store.clone()));
        e.rebuild().unwrap();

        store.broken.store(true, Ordering::SeqCst);
        e.recalculate();
        let status = wait_while_running(&e);
        assert_eq!(status.state, JobState::Failed);
        assert!(status.message.unwrap().contains("pages directory unavailable"));
        assert!(status.finished_at.is_some());
        assert_eq!(e.snapshot().epoch, 1);
        assert_eq!(e.search("cat", None).len(), 1);

        // a failed job does not block the next one
        store.broken.store(false, Ordering::SeqCst);
        e.recalculate();
        assert_eq!(wait_while_running(&e).state, JobState::Completed);
        assert_eq!(e.snapshot().epoch, 2);
    }

    #[test]
    fn second_recalculate_while_running_is_refused() {
        let (release, gate) = mpsc::channel();
        let store = Arc::new(GatedStore {
            pages: MemoryPageStore::with_pages([SourceDocument::new("a", "the cat sat", "Cat Sat")]),
            gate: Mutex::new(gate),
        });
        let e = Arc::new(SearchEngine::open(EngineConfig::default(), store));

        let first = e.start_recalculate().unwrap();
        assert_eq!(first.state, JobState::Running);
        assert!(matches!(e.start_recalculate(), Err(IndexError::RebuildInProgress)));
        let again = e.recalculate();
        assert_eq!(again.state, JobState::Running);
        assert_eq!(again.started_at, first.started_at);

        release.send(()).unwrap();
        let done = wait_while_running(&e);
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.epoch, Some(1));
        assert_eq!(e.snapshot().epoch, 1);
    }
}
