//! On-disk snapshots.
//!
//! Each publish writes a complete snapshot directory under a temporary name,
//! renames it into place, then swaps the `CURRENT` pointer file. Readers that
//! open the index follow `CURRENT`, so they see either the previous snapshot or
//! the new one in full. Loading never fails: missing or unreadable artifacts
//! are logged and replaced by empty defaults.

use crate::cluster::ClusterReport;
use crate::config::{ArtifactFormat, ClusterConfig, IdfMode, TfScaling};
use crate::index::InvertedIndex;
use crate::snapshot::Snapshot;
use crate::tfidf::{TfIdfVectors, Vectorizer};
use crate::vocab::{DocumentRegistry, Vocabulary};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, create_dir_all, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever an artifact layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub format_version: u32,
    pub epoch: u64,
    pub revision: u64,
    pub num_docs: u32,
    pub num_terms: u32,
    pub created_at: String,
    /// Weighting the stored vectors were computed with.
    #[serde(default)]
    pub tf: TfScaling,
    #[serde(default)]
    pub idf: IdfMode,
}

/// Version and epoch tag wrapped around every artifact body.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    format_version: u32,
    epoch: u64,
    revision: u64,
    data: T,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Artifact {
    Registry,
    Vocabulary,
    InvertedIndex,
    TfIdfVectors,
}

impl Artifact {
    fn name(self) -> &'static str {
        match self {
            Artifact::Registry => "registry",
            Artifact::Vocabulary => "vocabulary",
            Artifact::InvertedIndex => "inverted_index",
            Artifact::TfIdfVectors => "tfidf_vectors",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub root: PathBuf,
    pub format: ArtifactFormat,
}

impl IndexPaths {
    pub fn new<P: AsRef<Path>>(root: P, format: ArtifactFormat) -> Self {
        Self { root: root.as_ref().to_path_buf(), format }
    }
    fn current(&self) -> PathBuf { self.root.join("CURRENT") }
    fn snapshots_dir(&self) -> PathBuf { self.root.join("snapshots") }
    fn snapshot_dir(&self, name: &str) -> PathBuf { self.snapshots_dir().join(name) }
    fn clusters(&self) -> PathBuf { self.root.join("clusters.json") }
    fn cluster_config(&self) -> PathBuf { self.root.join("cluster_config.json") }
    fn artifact(&self, dir: &Path, artifact: Artifact) -> PathBuf {
        dir.join(format!("{}.{}", artifact.name(), self.format.extension()))
    }
}

pub fn snapshot_name(epoch: u64, revision: u64) -> String {
    format!("{epoch:08}-{revision:06}")
}

fn encode<T: Serialize>(format: ArtifactFormat, value: &T) -> Result<Vec<u8>> {
    Ok(match format {
        ArtifactFormat::Json => serde_json::to_vec_pretty(value)?,
        ArtifactFormat::Bincode => bincode::serialize(value)?,
    })
}

fn decode<T: DeserializeOwned>(format: ArtifactFormat, bytes: &[u8]) -> Result<T> {
    Ok(match format {
        ArtifactFormat::Json => serde_json::from_slice(bytes)?,
        ArtifactFormat::Bincode => bincode::deserialize(bytes)?,
    })
}

/// Write `bytes` next to `path` and rename over it.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut f = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
        f.write_all(bytes)?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("publishing {}", path.display()))?;
    Ok(())
}

fn save_artifact<T: Serialize>(
    paths: &IndexPaths,
    dir: &Path,
    artifact: Artifact,
    snapshot: &Snapshot,
    data: &T,
) -> Result<()> {
    let envelope = Envelope {
        format_version: FORMAT_VERSION,
        epoch: snapshot.epoch,
        revision: snapshot.revision,
        data,
    };
    let path = paths.artifact(dir, artifact);
    let bytes = encode(paths.format, &envelope).with_context(|| format!("encoding {}", artifact.name()))?;
    let mut f = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    f.write_all(&bytes)?;
    f.sync_all()?;
    Ok(())
}

/// Persist `snapshot` as a new snapshot directory and point `CURRENT` at it.
/// Returns the published directory name.
pub fn save_snapshot(paths: &IndexPaths, snapshot: &Snapshot, retain: usize) -> Result<String> {
    let name = snapshot_name(snapshot.epoch, snapshot.revision);
    let final_dir = paths.snapshot_dir(&name);
    let tmp_dir = paths.snapshot_dir(&format!(".{name}.tmp"));
    if tmp_dir.exists() {
        fs::remove_dir_all(&tmp_dir)?;
    }
    create_dir_all(&tmp_dir).with_context(|| format!("creating {}", tmp_dir.display()))?;

    save_artifact(paths, &tmp_dir, Artifact::Registry, snapshot, &snapshot.registry)?;
    save_artifact(paths, &tmp_dir, Artifact::Vocabulary, snapshot, &snapshot.vocabulary)?;
    save_artifact(paths, &tmp_dir, Artifact::InvertedIndex, snapshot, &snapshot.index)?;
    save_artifact(paths, &tmp_dir, Artifact::TfIdfVectors, snapshot, &snapshot.vectors)?;
    let meta = MetaFile {
        format_version: FORMAT_VERSION,
        epoch: snapshot.epoch,
        revision: snapshot.revision,
        num_docs: snapshot.num_docs() as u32,
        num_terms: snapshot.vocabulary.len() as u32,
        created_at: time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "".into()),
        tf: snapshot.vectorizer.tf,
        idf: snapshot.vectorizer.idf,
    };
    write_atomic(&tmp_dir.join("manifest.json"), &serde_json::to_vec_pretty(&meta)?)?;

    if final_dir.exists() {
        // left behind by a publish that died before swapping CURRENT
        fs::remove_dir_all(&final_dir)?;
    }
    fs::rename(&tmp_dir, &final_dir).with_context(|| format!("publishing {}", final_dir.display()))?;
    write_atomic(&paths.current(), name.as_bytes())?;
    tracing::info!(snapshot = %name, root = %paths.root.display(), "published index snapshot");

    if let Err(e) = prune_snapshots(paths, retain, &name) {
        tracing::warn!(error = %e, "failed to prune old snapshots");
    }
    Ok(name)
}

/// Remove all but the newest `retain` snapshot directories, never `current`.
fn prune_snapshots(paths: &IndexPaths, retain: usize, current: &str) -> Result<()> {
    let mut names: Vec<String> = fs::read_dir(paths.snapshots_dir())?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    let keep = retain.max(1);
    let stale: Vec<&String> = names
        .iter()
        .filter(|n| n.starts_with('.'))
        .chain(names.iter().filter(|n| !n.starts_with('.')).rev().skip(keep))
        .filter(|n| n.as_str() != current)
        .collect();
    for name in stale {
        fs::remove_dir_all(paths.snapshot_dir(name))?;
        tracing::debug!(snapshot = %name, "pruned snapshot");
    }
    Ok(())
}

/// Name of the published snapshot, if any.
pub fn current_snapshot(paths: &IndexPaths) -> Option<String> {
    match fs::read_to_string(paths.current()) {
        Ok(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
        Ok(_) => {
            tracing::error!(path = %paths.current().display(), "CURRENT pointer is empty");
            None
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(root = %paths.root.display(), "no published index snapshot");
            None
        }
        Err(e) => {
            tracing::error!(path = %paths.current().display(), error = %e, "cannot read CURRENT pointer");
            None
        }
    }
}

pub fn load_meta(paths: &IndexPaths, name: &str) -> Result<MetaFile> {
    let path = paths.snapshot_dir(name).join("manifest.json");
    let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let meta: MetaFile = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(meta)
}

/// Read one artifact, checking its tag against the manifest. `None` on any
/// problem, with the reason logged.
fn load_artifact<T: DeserializeOwned>(
    paths: &IndexPaths,
    dir: &Path,
    artifact: Artifact,
    meta: &MetaFile,
) -> Option<T> {
    let path = paths.artifact(dir, artifact);
    let bytes = match fs::read(&path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(artifact = artifact.name(), path = %path.display(), "index artifact missing");
            return None;
        }
        Err(e) => {
            tracing::error!(artifact = artifact.name(), path = %path.display(), error = %e, "cannot read index artifact");
            return None;
        }
    };
    let envelope: Envelope<T> = match decode(paths.format, &bytes) {
        Ok(env) => env,
        Err(e) => {
            tracing::error!(artifact = artifact.name(), path = %path.display(), error = %e, "corrupt index artifact");
            return None;
        }
    };
    if envelope.format_version != FORMAT_VERSION {
        tracing::error!(
            artifact = artifact.name(),
            found = envelope.format_version,
            expected = FORMAT_VERSION,
            "unsupported artifact format version"
        );
        return None;
    }
    if envelope.epoch != meta.epoch || envelope.revision != meta.revision {
        tracing::error!(
            artifact = artifact.name(),
            epoch = envelope.epoch,
            revision = envelope.revision,
            expected_epoch = meta.epoch,
            expected_revision = meta.revision,
            "artifact belongs to a different snapshot"
        );
        return None;
    }
    Some(envelope.data)
}

/// Load the published snapshot, degrading to empty pieces where needed.
pub fn load_snapshot(paths: &IndexPaths, vectorizer: Vectorizer) -> Snapshot {
    let mut snapshot = Snapshot::empty(vectorizer);
    let Some(name) = current_snapshot(paths) else {
        return snapshot;
    };
    let meta = match load_meta(paths, &name) {
        Ok(meta) => meta,
        Err(e) => {
            tracing::error!(snapshot = %name, error = %format!("{e:#}"), "unusable snapshot manifest");
            return snapshot;
        }
    };
    let dir = paths.snapshot_dir(&name);
    snapshot.epoch = meta.epoch;
    snapshot.revision = meta.revision;

    // registry, vocabulary and postings share id spaces; one bad piece
    // invalidates the other two
    let registry = load_artifact::<DocumentRegistry>(paths, &dir, Artifact::Registry, &meta);
    let vocabulary = load_artifact::<Vocabulary>(paths, &dir, Artifact::Vocabulary, &meta);
    let index = load_artifact::<InvertedIndex>(paths, &dir, Artifact::InvertedIndex, &meta);
    let (Some(registry), Some(vocabulary), Some(index)) = (registry, vocabulary, index) else {
        tracing::error!(
            snapshot = %name,
            epoch = meta.epoch,
            revision = meta.revision,
            "snapshot is incomplete, starting from an empty index"
        );
        return snapshot;
    };
    snapshot.registry = registry;
    snapshot.registry.repair_next_id();
    snapshot.vocabulary = vocabulary;
    snapshot.index = index;
    snapshot.reconcile_documents();

    let same_weighting = meta.tf == vectorizer.tf && meta.idf == vectorizer.idf;
    match load_artifact::<TfIdfVectors>(paths, &dir, Artifact::TfIdfVectors, &meta) {
        Some(vectors) if same_weighting => snapshot.vectors = vectors,
        Some(_) => {
            tracing::warn!(
                snapshot = %name,
                stored_tf = ?meta.tf,
                stored_idf = ?meta.idf,
                "weighting changed since publish, recomputing tf-idf vectors"
            );
            snapshot.revectorize();
        }
        None => {
            tracing::warn!(snapshot = %name, "recomputing tf-idf vectors from the inverted index");
            snapshot.revectorize();
        }
    }
    tracing::info!(
        snapshot = %name,
        num_docs = snapshot.num_docs(),
        num_terms = snapshot.vocabulary.len(),
        "loaded index snapshot"
    );
    snapshot
}

pub fn save_clusters(paths: &IndexPaths, report: &ClusterReport) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_atomic(&paths.clusters(), &serde_json::to_vec_pretty(report)?)
}

pub fn load_clusters(paths: &IndexPaths) -> Option<ClusterReport> {
    load_json(&paths.clusters(), "clusters")
}

pub fn save_cluster_config(paths: &IndexPaths, config: &ClusterConfig) -> Result<()> {
    create_dir_all(&paths.root)?;
    write_atomic(&paths.cluster_config(), &serde_json::to_vec_pretty(config)?)
}

pub fn load_cluster_config(paths: &IndexPaths) -> Option<ClusterConfig> {
    load_json(&paths.cluster_config(), "cluster_config")
}

fn load_json<T: DeserializeOwned>(path: &Path, artifact: &str) -> Option<T> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(artifact, path = %path.display(), "artifact not present");
            return None;
        }
        Err(e) => {
            tracing::error!(artifact, path = %path.display(), error = %e, "cannot read artifact");
            return None;
        }
    };
    match serde_json::from_str(&text) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::error!(artifact, path = %path.display(), error = %e, "corrupt artifact");
            None
        }
    }
}
