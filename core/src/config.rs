use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where snapshots are published. `None` keeps the engine in memory only.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
    #[serde(default)]
    pub artifact_format: ArtifactFormat,
    #[serde(default)]
    pub tf: TfScaling,
    #[serde(default)]
    pub idf: IdfMode,
    #[serde(default)]
    pub scoring: Scoring,
    #[serde(default = "default_retain_snapshots")]
    pub retain_snapshots: usize,
    #[serde(default = "default_similar")]
    pub default_similar: usize,
    #[serde(default)]
    pub cluster: ClusterConfig,
}

fn default_retain_snapshots() -> usize { 2 }
fn default_similar() -> usize { 5 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: None,
            artifact_format: ArtifactFormat::default(),
            tf: TfScaling::default(),
            idf: IdfMode::default(),
            scoring: Scoring::default(),
            retain_snapshots: default_retain_snapshots(),
            default_similar: default_similar(),
            cluster: ClusterConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn in_dir<P: AsRef<Path>>(index_dir: P) -> Self {
        Self { index_dir: Some(index_dir.as_ref().to_path_buf()), ..Self::default() }
    }

    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    #[default]
    Json,
    Bincode,
}

impl ArtifactFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactFormat::Json => "json",
            ArtifactFormat::Bincode => "bin",
        }
    }
}

/// How raw counts become the tf factor of a weight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TfScaling {
    #[default]
    Raw,
    /// 1 + ln(tf)
    Log,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdfMode {
    /// ln(N / df)
    #[default]
    Plain,
    /// ln(1 + N / df)
    Smoothed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scoring {
    #[default]
    Tfidf,
    TermFrequency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_num_clusters")]
    pub num_clusters: usize,
    #[serde(default = "default_num_top_terms")]
    pub num_top_terms: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub metric: Metric,
    #[serde(default)]
    pub seeding: Seeding,
}

fn default_num_clusters() -> usize { 5 }
fn default_num_top_terms() -> usize { 3 }
fn default_max_iterations() -> usize { 100 }

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            num_clusters: default_num_clusters(),
            num_top_terms: default_num_top_terms(),
            max_iterations: default_max_iterations(),
            metric: Metric::default(),
            seeding: Seeding::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Seeding {
    FarthestFirst,
    Random {
        #[serde(default = "default_seed")]
        seed: u64,
    },
}

fn default_seed() -> u64 { 42 }

impl Default for Seeding {
    fn default() -> Self { Seeding::FarthestFirst }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_gives_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.index_dir, None);
        assert_eq!(cfg.scoring, Scoring::Tfidf);
        assert_eq!(cfg.retain_snapshots, 2);
        assert_eq!(cfg.cluster.num_clusters, 5);
        assert_eq!(cfg.cluster.num_top_terms, 3);
        assert_eq!(cfg.cluster.max_iterations, 100);
        assert_eq!(cfg.cluster.seeding, Seeding::FarthestFirst);
    }

    #[test]
    fn parses_overrides() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"idf": "smoothed", "tf": "log", "artifact_format": "bincode",
                "cluster": {"num_clusters": 2, "metric": "euclidean",
                            "seeding": {"kind": "random", "seed": 7}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.idf, IdfMode::Smoothed);
        assert_eq!(cfg.tf, TfScaling::Log);
        assert_eq!(cfg.artifact_format.extension(), "bin");
        assert_eq!(cfg.cluster.num_clusters, 2);
        assert_eq!(cfg.cluster.metric, Metric::Euclidean);
        assert_eq!(cfg.cluster.seeding, Seeding::Random { seed: 7 });

        let seeding: Seeding = serde_json::from_str(r#"{"kind": "random"}"#).unwrap();
        assert_eq!(seeding, Seeding::Random { seed: 42 });
    }
}
