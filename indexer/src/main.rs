use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use pagedex_core::config::{ArtifactFormat, EngineConfig, IdfMode, Metric, Scoring, Seeding, TfScaling};
use pagedex_core::macros::expand_macros;
use pagedex_core::pages::FsPageStore;
use pagedex_core::persist::{current_snapshot, load_meta, IndexPaths};
use pagedex_core::{JobState, SearchEngine};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Build and query the page search index", long_about = None)]
struct Cli {
    #[command(flatten)]
    common: Common,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Common {
    /// Index directory
    #[arg(long, global = true, default_value = "./index")]
    index: PathBuf,
    /// Pages directory (Markdown files)
    #[arg(long, global = true, default_value = "./pages")]
    pages: PathBuf,
    /// JSON engine config; flags below override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Artifact encoding for newly published snapshots
    #[arg(long, global = true, value_enum)]
    format: Option<FormatArg>,
    /// Use smoothed IDF = ln(1 + N/df) instead of ln(N/df)
    #[arg(long, global = true, default_value_t = false)]
    smoothed_idf: bool,
    /// Use 1 + ln(tf) instead of raw term counts
    #[arg(long, global = true, default_value_t = false)]
    log_tf: bool,
    /// Rank by summed raw term frequency instead of tf-idf
    #[arg(long, global = true, default_value_t = false)]
    tf_scoring: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Bincode,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    Cosine,
    Euclidean,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the whole index from the pages directory
    Build,
    /// Rebuild through the background job and wait for it to finish
    Recalculate,
    /// Re-index a single page
    Update {
        slug: String,
    },
    /// Drop a page from the index
    Remove {
        slug: String,
    },
    /// Run a ranked query
    Search {
        query: String,
        #[arg(long, short = 'k')]
        limit: Option<usize>,
    },
    /// List the pages most similar to a page
    Similar {
        slug: String,
        /// Defaults to the configured `default_similar`
        #[arg(short = 'n')]
        n: Option<usize>,
    },
    /// Partition the index into named clusters
    Cluster {
        /// Number of clusters
        #[arg(short = 'k', long)]
        clusters: Option<usize>,
        /// Terms per cluster name
        #[arg(long)]
        top_terms: Option<usize>,
        #[arg(long, value_enum)]
        metric: Option<MetricArg>,
        /// Seed random initialisation instead of farthest-first
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show the published snapshot and the last clustering run
    Status,
    /// Expand index macros in a Markdown file on behalf of a page
    Macros {
        slug: String,
        file: PathBuf,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();
    let config = engine_config(&cli)?;

    let engine = Arc::new(SearchEngine::open(config, Arc::new(FsPageStore::new(&cli.common.pages))));
    run(&engine, cli.command)
}

fn engine_config(cli: &Cli) -> Result<EngineConfig> {
    let c = &cli.common;
    let mut config = match &c.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.index_dir = Some(c.index.clone());
    if let Some(format) = c.format {
        config.artifact_format = match format {
            FormatArg::Json => ArtifactFormat::Json,
            FormatArg::Bincode => ArtifactFormat::Bincode,
        };
    }
    if c.smoothed_idf {
        config.idf = IdfMode::Smoothed;
    }
    if c.log_tf {
        config.tf = TfScaling::Log;
    }
    if c.tf_scoring {
        config.scoring = Scoring::TermFrequency;
    }
    if let Commands::Cluster { metric, seed, .. } = &cli.command {
        if let Some(metric) = metric {
            config.cluster.metric = match metric {
                MetricArg::Cosine => Metric::Cosine,
                MetricArg::Euclidean => Metric::Euclidean,
            };
        }
        if let Some(seed) = seed {
            config.cluster.seeding = Seeding::Random { seed: *seed };
        }
    }
    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(engine: &Arc<SearchEngine>, command: Commands) -> Result<()> {
    match command {
        Commands::Build => {
            let report = engine.rebuild()?;
            print_json(&report)
        }
        Commands::Recalculate => {
            let mut status = engine.recalculate();
            while status.state == JobState::Running {
                std::thread::sleep(Duration::from_millis(50));
                status = engine.status();
            }
            print_json(&status)?;
            if status.state == JobState::Failed {
                anyhow::bail!("rebuild failed: {}", status.message.unwrap_or_default());
            }
            Ok(())
        }
        Commands::Update { slug } => {
            let doc_id = engine.index_document(&slug)?;
            print_json(&serde_json::json!({ "slug": slug, "doc_id": doc_id }))
        }
        Commands::Remove { slug } => {
            let doc_id = engine.remove_document(&slug)?;
            print_json(&serde_json::json!({ "slug": slug, "removed_doc_id": doc_id }))
        }
        Commands::Search { query, limit } => print_json(&engine.search(&query, limit)),
        Commands::Similar { slug, n } => {
            let n = n.unwrap_or(engine.config().default_similar);
            print_json(&engine.similar(&slug, n))
        }
        Commands::Cluster { clusters, top_terms, .. } => {
            let report = engine.run_clustering(clusters, top_terms)?;
            let summary: Vec<_> = report
                .clusters
                .iter()
                .map(|c| serde_json::json!({ "cluster_id": c.cluster_id, "name": c.name, "members": c.members }))
                .collect();
            print_json(&summary)
        }
        Commands::Macros { slug, file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            println!("{}", expand_macros(engine, &text, &slug));
            Ok(())
        }
        Commands::Status => status(engine.config()),
    }
}

fn status(config: &EngineConfig) -> Result<()> {
    let Some(index_dir) = &config.index_dir else {
        anyhow::bail!("no index directory configured");
    };
    let paths = IndexPaths::new(index_dir, config.artifact_format);
    let Some(name) = current_snapshot(&paths) else {
        print_json(&serde_json::json!({ "published": null }))?;
        return Ok(());
    };
    let meta = load_meta(&paths, &name)?;
    let clusters = pagedex_core::persist::load_clusters(&paths).map(|r| {
        serde_json::json!({
            "epoch": r.epoch,
            "revision": r.revision,
            "clusters": r.clusters.len(),
            "converged": r.converged,
        })
    });
    print_json(&serde_json::json!({ "published": name, "manifest": meta, "clusters": clusters }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn similar_count_is_optional() {
        let cli = Cli::try_parse_from(["indexer", "similar", "home"]).unwrap();
        assert!(matches!(cli.command, Commands::Similar { n: None, .. }));
        let cli = Cli::try_parse_from(["indexer", "--index", "/tmp/ix", "similar", "home", "-n", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Similar { n: Some(3), .. }));
        assert_eq!(cli.common.index, PathBuf::from("/tmp/ix"));
    }

    #[test]
    fn cluster_flags_reach_the_engine_config() {
        let cli = Cli::try_parse_from(["indexer", "cluster", "--metric", "euclidean", "--seed", "7", "--smoothed-idf"])
            .unwrap();
        let config = engine_config(&cli).unwrap();
        assert_eq!(config.cluster.metric, Metric::Euclidean);
        assert_eq!(config.cluster.seeding, Seeding::Random { seed: 7 });
        assert_eq!(config.idf, IdfMode::Smoothed);
        assert_eq!(config.default_similar, 5);
    }
}
