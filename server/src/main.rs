use anyhow::Result;
use axum::Router;
use clap::Parser;
use pagedex_core::pages::FsPageStore;
use pagedex_core::{EngineConfig, SearchEngine};
use server::{build_app, Settings};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
struct Args {
    /// Index directory path
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Pages directory (Markdown files)
    #[arg(long, default_value = "./pages")]
    pages: PathBuf,
    /// JSON engine config
    #[arg(long)]
    config: Option<PathBuf>,
    /// Link template for search hits
    #[arg(long, default_value = "/pages/{slug}")]
    url_template: String,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.index_dir = Some(args.index.clone());
    let engine = Arc::new(SearchEngine::open(config, Arc::new(FsPageStore::new(&args.pages))));
    let snapshot = engine.snapshot();
    if snapshot.epoch == 0 {
        tracing::warn!(index = %args.index.display(), "no published index yet; POST /admin/recalculate to build one");
    } else {
        tracing::info!(epoch = snapshot.epoch, revision = snapshot.revision, documents = snapshot.num_docs(), "loaded index");
    }

    let app: Router = build_app(engine, Settings::from_env(args.url_template.clone()))?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
