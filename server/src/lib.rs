use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use pagedex_core::cluster::{ClusterReport, ClusterSummary};
use pagedex_core::macros::expand_macros;
use pagedex_core::{IndexError, JobStatus, SearchEngine, SimilarPage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
pub struct Settings {
    /// Required in `X-ADMIN-TOKEN` for admin routes; admin is closed when unset.
    pub admin_token: Option<String>,
    /// Comma-separated allowed origins; any origin when unset or unparsable.
    pub cors_allow_origin: Option<String>,
    /// Link template for hits, `{slug}` is substituted.
    pub url_template: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self { admin_token: None, cors_allow_origin: None, url_template: "/pages/{slug}".into() }
    }
}

impl Settings {
    pub fn from_env(url_template: String) -> Self {
        Self {
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            cors_allow_origin: std::env::var("CORS_ALLOW_ORIGIN").ok(),
            url_template,
        }
    }
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_k")]
    pub k: usize,
}
fn default_k() -> usize { 10 }

#[derive(Deserialize)]
pub struct SimilarParams {
    pub n: Option<usize>,
}

#[derive(Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub took_s: f64,
    pub total_hits: usize,
    pub results: Vec<SearchHit>,
}

#[derive(Serialize)]
pub struct SearchHit {
    pub doc_id: u32,
    pub slug: String,
    pub score: f64,
    pub title: String,
    pub url: Option<String>,
    pub snippet: Option<String>,
}

#[derive(Serialize)]
pub struct SimilarResponse {
    pub slug: String,
    pub results: Vec<SimilarPage>,
}

#[derive(Deserialize, Default)]
pub struct ClusterRequest {
    pub k: Option<usize>,
    pub top_terms: Option<usize>,
}

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SearchEngine>,
    pub settings: Arc<Settings>,
}

impl AppState {
    fn url_for(&self, slug: &str) -> String {
        self.settings.url_template.replace("{slug}", slug)
    }
}

/// JSON error body with the status an [`IndexError`] maps to.
pub struct ApiError(StatusCode, String);

impl From<IndexError> for ApiError {
    fn from(e: IndexError) -> Self {
        let status = match &e {
            IndexError::InsufficientCorpus { .. } | IndexError::EmptyCorpus | IndexError::InvalidClusterCount => {
                StatusCode::BAD_REQUEST
            }
            IndexError::UnknownDocument(_) => StatusCode::NOT_FOUND,
            IndexError::RebuildInProgress => StatusCode::CONFLICT,
            IndexError::PageStore(_) | IndexError::Persist(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %e, "request failed");
        }
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({ "error": self.1 }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

fn cors_layer(allow: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins: Vec<_> = allow
        .unwrap_or("")
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(AllowOrigin::list(origins))
    }
}

pub fn build_app(engine: Arc<SearchEngine>, settings: Settings) -> Result<Router> {
    if settings.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set, admin endpoints will refuse every request");
    }
    let cors = cors_layer(settings.cors_allow_origin.as_deref());
    let app_state = AppState { engine, settings: Arc::new(settings) };

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/search", get(search_handler))
        .route("/similar/:slug", get(similar_handler))
        .route("/doc/:slug", get(doc_handler))
        .route("/clusters", get(clusters_handler))
        .route("/clusters/:slug", get(page_cluster_handler))
        .route("/macros/:slug", post(macros_handler))
        .route("/admin/recalculate", post(recalculate_handler))
        .route("/admin/status", get(status_handler))
        .route("/admin/index/:slug", post(index_page_handler).delete(remove_page_handler))
        .route("/admin/cluster", post(cluster_handler))
        .with_state(app_state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());
    Ok(app)
}

/// Run a blocking engine call off the async workers.
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> std::result::Result<T, IndexError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(ApiError::from),
        Err(e) => {
            tracing::error!(error = %e, "engine task panicked");
            Err(ApiError(StatusCode::INTERNAL_SERVER_ERROR, "internal error".into()))
        }
    }
}

pub async fn search_handler(State(state): State<AppState>, Query(params): Query<SearchParams>) -> Json<SearchResponse> {
    let start = std::time::Instant::now();
    let hits = state.engine.search(&params.q, None);
    let total_hits = hits.len();
    let k = params.k.clamp(1, 100);

    let raw_terms: Vec<String> = params.q.split_whitespace().map(|s| s.to_string()).collect();
    let mut results = Vec::with_capacity(k.min(total_hits));
    for hit in hits.into_iter().take(k) {
        let snippet = match state.engine.page(&hit.slug) {
            Ok(Some(page)) => snippet_from_text(&page.raw_text, &raw_terms),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(slug = %hit.slug, error = %e, "no snippet for hit");
                None
            }
        };
        results.push(SearchHit {
            doc_id: hit.doc_id,
            url: Some(state.url_for(&hit.slug)),
            slug: hit.slug,
            score: hit.score,
            title: hit.title,
            snippet,
        });
    }

    let elapsed = start.elapsed();
    tracing::debug!(query = %params.q, total_hits, took_s = elapsed.as_secs_f64(), "search");
    Json(SearchResponse { query: params.q, took_s: elapsed.as_secs_f64(), total_hits, results })
}

pub async fn similar_handler(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(params): Query<SimilarParams>,
) -> ApiResult<Json<SimilarResponse>> {
    let snapshot = state.engine.snapshot();
    if snapshot.registry.lookup(&slug).is_none() {
        return Err(IndexError::UnknownDocument(slug).into());
    }
    let n = params.n.unwrap_or(state.engine.config().default_similar);
    let results = state.engine.similar(&slug, n);
    Ok(Json(SimilarResponse { slug, results }))
}

pub async fn doc_handler(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let snapshot = state.engine.snapshot();
    let Some(doc_id) = snapshot.registry.lookup(&slug) else {
        return Err(IndexError::UnknownDocument(slug).into());
    };
    let mut obj = serde_json::json!({
        "doc_id": doc_id,
        "slug": &slug,
        "title": snapshot.registry.title(doc_id).unwrap_or(slug.as_str()),
        "url": state.url_for(&slug),
        "terms": snapshot.index.term_counts(doc_id).map_or(0, |t| t.len()),
        "epoch": snapshot.epoch,
        "revision": snapshot.revision,
    });
    if let Some(cluster) = state.engine.cluster_of(&slug) {
        obj["cluster"] = serde_json::json!({ "cluster_id": cluster.cluster_id, "name": cluster.name });
    }
    Ok(Json(obj))
}

pub async fn clusters_handler(State(state): State<AppState>) -> Json<Option<Arc<ClusterReport>>> {
    Json(state.engine.clusters())
}

pub async fn page_cluster_handler(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult<Json<ClusterSummary>> {
    state
        .engine
        .cluster_of(&slug)
        .map(Json)
        .ok_or_else(|| IndexError::UnknownDocument(slug).into())
}

/// Body is the page's Markdown; the expanded Markdown comes back as text.
pub async fn macros_handler(State(state): State<AppState>, Path(slug): Path<String>, body: String) -> String {
    expand_macros(&state.engine, &body, &slug)
}

// --- Admin endpoints ---
async fn recalculate_handler(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<(StatusCode, Json<JobStatus>)> {
    authorize(&state, &headers)?;
    let status = state.engine.start_recalculate()?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}

async fn status_handler(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers)?;
    let snapshot = state.engine.snapshot();
    Ok(Json(serde_json::json!({
        "job": state.engine.status(),
        "epoch": snapshot.epoch,
        "revision": snapshot.revision,
        "documents": snapshot.num_docs(),
        "terms": snapshot.vocabulary.len(),
        "cluster_config": state.engine.cluster_config(),
    })))
}

async fn index_page_handler(State(state): State<AppState>, headers: HeaderMap, Path(slug): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    let page = slug.clone();
    let doc_id = blocking(move || engine.index_document(&page)).await?;
    Ok(Json(serde_json::json!({ "slug": slug, "doc_id": doc_id })))
}

async fn remove_page_handler(State(state): State<AppState>, headers: HeaderMap, Path(slug): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    authorize(&state, &headers)?;
    let engine = state.engine.clone();
    let page = slug.clone();
    let doc_id = blocking(move || engine.remove_document(&page)).await?;
    Ok(Json(serde_json::json!({ "slug": slug, "removed_doc_id": doc_id })))
}

async fn cluster_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<ClusterRequest>>,
) -> ApiResult<Json<Arc<ClusterReport>>> {
    authorize(&state, &headers)?;
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let engine = state.engine.clone();
    let report = blocking(move || engine.run_clustering(req.k, req.top_terms)).await?;
    Ok(Json(report))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let required = match &state.settings.admin_token {
        Some(t) => t,
        None => return Err(ApiError(StatusCode::UNAUTHORIZED, "ADMIN_TOKEN not set".into())),
    };
    let provided = headers.get("X-ADMIN-TOKEN").and_then(|v| v.to_str().ok()).unwrap_or("");
    if provided == required {
        Ok(())
    } else {
        Err(ApiError(StatusCode::UNAUTHORIZED, "invalid admin token".into()))
    }
}

fn snippet_from_text(text: &str, raw_terms: &[String]) -> Option<String> {
    if text.trim().is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let first_idx = raw_terms
        .iter()
        .filter(|t| !t.trim().is_empty())
        .find_map(|t| lower.find(&t.to_lowercase()));
    let snippet: String = match first_idx {
        // lowercasing can shift byte offsets, so cut on char boundaries
        Some(idx) => {
            let start = floor_char_boundary(text, idx.saturating_sub(100));
            let end = floor_char_boundary(text, (idx + 200).min(text.len()));
            text[start..end].to_string()
        }
        None => text.chars().take(200).collect(),
    };
    Some(highlight_terms(&snippet, raw_terms))
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    idx = idx.min(s.len());
    while !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn highlight_terms(snippet: &str, terms: &[String]) -> String {
    let mut s = snippet.to_string();
    for t in terms {
        if t.trim().is_empty() {
            continue;
        }
        let Ok(pat) = regex::RegexBuilder::new(&regex::escape(t)).case_insensitive(true).build() else {
            continue;
        };
        s = pat.replace_all(&s, |caps: &regex::Captures| format!("<em>{}</em>", &caps[0])).to_string();
    }
    s
}
