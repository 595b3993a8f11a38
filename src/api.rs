use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use searchlight_core::CrawlError;
use searchlight_crawler::seed_urls;
use searchlight_frontier::ScoringStrategy;
use searchlight_query::{SearchParams, SortOrder};

use crate::app::App;

/// End-to-end budget for a search request.
const QUERY_DEADLINE: Duration = Duration::from_secs(2);

pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api/v1/search", get(search))
        .route("/api/v1/search/suggestions", get(suggestions))
        .route("/api/v1/admin/crawl/seeds", post(submit_seeds))
        .route("/api/v1/admin/stats/crawler", get(crawler_stats))
        .route("/api/v1/admin/indexer/pagerank/update", post(trigger_pagerank))
        .route("/api/v1/admin/frontier/strategy", post(switch_strategy))
        .route("/api/v1/admin/rate-limit/{domain}", get(rate_limit_status))
        .route("/api/v1/admin/rate-limit/{domain}/reset", post(rate_limit_reset))
        .with_state(app)
        .layer(TraceLayer::new_for_http())
}

fn error_status(e: &CrawlError) -> StatusCode {
    match e {
        CrawlError::InvalidUrl(_) | CrawlError::Parse(_) | CrawlError::Config(_) => {
            StatusCode::BAD_REQUEST
        }
        CrawlError::Index(_) | CrawlError::Timeout(_) | CrawlError::Store(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        CrawlError::LockContended(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_body(e: CrawlError) -> (StatusCode, Json<serde_json::Value>) {
    (error_status(&e), Json(json!({ "error": e.to_string() })))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    page: Option<usize>,
    size: Option<usize>,
    sort: Option<String>,
}

async fn search(
    State(app): State<Arc<App>>,
    Query(params): Query<SearchQuery>,
) -> impl IntoResponse {
    let Some(q) = params.q.filter(|q| !q.trim().is_empty()) else {
        return error_body(CrawlError::Parse("missing query parameter q".into()))
            .into_response();
    };
    let sort = match SortOrder::parse(params.sort.as_deref().unwrap_or("relevance")) {
        Ok(sort) => sort,
        Err(e) => return error_body(e).into_response(),
    };
    let search_params = SearchParams {
        q,
        page: params.page.unwrap_or(0),
        size: params.size.unwrap_or(app.config.query.default_page_size),
        sort,
    };
    match tokio::time::timeout(QUERY_DEADLINE, app.query.search(&search_params)).await {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e)) => error_body(e).into_response(),
        Err(_) => error_body(CrawlError::Timeout(QUERY_DEADLINE.as_secs())).into_response(),
    }
}

#[derive(Deserialize)]
struct SuggestQuery {
    prefix: Option<String>,
}

async fn suggestions(
    State(app): State<Arc<App>>,
    Query(params): Query<SuggestQuery>,
) -> impl IntoResponse {
    let prefix = params.prefix.unwrap_or_default();
    match app.query.suggest(&prefix).await {
        Ok(suggestions) => Json(json!({ "suggestions": suggestions })).into_response(),
        Err(e) => error_body(e).into_response(),
    }
}

async fn submit_seeds(
    State(app): State<Arc<App>>,
    Json(urls): Json<Vec<String>>,
) -> impl IntoResponse {
    match seed_urls(&urls, &app.frontier, &app.store).await {
        Ok(admitted) => {
            app.spawn_sitemap_expansion(&urls);
            info!(submitted = urls.len(), admitted, "seeds accepted");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "submitted": urls.len(), "admitted": admitted })),
            )
                .into_response()
        }
        Err(e) => error_body(e).into_response(),
    }
}

async fn crawler_stats(State(app): State<Arc<App>>) -> impl IntoResponse {
    let counts = match app.store.counts_by_status().await {
        Ok(counts) => counts,
        Err(e) => return error_body(e).into_response(),
    };
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), json!(count)))
        .collect();
    let frontier_size = app.frontier.len().await.unwrap_or(0);
    let counters = &app.counters;
    Json(json!({
        "byStatus": by_status,
        "frontierSize": frontier_size,
        "indexedDocuments": app.index.doc_count(),
        "fetched": counters.fetched.load(Ordering::Relaxed),
        "fetchFailures": counters.fetch_failures.load(Ordering::Relaxed),
        "blocked": counters.blocked.load(Ordering::Relaxed),
        "emptyBodies": counters.empty_bodies.load(Ordering::Relaxed),
        "invalidUrls": counters.invalid_urls.load(Ordering::Relaxed),
        "deadLettered": counters.dlq.load(Ordering::Relaxed),
    }))
    .into_response()
}

async fn trigger_pagerank(State(app): State<Arc<App>>) -> impl IntoResponse {
    let job_id = app.trigger_rank_job().await;
    (StatusCode::ACCEPTED, Json(json!({ "jobId": job_id })))
}

#[derive(Deserialize)]
struct StrategyQuery {
    strategy: String,
}

async fn switch_strategy(
    State(app): State<Arc<App>>,
    Query(params): Query<StrategyQuery>,
) -> impl IntoResponse {
    let strategy = match ScoringStrategy::parse(&params.strategy, &app.config.frontier) {
        Ok(strategy) => strategy,
        Err(e) => return error_body(e).into_response(),
    };
    let name = strategy.name();
    match app.frontier.switch_strategy(strategy).await {
        Ok(()) => Json(json!({ "strategy": name })).into_response(),
        Err(e) => error_body(e).into_response(),
    }
}

async fn rate_limit_status(
    State(app): State<Arc<App>>,
    Path(domain): Path<String>,
) -> impl IntoResponse {
    let (tokens, wait_hint_ms) = match app.governor.bucket_status(&domain).await {
        Ok(status) => status,
        Err(e) => return error_body(e).into_response(),
    };
    let breaker = match app.governor.breaker_snapshot(&domain).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_body(e).into_response(),
    };
    Json(json!({
        "domain": domain,
        "tokens": tokens,
        "waitHintMs": wait_hint_ms,
        "circuit": breaker,
    }))
    .into_response()
}

async fn rate_limit_reset(
    State(app): State<Arc<App>>,
    Path(domain): Path<String>,
) -> impl IntoResponse {
    match app.governor.reset(&domain).await {
        Ok(()) => Json(json!({ "domain": domain, "reset": true })).into_response(),
        Err(e) => error_body(e).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum_test::TestServer;
    use searchlight_core::AppConfig;
    use tempfile::TempDir;

    // App::build reads the index directory from the environment; serialize
    // builds so parallel tests don't trample each other's env.
    static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    async fn test_server() -> (TestServer, Arc<App>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let app = {
            let _guard = ENV_LOCK.lock().await;
            std::env::set_var("SEARCHLIGHT_INDEX_DIR", dir.path().join("index"));
            let app = App::build(AppConfig::default()).await.unwrap();
            std::env::remove_var("SEARCHLIGHT_INDEX_DIR");
            app
        };
        let server = TestServer::new(router(app.clone())).unwrap();
        (server, app, dir)
    }

    #[tokio::test]
    async fn search_without_query_is_bad_request() {
        let (server, _app, _dir) = test_server().await;
        let response = server.get("/api/v1/search").await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn search_on_empty_index_is_a_normal_empty_page() {
        let (server, _app, _dir) = test_server().await;
        let response = server
            .get("/api/v1/search")
            .add_query_param("q", "rust")
            .await;
        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["totalResults"], 0);
        assert!(body["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn seeds_are_accepted_and_show_up_in_stats() {
        let (server, _app, _dir) = test_server().await;
        let response = server
            .post("/api/v1/admin/crawl/seeds")
            .json(&serde_json::json!(["https://example.com/", "not a url"]))
            .await;
        response.assert_status(StatusCode::ACCEPTED);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["admitted"], 1);

        let stats = server.get("/api/v1/admin/stats/crawler").await;
        stats.assert_status_ok();
        let stats = stats.json::<serde_json::Value>();
        assert_eq!(stats["byStatus"]["PENDING"], 1);
        assert_eq!(stats["frontierSize"], 1);
    }

    #[tokio::test]
    async fn strategy_switch_validates_names() {
        let (server, _app, _dir) = test_server().await;
        let ok = server
            .post("/api/v1/admin/frontier/strategy")
            .add_query_param("strategy", "best-first")
            .await;
        ok.assert_status_ok();
        assert_eq!(ok.json::<serde_json::Value>()["strategy"], "best-first");

        let bad = server
            .post("/api/v1/admin/frontier/strategy")
            .add_query_param("strategy", "dfs")
            .await;
        bad.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rate_limit_endpoints_report_and_reset() {
        let (server, _app, _dir) = test_server().await;
        let status = server.get("/api/v1/admin/rate-limit/example.com").await;
        status.assert_status_ok();
        let body = status.json::<serde_json::Value>();
        assert_eq!(body["domain"], "example.com");
        assert_eq!(body["tokens"], 10.0);
        assert_eq!(body["circuit"]["state"], "CLOSED");

        let reset = server
            .post("/api/v1/admin/rate-limit/example.com/reset")
            .await;
        reset.assert_status_ok();
    }

    #[tokio::test]
    async fn pagerank_trigger_returns_a_job_id() {
        let (server, _app, _dir) = test_server().await;
        let response = server.post("/api/v1/admin/indexer/pagerank/update").await;
        response.assert_status(StatusCode::ACCEPTED);
        let body = response.json::<serde_json::Value>();
        assert!(body["jobId"].as_str().unwrap().starts_with("rank-"));
    }
}
