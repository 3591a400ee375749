mod comps;
mod config;
mod decision;
mod ebay;
mod http;
mod jobs;
mod metrics;
mod models;
mod money;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use comps::{Aggregator, Category, ConditionBucket, SearchQuery, deeplink::manual_search_url};
use comps::throttle::FailureMonitor;
use config::CompsConfig;
use decision::{DecisionInput, MarginDecision, calculate_decision};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{
    ApiError, CompsResponse, EnqueueResponse, EvaluateRequest, EvaluateResponse, SearchUrlParams,
    validate_query,
};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "flipcheck.api", "server crashed: {err:#}");
    }
}

async fn run() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = CompsConfig::from_env()?;
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|err| eyre::eyre!("prometheus recorder: {err}"))?;

    let http = http::build_client();
    let monitor = Arc::new(FailureMonitor::default());
    let cache = Arc::new(config.cache());
    let _sweeper = cache.spawn_sweeper(config.sweep_every);
    let aggregator = Arc::new(config.aggregator(&http, cache, &monitor));
    let (queue, _worker) = jobs::JobQueue::spawn(aggregator.clone(), jobs::retention_from_env());
    let _job_sweeper = queue.spawn_sweeper(config.sweep_every);

    let state = AppState {
        aggregator,
        queue,
        monitor,
        prometheus_handle,
    };
    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "flipcheck.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    aggregator: Arc<Aggregator>,
    queue: jobs::JobQueue,
    monitor: Arc<FailureMonitor>,
    prometheus_handle: PrometheusHandle,
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/comps", post(resolve_comps))
        .route("/decision", post(decide))
        .route("/evaluate", post(evaluate))
        .route("/cache/stats", get(cache_stats))
        .route("/search-url", get(search_url))
        .nest(
            "/jobs",
            Router::new()
                .route("/comps", post(enqueue_comps_job))
                .route("/{id}", get(get_job_status)),
        )
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()))
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
///
/// Returns a small JSON payload with `status` and `service`.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "flipcheck-api-rs",
    }))
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64 * 1024)
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> Response {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Resolve sold comps for a query.
///
/// - Method: `POST`
/// - Path: `/comps`
/// - Body: `SearchQuery`
/// - Response: the aggregated result with provenance, the condition-matched
///   market value and a manual sold-search link
async fn resolve_comps(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<CompsResponse>, AppError> {
    crate::metrics::inc_requests("/comps");
    validate_query(&query).map_err(AppError::InvalidInput)?;
    let resolved = state.aggregator.resolve(&query).await;
    let market_value = resolved.result.market_value(query.item_condition());
    let search_url = manual_search_url(&query.text, resolved.result.category);
    Ok(Json(CompsResponse {
        resolved,
        market_value,
        search_url,
    }))
}

/// Run the margin decision engine on explicit numbers.
///
/// - Method: `POST`
/// - Path: `/decision`
/// - Body: `DecisionInput`
async fn decide(Json(input): Json<DecisionInput>) -> Json<MarginDecision> {
    crate::metrics::inc_requests("/decision");
    Json(calculate_decision(&input))
}

/// Resolve comps, then decide using the median of the item's own condition
/// bucket. No decision is made when that bucket is empty.
///
/// - Method: `POST`
/// - Path: `/evaluate`
/// - Body: `EvaluateRequest` (query fields plus buyer costs)
async fn evaluate(
    State(state): State<AppState>,
    Json(request): Json<EvaluateRequest>,
) -> Result<Json<EvaluateResponse>, AppError> {
    crate::metrics::inc_requests("/evaluate");
    validate_query(&request.query).map_err(AppError::InvalidInput)?;
    let resolved = state.aggregator.resolve(&request.query).await;
    let market_value = resolved.result.market_value(request.query.item_condition());
    let search_url = manual_search_url(&request.query.text, resolved.result.category);

    let (decision, message) = match market_value {
        Some(price) => (
            Some(calculate_decision(&request.decision_input(price, &resolved))),
            None,
        ),
        None if resolved.result.is_empty() => (None, resolved.result.message.clone()),
        None => {
            let bucket = match request.query.item_condition() {
                ConditionBucket::NewLike => "new-like",
                ConditionBucket::Used => "used",
            };
            (
                None,
                Some(format!(
                    "No {bucket} comps for this item; price unavailable. Enter a price manually."
                )),
            )
        }
    };

    Ok(Json(EvaluateResponse {
        comps: resolved,
        market_value,
        decision,
        message,
        search_url,
    }))
}

async fn cache_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.aggregator.cache().stats().await;
    let upstream = state.monitor.snapshot();
    Json(json!({
        "cache": stats,
        "upstream": {
            "total_failures": upstream.total_failures,
            "alerts_raised": upstream.alerts_raised,
            "recent_samples": upstream.recent_samples,
        },
    }))
}

async fn search_url(
    Query(params): Query<SearchUrlParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    if params.q.trim().is_empty() {
        return Err(AppError::InvalidInput("q must not be empty".into()));
    }
    let category = Category::resolve(params.category.as_deref(), &params.q);
    Ok(Json(json!({
        "category": category,
        "url": manual_search_url(&params.q, category),
    })))
}

async fn enqueue_comps_job(
    State(state): State<AppState>,
    Json(query): Json<SearchQuery>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/jobs/comps");
    validate_query(&query).map_err(AppError::InvalidInput)?;
    let id = state
        .queue
        .enqueue_comps(query)
        .await
        .map_err(|err| AppError::Internal(err.detail.unwrap_or(err.error)))?;
    Ok(Json(EnqueueResponse {
        job_id: id.to_string(),
    }))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::InvalidInput("invalid_job_id".into()));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("job {uuid}")))
}

#[derive(Debug)]
enum AppError {
    InvalidInput(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::InvalidInput(detail) => (StatusCode::BAD_REQUEST, "invalid_input", detail),
            AppError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail),
            AppError::Internal(detail) => {
                error!(target = "flipcheck.api", detail = %detail, "internal_error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
            }
        };
        let payload = ApiError {
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comps::sources::{CompSource, SourceOutcome};
    use crate::comps::{ComparableSale, CompsSource, SaleDate, TieredCache};
    use crate::money::Money;
    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct UsedSwitches;

    #[async_trait]
    impl CompSource for UsedSwitches {
        fn kind(&self) -> CompsSource {
            CompsSource::FreeSearch
        }

        async fn search(&self, query: &SearchQuery, _category: Category) -> SourceOutcome {
            let text = query.text.to_lowercase();
            if !text.contains("switch") {
                return SourceOutcome::Empty;
            }
            if text.contains("deluxe") {
                let used = [40.0, 45.0, 50.0, 55.0, 60.0, 65.0].map(|p| (p, "Pre-owned"));
                let new = [290.0, 295.0, 300.0, 305.0].map(|p| (p, "Brand New"));
                return SourceOutcome::Found(
                    used.into_iter()
                        .chain(new)
                        .map(|(price, condition)| {
                            ComparableSale::new(
                                "Nintendo Switch OLED Deluxe console",
                                price,
                                Money::free(),
                                condition,
                                SaleDate::Sold("2024-09-01".into()),
                            )
                        })
                        .collect(),
                );
            }
            SourceOutcome::Found(
                [240.0, 250.0, 260.0, 270.0, 280.0]
                    .into_iter()
                    .map(|price| {
                        ComparableSale::new(
                            "Nintendo Switch OLED console",
                            price,
                            Money::free(),
                            "Pre-owned",
                            SaleDate::Sold("2024-09-01".into()),
                        )
                    })
                    .collect(),
            )
        }
    }

    fn app() -> Router {
        let aggregator = Arc::new(
            Aggregator::new(Arc::new(TieredCache::in_memory())).with_source(Arc::new(UsedSwitches)),
        );
        let (queue, _worker) =
            jobs::JobQueue::spawn(aggregator.clone(), std::time::Duration::from_secs(60));
        router(AppState {
            aggregator,
            queue,
            monitor: Arc::new(FailureMonitor::default()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn comps_endpoint_returns_result_and_link() {
        let (status, body) = send(
            app(),
            post_json("/comps", json!({"text": "Nintendo Switch OLED", "condition": "used"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source"], "free-search");
        assert_eq!(body["confidence"], "high");
        assert_eq!(body["provenance"], "live");
        assert_eq!(body["market_value"], 260.0);
        assert!(body["search_url"].as_str().unwrap().contains("LH_Sold=1"));
    }

    #[tokio::test]
    async fn comps_endpoint_rejects_blank_query() {
        let (status, body) = send(app(), post_json("/comps", json!({"text": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_input");
    }

    #[tokio::test]
    async fn decision_endpoint_runs_the_engine() {
        let (status, body) = send(
            app(),
            post_json(
                "/decision",
                json!({"buy_price": 20, "shipping_in": 5, "expected_sale_price": 60}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["verdict"], "flip");
        assert_eq!(body["margin_percent"], 100.0);
        assert_eq!(body["trace"].as_array().unwrap().len(), 9);
    }

    #[tokio::test]
    async fn evaluate_uses_condition_matched_median() {
        let (status, body) = send(
            app(),
            post_json(
                "/evaluate",
                json!({
                    "text": "Nintendo Switch OLED",
                    "condition": "used",
                    "buy_price": 150,
                    "shipping_in": "Free"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["market_value"], 260.0);
        assert_eq!(body["decision"]["verdict"], "flip");
        assert_eq!(body["decision"]["confidence"], 90);
    }

    #[tokio::test]
    async fn evaluate_never_substitutes_the_other_bucket() {
        let (status, body) = send(
            app(),
            post_json(
                "/evaluate",
                json!({"text": "Nintendo Switch OLED", "condition": "new_like", "buy_price": 150}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["market_value"].is_null());
        assert!(body.get("decision").is_none());
        assert!(body["message"].as_str().unwrap().contains("new-like"));
    }

    #[tokio::test]
    async fn evaluate_without_condition_prices_from_used_bucket() {
        let (status, body) = send(
            app(),
            post_json(
                "/evaluate",
                json!({"text": "Nintendo Switch OLED Deluxe", "buy_price": 60}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["comps"]["buckets"]["all"]["median"], 62.5);
        assert_eq!(body["market_value"], 52.5);
        assert_eq!(body["decision"]["market_value"], 52.5);
        assert_eq!(body["decision"]["verdict"], "skip");
    }

    #[tokio::test]
    async fn evaluate_without_data_passes_the_manual_prompt_through() {
        let (status, body) = send(
            app(),
            post_json("/evaluate", json!({"text": "mystery box", "buy_price": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["comps"]["source"], "none");
        assert!(body["message"].as_str().unwrap().contains("Verify the price manually"));
    }

    #[tokio::test]
    async fn search_url_endpoint_builds_sold_link() {
        let request = Request::builder()
            .uri("/search-url?q=pokemon%20charizard")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["category"], "trading_cards");
        assert!(body["url"].as_str().unwrap().contains("_sacat=183454"));
    }

    #[tokio::test]
    async fn cache_stats_count_lookups() {
        let app = app();
        send(app.clone(), post_json("/comps", json!({"text": "switch lite"}))).await;
        send(app.clone(), post_json("/comps", json!({"text": "switch lite"}))).await;
        let request = Request::builder().uri("/cache/stats").body(Body::empty()).unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cache"]["hits"], 1);
        assert_eq!(body["cache"]["primary_entries"], 1);
        assert_eq!(body["upstream"]["recent_samples"], json!([]));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let uri = format!("/jobs/{}", uuid::Uuid::new_v4());
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, _) = send(app(), request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let request = Request::builder().uri("/jobs/not-a-uuid").body(Body::empty()).unwrap();
        let (status, _) = send(app(), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
