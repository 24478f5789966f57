use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::breaker::CircuitState;
use crate::cache::{CacheStats, PriceHistoryPoint};
use crate::config::AggregatorConfig;
use crate::metrics::Metrics;
use crate::orchestrator::{Aggregation, Orchestrator};
use crate::telemetry::Report;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

/// `/metrics` is only mounted with DEBUG_ROUTES=1.
fn debug_routes_enabled() -> bool {
    std::env::var("DEBUG_ROUTES").ok().is_some_and(|v| v == "1")
}

pub fn router(state: AppState) -> Router {
    let ttl_secs = state.orchestrator.cache().stats().ttl_secs;

    let mut app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/search", post(search))
        .route("/agents/status", get(agents_status))
        .route("/breaker", get(breaker_status))
        .route("/cache/stats", get(cache_stats))
        .route("/history/{offer_id}", get(price_history))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    if debug_routes_enabled() {
        match Metrics::init(ttl_secs) {
            Ok(m) => app = app.merge(m.router()),
            Err(e) => warn!(error = ?e, "metrics route disabled"),
        }
    }
    app
}

/// Router wired from `AggregatorConfig::load_default()`; what the binary serves.
pub fn app_from_env() -> anyhow::Result<Router> {
    let cfg = AggregatorConfig::load_default()?;
    let orchestrator = Orchestrator::from_config(&cfg)?;
    Ok(router(AppState::new(orchestrator)))
}

#[derive(Deserialize)]
struct SearchReq {
    query: String,
    #[serde(default)]
    location: String,
}

type ApiError = (StatusCode, Json<serde_json::Value>);

async fn search(
    State(state): State<AppState>,
    Json(body): Json<SearchReq>,
) -> Result<Json<Aggregation>, ApiError> {
    let query = body.query.trim();
    if query.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "query must not be empty" })),
        ));
    }
    let agg = state
        .orchestrator
        .orchestrate(query, body.location.trim())
        .await;
    Ok(Json(agg))
}

#[derive(Serialize)]
struct AgentsStatus {
    sources: Vec<String>,
    last_run: Option<Report>,
}

async fn agents_status(State(state): State<AppState>) -> Json<AgentsStatus> {
    Json(AgentsStatus {
        sources: state.orchestrator.agent_names(),
        last_run: state.orchestrator.last_report(),
    })
}

async fn breaker_status(
    State(state): State<AppState>,
) -> Json<std::collections::BTreeMap<String, CircuitState>> {
    Json(state.orchestrator.breaker().status())
}

async fn cache_stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.orchestrator.cache().stats())
}

#[derive(Serialize)]
struct HistoryResp {
    offer_id: String,
    points: Vec<PriceHistoryPoint>,
}

async fn price_history(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Json<HistoryResp> {
    let points = state.orchestrator.cache().get_history(&offer_id);
    Json(HistoryResp { offer_id, points })
}
