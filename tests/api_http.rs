// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /search (happy path + empty query)
// - GET /agents/status, /breaker, /cache/stats, /history/{offer_id}
// - GET /metrics behind DEBUG_ROUTES

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use serial_test::serial;
use tower::ServiceExt as _; // for `oneshot`

use offer_aggregator::api::{self, AppState};
use offer_aggregator::config::AggregatorConfig;
use offer_aggregator::orchestrator::Orchestrator;
use offer_aggregator::sources::FeedAgent;

const BODY_LIMIT: usize = 1024 * 1024;

const ZEPTO_FEED: &str = r#"[
    {"title": "Amul Taaza Milk 500ml", "price": 28, "eta_minutes": 9},
    {"title": "Tata Salt 1kg", "price": 28, "eta_minutes": 9}
]"#;

fn test_router() -> Router {
    let agent = FeedAgent::from_json_str("zepto", ZEPTO_FEED).expect("feed parses");
    let orch = Orchestrator::new(&AggregatorConfig::default()).with_agent(std::sync::Arc::new(agent));
    api::router(AppState::new(orch))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    (status, bytes)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn search(payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/search")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST /search")
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, bytes) = send(&test_router(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(String::from_utf8(bytes).unwrap().trim(), "OK");
}

#[tokio::test]
async fn search_returns_offers_groups_and_report() {
    let app = test_router();
    let (status, bytes) = send(&app, search(json!({"query": "milk", "location": "110001"}))).await;
    assert_eq!(status, StatusCode::OK);

    let v: Json = serde_json::from_slice(&bytes).expect("json");
    let offers = v["offers"].as_array().expect("offers array");
    assert_eq!(offers.len(), 1, "feed filters by query tokens");
    assert_eq!(offers[0]["title"], "Amul Taaza Milk 500ml");
    assert_eq!(offers[0]["unit_price"]["display"], "₹0.06/ml");
    assert_eq!(v["groups"].as_array().map(Vec::len), Some(1));

    let report = &v["report"];
    assert_eq!(report["query"], "milk");
    assert_eq!(report["location"], "110001");
    assert_eq!(report["data_health"]["overall_status"], "healthy");
    assert_eq!(report["sources"][0]["status"], "success");
    assert_eq!(report["sources"][0]["data_source"], "live");

    // The run is now visible through the status endpoints.
    let (_, bytes) = send(&app, get("/agents/status")).await;
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["sources"], json!(["zepto"]));
    assert_eq!(v["last_run"]["total_offers"], 1);

    let (_, bytes) = send(&app, get("/cache/stats")).await;
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["cached_queries"], 1);
    assert_eq!(v["tracked_offers"], 1);
    assert_eq!(v["ttl_secs"], 300);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let (status, bytes) = send(&test_router(), search(json!({"query": "   "}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert!(v["error"].as_str().is_some_and(|e| e.contains("query")));
}

#[tokio::test]
async fn history_lists_points_for_a_searched_offer() {
    let app = test_router();
    let (_, bytes) = send(&app, search(json!({"query": "salt", "location": "110001"}))).await;
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    let id = v["offers"][0]["id"].as_str().expect("offer id").to_string();

    let (status, bytes) = send(&app, get(&format!("/history/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["offer_id"], id);
    assert_eq!(v["points"].as_array().map(Vec::len), Some(1));
    assert_eq!(v["points"][0]["price"], 28.0);

    let (_, bytes) = send(&app, get("/history/UNKNOWN")).await;
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v["points"], json!([]));
}

#[tokio::test]
async fn breaker_is_empty_while_sources_are_healthy() {
    let app = test_router();
    send(&app, search(json!({"query": "milk"}))).await;
    let (status, bytes) = send(&app, get("/breaker")).await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(v, json!({}));
}

#[tokio::test]
#[serial]
async fn metrics_route_is_opt_in() {
    std::env::remove_var("DEBUG_ROUTES");
    let (status, _) = send(&test_router(), get("/metrics")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    std::env::set_var("DEBUG_ROUTES", "1");
    let app = test_router();
    std::env::remove_var("DEBUG_ROUTES");

    send(&app, search(json!({"query": "milk"}))).await;
    let (status, bytes) = send(&app, get("/metrics")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).unwrap();
    assert!(text.contains("aggregator_offers_total"), "{text}");
}
