//! Dashboard — Axum web server exposing the operator controls.
//!
//! Serves a JSON API only: scheduler status, the latest scan, start/stop,
//! parameters and the auto-notify toggle. CORS enabled so a separately
//! hosted front end can call it.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;

    info!(port, "Dashboard server starting on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/market", get(routes::get_market))
        .route("/api/scan/start", post(routes::start_scan))
        .route("/api/scan/stop", post(routes::stop_scan))
        .route(
            "/api/parameters",
            get(routes::get_parameters).put(routes::put_parameters),
        )
        .route("/api/notify", put(routes::put_notify))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::ScanPipeline;
    use crate::engine::scheduler::ScanScheduler;
    use crate::llm::MockSignalAnalyzer;
    use crate::market::MockSnapshotSource;
    use crate::types::{
        ActiveSymbolSet, FearGreedIndex, MarketIndicators, MarketSnapshot, ScanParameters,
        TickerSnapshot,
    };
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mut source = MockSnapshotSource::new();
        source.expect_fetch_snapshot().returning(|| {
            Ok(MarketSnapshot {
                tickers: TickerSnapshot::new(Vec::new()),
                active_symbols: ActiveSymbolSet::default(),
                indicators: MarketIndicators {
                    btc_dominance_pct: 56.0,
                    total_market_cap_usd: 2.3e12,
                    fear_greed: FearGreedIndex { value: 30, classification: "Fear".into() },
                },
            })
        });
        let analyzer = MockSignalAnalyzer::new();
        let pipeline = ScanPipeline::new(Arc::new(source), Arc::new(analyzer), Duration::from_secs(5));
        Arc::new(ScanScheduler::new(pipeline, ScanParameters::default(), None, true))
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str) -> Request<Body> {
        Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap()
    }

    fn put_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let resp = build_router(test_state()).oneshot(get_req("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint_idle() {
        let resp = build_router(test_state()).oneshot(get_req("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = json_body(resp).await;
        assert_eq!(json["status"], "IDLE");
        assert_eq!(json["active"], false);
        assert_eq!(json["countdown_secs"], 0);
        assert_eq!(json["auto_notify"], true);
        assert!(json["notifications"].is_null());
    }

    #[tokio::test]
    async fn test_market_not_found_before_first_scan() {
        let resp = build_router(test_state()).oneshot(get_req("/api/market")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let state = test_state();

        let resp = build_router(state.clone()).oneshot(post_req("/api/scan/start")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = build_router(state.clone()).oneshot(post_req("/api/scan/start")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let json = json_body(resp).await;
        assert!(json["error"].as_str().unwrap().contains("already active"));

        let resp = build_router(state.clone()).oneshot(post_req("/api/scan/stop")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = build_router(state).oneshot(post_req("/api/scan/stop")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_parameters_roundtrip() {
        let state = test_state();
        let mut params = serde_json::to_value(ScanParameters::default()).unwrap();
        params["min_volume_usd"] = serde_json::json!(2_000_000.0);

        let resp = build_router(state.clone())
            .oneshot(put_json("/api/parameters", params))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = build_router(state).oneshot(get_req("/api/parameters")).await.unwrap();
        let json = json_body(resp).await;
        assert_eq!(json["min_volume_usd"], 2_000_000.0);
    }

    #[tokio::test]
    async fn test_invalid_parameters_rejected() {
        let mut params = serde_json::to_value(ScanParameters::default()).unwrap();
        params["lookback_candles"] = serde_json::json!(3);

        let resp = build_router(test_state())
            .oneshot(put_json("/api/parameters", params))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_parameters_locked_while_active() {
        let state = test_state();
        state.start().await.unwrap();

        let params = serde_json::to_value(ScanParameters::default()).unwrap();
        let resp = build_router(state.clone())
            .oneshot(put_json("/api/parameters", params))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        state.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_notify_toggle() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(put_json("/api/notify", serde_json::json!({ "enabled": false })))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["auto_notify"], false);
        assert!(!state.auto_notify());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_put() {
        let req = Request::builder()
            .method("OPTIONS")
            .uri("/api/parameters")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "PUT")
            .body(Body::empty())
            .unwrap();
        let resp = build_router(test_state()).oneshot(req).await.unwrap();
        assert!(resp.status().is_success());
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");
    }
}
