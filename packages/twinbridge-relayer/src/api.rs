//! HTTP server for health and metrics endpoints

use std::collections::BTreeMap;
use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use eyre::eyre;
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::relay_loop::{ChainStatus, SharedStatus};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub chains: BTreeMap<String, ChainStatus>,
}

/// Full status of every poller
async fn health_check(State(status): State<SharedStatus>) -> Json<HealthResponse> {
    let chains = status.read().await.clone();
    Json(HealthResponse {
        status: "healthy",
        chains,
    })
}

/// Liveness check (always returns OK if server is running)
async fn liveness() -> &'static str {
    "OK"
}

/// Ready once every chain has completed a scan
async fn readiness(State(status): State<SharedStatus>) -> (StatusCode, &'static str) {
    let chains = status.read().await;
    if !chains.is_empty() && chains.values().all(|c| c.last_scanned_block.is_some()) {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

pub fn router(status: SharedStatus) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(status)
}

/// Serve health and metrics until `shutdown` flips to true
pub async fn start_server(
    port: u16,
    status: SharedStatus,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port)
        .parse()
        .map_err(|e| eyre!("Invalid bind port {}: {}", port, e))?;
    info!("Health server listening on {}", addr);
    info!("  /health  - Per-chain relay status (JSON)");
    info!("  /metrics - Prometheus metrics");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_with(block: Option<u64>) -> SharedStatus {
        let status = SharedStatus::default();
        status.try_write().unwrap().insert(
            "avax".to_string(),
            ChainStatus {
                last_scanned_block: block,
                ..ChainStatus::default()
            },
        );
        status
    }

    #[tokio::test]
    async fn test_health_lists_chains() {
        let Json(body) = health_check(State(status_with(Some(120)))).await;
        assert_eq!(body.status, "healthy");
        assert_eq!(body.chains["avax"].last_scanned_block, Some(120));
    }

    #[tokio::test]
    async fn test_readiness_waits_for_first_scan() {
        let (code, _) = readiness(State(status_with(None))).await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        let (code, _) = readiness(State(status_with(Some(1)))).await;
        assert_eq!(code, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_encodes_text() {
        crate::metrics::UP.set(1.0);
        let response = prometheus_metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
