//! Cluster-internal HTTP endpoints served by every node
//!
//! `/health` answers liveness probes; the claim routes are only meaningful
//! on the claim authority, where they front its lease table. This is
//! cluster plumbing, not the user-facing API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::claim::{ClaimCoordinator, ClaimKey, MemoryClaims};
use super::client::{ClaimRequest, ClaimResponse, ReleaseRequest};

/// State shared across cluster handlers
pub struct ClusterState {
    pub node_id: String,
    pub claims: Arc<MemoryClaims>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub node_id: String,
}

async fn health_check(State(state): State<Arc<ClusterState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        node_id: state.node_id.clone(),
    })
}

async fn claim(
    State(state): State<Arc<ClusterState>>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, StatusCode> {
    let key = ClaimKey {
        job_id: request.job_id,
        scheduled_time: request.scheduled_time,
    };

    let granted = state
        .claims
        .claim(key, Duration::from_secs(request.lease_secs))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(ClaimResponse { granted }))
}

async fn release(
    State(state): State<Arc<ClusterState>>,
    Json(request): Json<ReleaseRequest>,
) -> Result<StatusCode, StatusCode> {
    let key = ClaimKey {
        job_id: request.job_id,
        scheduled_time: request.scheduled_time,
    };

    state
        .claims
        .release(key)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(StatusCode::NO_CONTENT)
}

/// Build the cluster router
pub fn build_router(state: Arc<ClusterState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/cluster/claim", post(claim))
        .route("/cluster/release", post(release))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve the cluster endpoints until the task is aborted
pub async fn run_cluster_server(
    bind_addr: &str,
    state: Arc<ClusterState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = bind_addr.parse()?;
    let app = build_router(state);

    tracing::info!(addr = %addr, "Starting cluster server");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use chrono::Utc;
    use tower::util::ServiceExt;

    use super::*;
    use crate::model::JobId;

    fn create_test_app() -> Router {
        let state = Arc::new(ClusterState {
            node_id: "node-test".to_string(),
            claims: Arc::new(MemoryClaims::default()),
        });
        build_router(state)
    }

    fn claim_request(job_id: JobId, scheduled_time: chrono::DateTime<Utc>) -> Request<Body> {
        let body = serde_json::to_string(&ClaimRequest {
            job_id,
            scheduled_time,
            lease_secs: 60,
        })
        .unwrap();

        Request::builder()
            .method("POST")
            .uri("/cluster/claim")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_claim_granted_once() {
        let app = create_test_app();
        let job_id = JobId::new();
        let scheduled = Utc::now();

        let response = app
            .clone()
            .oneshot(claim_request(job_id, scheduled))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: ClaimResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(body.granted);

        let response = app.oneshot(claim_request(job_id, scheduled)).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        let body: ClaimResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(!body.granted);
    }
}
