use crate::cache::{CacheError, TargetCache};
use crate::config::ServiceConfig;
use crate::metrics::DiscoveryMetrics;
use crate::resolver::TargetGroup;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const SERVICE_NAME: &str = "Proxmox VM Discovery Service";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    pub proxmox_host: String,
    pub cache_age_seconds: Option<u64>,
    pub cached_targets: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct DiscoveryApi {
    cache: Arc<TargetCache>,
    metrics: Arc<DiscoveryMetrics>,
    config: Arc<ServiceConfig>,
}

impl DiscoveryApi {
    pub fn new(
        cache: Arc<TargetCache>,
        metrics: Arc<DiscoveryMetrics>,
        config: Arc<ServiceConfig>,
    ) -> Self {
        Self {
            cache,
            metrics,
            config,
        }
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/targets", get(targets_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.config.bind_addr;
        let router = Arc::new(self).router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Discovery API listening on {}", addr);

        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        tracing::info!("Shutting down discovery service");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": VERSION,
        "endpoints": {
            "/targets": "Prometheus HTTP SD targets",
            "/health": "Health check",
            "/metrics": "Prometheus metrics",
        }
    }))
}

async fn targets_handler(
    State(state): State<Arc<DiscoveryApi>>,
) -> Result<Json<Vec<TargetGroup>>, CacheError> {
    let targets = state.cache.get_targets().await?;
    Ok(Json((*targets).clone()))
}

async fn health_handler(State(state): State<Arc<DiscoveryApi>>) -> Json<HealthStatus> {
    let status = state.cache.status().await;
    Json(HealthStatus {
        status: "healthy".to_string(),
        proxmox_host: state.config.proxmox.host.clone(),
        cache_age_seconds: status.age_secs(),
        cached_targets: status.cached_targets,
    })
}

async fn metrics_handler(State(state): State<Arc<DiscoveryApi>>) -> impl IntoResponse {
    let status = state.cache.status().await;
    let output = state.metrics.render_prometheus(&status);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)],
        output,
    )
}
