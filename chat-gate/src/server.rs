//! Gate HTTP server

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::admission::AdmissionCheck;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::forward::{forward_handler, Forwarder};
use crate::health::{HealthChecker, HealthStatus};
use crate::identity::identity_middleware;
use crate::pipeline::{admission_middleware, Pipeline};
use crate::store::QuotaStore;

/// Shared state for the gate's own endpoints
pub struct GateState {
    /// Quota store, pinged by readiness
    pub store: Arc<dyn QuotaStore>,
    /// Forwarder to the chat backend
    pub forwarder: Arc<Forwarder>,
}

/// Wrap `router` with identity extraction and the admission pipeline.
///
/// Identity runs first, then admission, then whatever `router` routes to.
pub fn gate<S>(router: Router<S>, pipeline: Arc<Pipeline>, identity_header: HeaderName) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn_with_state(pipeline, admission_middleware))
        .layer(middleware::from_fn_with_state(
            Arc::new(identity_header),
            identity_middleware,
        ))
}

/// Gate server
pub struct GateServer {
    config: GateConfig,
    state: Arc<GateState>,
    pipeline: Arc<Pipeline>,
    identity_header: HeaderName,
}

impl GateServer {
    /// Create a gate server over `store`
    pub fn new<S>(config: GateConfig, store: Arc<S>) -> Result<Self>
    where
        S: QuotaStore + 'static,
    {
        config.validate()?;

        let identity_header = HeaderName::try_from(config.identity.header.as_str())
            .map_err(|e| GateError::Config(format!("Invalid identity header: {}", e)))?;

        let check = AdmissionCheck::with_policy(store.clone(), store.clone(), &config.quota);
        let pipeline = Arc::new(Pipeline::new().with_stage(Arc::new(check)));

        let mut forwarder = Forwarder::new(
            &config.backend.url,
            Duration::from_secs(config.server.timeout_seconds),
        );
        if let Some(path) = &config.backend.health_check {
            forwarder = forwarder.with_health(Arc::new(HealthChecker::new(&config.backend.url, path)?));
        }

        let state = Arc::new(GateState {
            store,
            forwarder: Arc::new(forwarder),
        });

        Ok(Self {
            config,
            state,
            pipeline,
            identity_header,
        })
    }

    /// The admission pipeline in front of the backend
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        let routes = Router::new()
            .route("/health", get(health_endpoint))
            .route("/ready", get(readiness_endpoint))
            .with_state(self.state.clone())
            .fallback_service(
                Router::new()
                    .fallback(forward_handler)
                    .with_state(self.state.forwarder.clone()),
            );

        gate(routes, self.pipeline.clone(), self.identity_header.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Run the gate server
    pub async fn run(&self) -> Result<()> {
        if let Some(checker) = self.state.forwarder.health_checker() {
            checker.clone().start_background_checks();
        }

        let addr = &self.config.server.listen_addr;
        info!("Starting chat gate on {}", addr);
        info!("  Backend: {}", self.config.backend.url);
        info!("  Gated paths: {}", self.config.quota.gated_paths.join(", "));
        info!("  Default rate limit: {}", self.config.quota.default_limit);
        info!("  Identity header: {}", self.identity_header);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .await
            .map_err(|e| GateError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;

        Ok(())
    }
}

/// Health check endpoint
async fn health_endpoint() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "chat-gate",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness endpoint - checks the quota store and backend
async fn readiness_endpoint(State(state): State<Arc<GateState>>) -> impl IntoResponse {
    if let Err(e) = state.store.ping().await {
        warn!("Quota store not ready: {}", e);
        return (StatusCode::SERVICE_UNAVAILABLE, "Not Ready");
    }

    match state.forwarder.backend_status().await {
        HealthStatus::Unhealthy => (StatusCode::SERVICE_UNAVAILABLE, "Not Ready"),
        HealthStatus::Healthy | HealthStatus::Unknown => (StatusCode::OK, "Ready"),
    }
}
