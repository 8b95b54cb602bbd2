//! Forwarding of admitted requests to the chat backend

use axum::{
    body::Body,
    extract::{Request, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::health::{HealthChecker, HealthStatus};

/// HTTP client type for forwarding requests
pub type HttpClient = Client<HttpConnector, Body>;

/// Headers that only apply to a single hop
const HOP_BY_HOP: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Forwarding target
pub struct Forwarder {
    /// Backend base URL, without trailing slash
    backend: String,
    client: HttpClient,
    timeout: Duration,
    health: Option<Arc<HealthChecker>>,
}

impl Forwarder {
    /// Create a forwarder for `backend`
    pub fn new(backend: &str, timeout: Duration) -> Self {
        let client: HttpClient = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build_http();

        Self {
            backend: backend.trim_end_matches('/').to_string(),
            client,
            timeout,
            health: None,
        }
    }

    /// Refuse to forward while the health checker reports the backend down
    pub fn with_health(mut self, health: Arc<HealthChecker>) -> Self {
        self.health = Some(health);
        self
    }

    /// Backend status, `Unknown` when no checker is attached
    pub async fn backend_status(&self) -> HealthStatus {
        match &self.health {
            Some(health) => health.status().await,
            None => HealthStatus::Unknown,
        }
    }

    pub fn health_checker(&self) -> Option<&Arc<HealthChecker>> {
        self.health.as_ref()
    }

    fn target_uri(&self, original: &Uri) -> Result<Uri, axum::http::uri::InvalidUri> {
        let path_and_query = original
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("/");
        format!("{}{}", self.backend, path_and_query).parse()
    }

    /// Send the request to the backend and relay its response
    pub async fn forward(&self, req: Request) -> Response {
        if self.backend_status().await == HealthStatus::Unhealthy {
            warn!("Backend {} is unhealthy, returning 503", self.backend);
            return (StatusCode::SERVICE_UNAVAILABLE, "Backend Unavailable").into_response();
        }

        let uri = match self.target_uri(req.uri()) {
            Ok(uri) => uri,
            Err(e) => {
                error!("Invalid forward URI: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Error").into_response();
            }
        };
        debug!("Forwarding {} {} to {}", req.method(), req.uri(), uri);

        let (mut parts, body) = req.into_parts();
        parts.uri = uri;
        for header in HOP_BY_HOP {
            parts.headers.remove(header);
        }

        let forward_req = Request::from_parts(parts, body);

        match tokio::time::timeout(self.timeout, self.client.request(forward_req)).await {
            Ok(Ok(response)) => {
                let (parts, body) = response.into_parts();
                Response::from_parts(parts, Body::new(body))
            }
            Ok(Err(e)) => {
                error!("Backend error: {}", e);
                (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
            }
            Err(_) => {
                error!("Backend {} timed out after {:?}", self.backend, self.timeout);
                (StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout").into_response()
            }
        }
    }
}

/// Fallback handler - forwards every request that reached it
pub async fn forward_handler(State(forwarder): State<Arc<Forwarder>>, req: Request) -> Response {
    forwarder.forward(req).await
}
