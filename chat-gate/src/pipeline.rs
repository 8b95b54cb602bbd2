//! Admission pipeline
//!
//! An ordered list of [`Stage`]s run by a small dispatcher. The first stage
//! that rejects ends the request; if every stage passes, the downstream
//! handler runs exactly once. The axum middleware at the bottom of this
//! file is a thin adapter, so stages can be tested without a server.

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::AdmissionError;
use crate::identity::Identity;

/// The parts of a request an admission stage may look at
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    /// Request path, without query string
    pub path: &'a str,
    /// Identity set by the upstream stage, if any
    pub identity: Option<&'a Identity>,
}

impl<'a> GateRequest<'a> {
    pub fn new(path: &'a str, identity: Option<&'a Identity>) -> Self {
        Self { path, identity }
    }
}

/// One admission step
#[async_trait]
pub trait Stage: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Accept or reject the request
    async fn evaluate(&self, request: &GateRequest<'_>) -> Result<(), AdmissionError>;
}

/// Ordered admission stages
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Create an empty pipeline (admits everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage
    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order, stopping at the first rejection
    pub async fn admit(&self, request: &GateRequest<'_>) -> Result<(), AdmissionError> {
        for stage in &self.stages {
            if let Err(rejection) = stage.evaluate(request).await {
                debug!(
                    "Stage '{}' rejected {}: {}",
                    stage.name(),
                    request.path,
                    rejection
                );
                return Err(rejection);
            }
        }
        Ok(())
    }

    /// Run the stages, then `downstream` if all of them passed
    pub async fn dispatch<F, Fut, T>(
        &self,
        request: &GateRequest<'_>,
        downstream: F,
    ) -> Result<T, AdmissionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.admit(request).await?;
        Ok(downstream().await)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline").field("stages", &names).finish()
    }
}

/// Percent-decode a request path the way a backend router would see it.
///
/// Gated paths are compared against this form, so `/ch%61t` is `/chat`.
pub fn decoded_path(raw: &str) -> Result<String, AdmissionError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|_| AdmissionError::InvalidPath(raw.to_string()))
}

/// Admission middleware - runs the pipeline in front of the next handler.
///
/// Rejections are answered here with a plain-text body; admitted requests
/// are passed on unmodified.
pub async fn admission_middleware(
    State(pipeline): State<Arc<Pipeline>>,
    req: Request,
    next: Next,
) -> Response {
    let path = match decoded_path(req.uri().path()) {
        Ok(path) => path,
        Err(rejection) => {
            warn!("Rejecting undecodable path {}", req.uri().path());
            return rejection.into_response();
        }
    };
    let identity = req.extensions().get::<Identity>().cloned();
    let request = GateRequest::new(&path, identity.as_ref());

    match pipeline.dispatch(&request, || next.run(req)).await {
        Ok(response) => response,
        Err(rejection) => {
            if rejection.is_dependency_failure() {
                error!("Admission for {} failed on a data source: {:?}", path, rejection);
            }
            rejection.into_response()
        }
    }
}
