//! Request body limit for the sync endpoint.
//!
//! Oversized or unreadable bodies never reach the dispatcher. They are
//! answered with a pre-encoded `ILL_FORMED` envelope and status 200, like
//! any other protocol error.

use super::SyncMetrics;
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_LENGTH, Request, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

/// Body limit layer configuration
#[derive(Clone)]
pub struct BodyLimitLayer {
    max_size: usize,
    rejection: Bytes,
    metrics: Arc<SyncMetrics>,
}

impl BodyLimitLayer {
    /// `rejection` is the encoded envelope returned for refused bodies.
    pub fn new(max_size: usize, rejection: impl Into<Bytes>, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            max_size,
            rejection: rejection.into(),
            metrics,
        }
    }
}

impl<S> Layer<S> for BodyLimitLayer {
    type Service = BodyLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BodyLimitService {
            inner,
            max_size: self.max_size,
            rejection: self.rejection.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

/// Body limit service
#[derive(Clone)]
pub struct BodyLimitService<S> {
    inner: S,
    max_size: usize,
    rejection: Bytes,
    metrics: Arc<SyncMetrics>,
}

impl<S> BodyLimitService<S> {
    fn reject(&self) -> Response {
        self.metrics.record_oversized();
        (StatusCode::OK, self.rejection.clone()).into_response()
    }
}

impl<S> Service<Request<Body>> for BodyLimitService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            // Check content-length header first (fast path)
            let declared = req
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<usize>().ok());
            if let Some(len) = declared {
                if len > limiter.max_size {
                    warn!(size = len, max = limiter.max_size, "Request too large (from header)");
                    return Ok(limiter.reject());
                }
            }

            let (parts, body) = req.into_parts();
            let body = match to_bytes(body, limiter.max_size).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, max = limiter.max_size, "Failed to read request body");
                    return Ok(limiter.reject());
                }
            };

            inner.call(Request::from_parts(parts, Body::from(body))).await
        })
    }
}
