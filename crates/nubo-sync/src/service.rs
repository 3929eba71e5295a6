//! Sync service: the HTTP front of the dispatcher.
//!
//! One POST endpoint carries the protocol. `/health` and `/metrics` are JSON
//! side routes for operators.

use crate::adapters::{FsArchiveStorage, SqliteStoreProvider, MSGPACK_CONTENT_TYPE};
use crate::credentials::TokenCredentialManager;
use crate::dispatch::Dispatcher;
use crate::domain::config::ServerConfig;
use crate::domain::error::{NuboError, ServerError};
use crate::middleware::{BodyLimitLayer, SyncMetrics, TracingLayer};
use crate::ports::inbound::SyncApi;
use crate::ports::outbound::StoreProvider;
use axum::{
    extract::{DefaultBodyLimit, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE, EXPIRES},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{error, info, warn};

const NO_CACHE: &str = "no-cache, must-revalidate";
const EXPIRED: &str = "Sat, 26 Jul 1997 05:00:00 GMT";

/// Sync service state
pub struct SyncService {
    config: ServerConfig,
    api: Arc<dyn SyncApi>,
    metrics: Arc<SyncMetrics>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_rx: oneshot::Receiver<()>,
}

/// Stops a running [`SyncService`]. Dropping it unused leaves the service
/// running.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: oneshot::Sender<()>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown
    pub fn shutdown(self) {
        let _ = self.tx.send(());
    }
}

impl SyncService {
    /// Create a service around an existing API implementation
    pub fn new(
        config: ServerConfig,
        api: Arc<dyn SyncApi>,
        metrics: Arc<SyncMetrics>,
    ) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        Ok(Self {
            config,
            api,
            metrics,
            shutdown_tx: Some(shutdown_tx),
            shutdown_rx,
        })
    }

    /// SQLite store and archive files under `storage.data_dir`.
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::Config(e.to_string()))?;

        let stores = SqliteStoreProvider::new(config.database_path());
        if !stores.is_installed() {
            warn!(
                path = %stores.path().display(),
                "No database found, requests will fail until `nubo-server install` runs"
            );
        }
        let archives = FsArchiveStorage::new(config.storage.data_dir.clone());
        let credentials = TokenCredentialManager::with_defaults(config.security.token_bytes);

        let metrics = Arc::new(SyncMetrics::new());
        let dispatcher = Dispatcher::new(Arc::new(stores), Arc::new(archives), Arc::new(credentials))
            .with_metrics(Arc::clone(&metrics));

        Self::new(config, Arc::new(dispatcher), metrics)
    }

    /// Handle for stopping the service. Only the first call returns one.
    pub fn shutdown_handle(&mut self) -> Option<ShutdownHandle> {
        self.shutdown_tx.take().map(|tx| ShutdownHandle { tx })
    }

    /// Get metrics
    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let state = AppState {
            api: Arc::clone(&self.api),
            metrics: Arc::clone(&self.metrics),
        };

        // Oversized bodies still get a regular envelope.
        let rejection = Bytes::from(self.api.error_body(&NuboError::ill_formed()));

        let sync_middleware = ServiceBuilder::new()
            .layer(SetResponseHeaderLayer::overriding(
                CACHE_CONTROL,
                HeaderValue::from_static(NO_CACHE),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                EXPIRES,
                HeaderValue::from_static(EXPIRED),
            ))
            .layer(SetResponseHeaderLayer::overriding(
                CONTENT_TYPE,
                HeaderValue::from_static(MSGPACK_CONTENT_TYPE),
            ))
            .layer(BodyLimitLayer::new(
                self.config.limits.max_request_size,
                rejection,
                Arc::clone(&self.metrics),
            ));

        Router::new()
            .route(
                &self.config.http.endpoint,
                post(handle_sync).layer(sync_middleware),
            )
            .route("/health", get(health_check))
            .route("/metrics", get(metrics_snapshot))
            .layer(DefaultBodyLimit::disable())
            .layer(TracingLayer::new())
            .with_state(state)
    }

    /// Bind the configured address and serve until shut down
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = self.config.http_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(format!("{addr}: {e}")))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shut down
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let router = self.router();
        let Self {
            config,
            shutdown_tx: _unclaimed,
            shutdown_rx,
            ..
        } = self;

        info!(
            addr = ?listener.local_addr().ok(),
            endpoint = %config.http.endpoint,
            "Starting sync server"
        );

        let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
        let signal = async move {
            if shutdown_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("Received shutdown signal");
            let _ = signalled_tx.send(());
        };

        let grace = config.http.shutdown_grace;
        let deadline = async move {
            if signalled_rx.await.is_err() {
                std::future::pending::<()>().await;
            }
            tokio::time::sleep(grace).await;
        };

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .into_future();

        tokio::select! {
            result = server => {
                result.map_err(|e| ServerError::Serve(e.to_string()))?;
            }
            () = deadline => {
                warn!(grace_ms = grace.as_millis() as u64, "Shutdown grace period elapsed, dropping open connections");
            }
        }

        info!("Sync server stopped");
        Ok(())
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    api: Arc<dyn SyncApi>,
    metrics: Arc<SyncMetrics>,
}

/// Runs one protocol request on a blocking worker.
async fn handle_sync(State(state): State<AppState>, body: Bytes) -> Response {
    let api = Arc::clone(&state.api);
    let reply = match tokio::task::spawn_blocking(move || api.process(&body)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(error = %e, "Sync worker failed");
            state.metrics.record_worker_failure();
            state.api.error_body(&NuboError::internal())
        }
    };
    (StatusCode::OK, reply).into_response()
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "nubo-sync",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_snapshot(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::RequestEnvelope;
    use crate::domain::error::codes;
    use crate::test_utils::{decode_response, encode_request, error_code, TestHarness};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    struct PanickingApi;

    impl SyncApi for PanickingApi {
        fn process(&self, _body: &[u8]) -> Vec<u8> {
            panic!("handler blew up");
        }

        fn error_body(&self, error: &NuboError) -> Vec<u8> {
            crate::test_utils::encode_value(&error.to_fields().into_value())
        }
    }

    fn service_with(api: Arc<dyn SyncApi>, config: ServerConfig) -> SyncService {
        SyncService::new(config, api, Arc::new(SyncMetrics::new())).unwrap()
    }

    fn harness_service(config: ServerConfig) -> SyncService {
        let harness = TestHarness::new();
        let metrics = Arc::clone(harness.dispatcher.metrics());
        SyncService::new(config, Arc::new(harness.dispatcher), metrics).unwrap()
    }

    fn post_sync(body: impl Into<Body>) -> Request<Body> {
        Request::post("/sync").body(body.into()).unwrap()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
    }

    fn assert_fixed_headers(response: &Response) {
        let headers = response.headers();
        assert_eq!(headers[CACHE_CONTROL], NO_CACHE);
        assert_eq!(headers[EXPIRES], EXPIRED);
        assert_eq!(headers[CONTENT_TYPE], MSGPACK_CONTENT_TYPE);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let mut config = ServerConfig::default();
        config.http.port = 0;
        let err = SyncService::new(config, Arc::new(PanickingApi), Arc::new(SyncMetrics::new()));
        assert!(matches!(err, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn test_sync_endpoint_round_trip() {
        let router = harness_service(ServerConfig::default()).router();
        let body = encode_request(&RequestEnvelope::new("directory"));
        let response = router.oneshot(post_sync(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_fixed_headers(&response);
        let reply = decode_response(&body_bytes(response).await);
        assert_eq!(error_code(&reply), Some(codes::FORBIDDEN));
    }

    #[tokio::test]
    async fn test_garbage_body_is_ill_formed_with_200() {
        let router = harness_service(ServerConfig::default()).router();
        let response = router.oneshot(post_sync(vec![0xc1, 0xff])).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_fixed_headers(&response);
        let reply = decode_response(&body_bytes(response).await);
        assert_eq!(error_code(&reply), Some(codes::ILL_FORMED));
    }

    #[tokio::test]
    async fn test_oversized_body_is_ill_formed() {
        let mut config = ServerConfig::default();
        config.limits.max_request_size = 16;
        let service = harness_service(config);
        let metrics = service.metrics();
        let response = service
            .router()
            .oneshot(post_sync(vec![0u8; 64]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_fixed_headers(&response);
        let reply = decode_response(&body_bytes(response).await);
        assert_eq!(error_code(&reply), Some(codes::ILL_FORMED));
        assert_eq!(
            metrics.oversized_rejected.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_worker_panic_is_internal() {
        let service = service_with(Arc::new(PanickingApi), ServerConfig::default());
        let metrics = service.metrics();
        let response = service.router().oneshot(post_sync(vec![0x80])).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let reply = decode_response(&body_bytes(response).await);
        assert_eq!(error_code(&reply), Some(codes::INTERNAL));
        assert_eq!(
            metrics.worker_failures.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn test_custom_endpoint_path() {
        let mut config = ServerConfig::default();
        config.http.endpoint = "/nubo/api".to_string();
        let router = harness_service(config).router();

        let moved = router
            .clone()
            .oneshot(Request::post("/nubo/api").body(Body::from(vec![0x80])).unwrap())
            .await
            .unwrap();
        assert_eq!(moved.status(), StatusCode::OK);

        let old = router.oneshot(post_sync(vec![0x80])).await.unwrap();
        assert_eq!(old.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let router = harness_service(ServerConfig::default()).router();

        let health = router
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(health).await).unwrap();
        assert_eq!(json["status"], "healthy");

        router
            .clone()
            .oneshot(post_sync(vec![0xc1]))
            .await
            .unwrap();
        let metrics = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body_bytes(metrics).await).unwrap();
        assert_eq!(json["requests"]["total"], 1);
        assert_eq!(json["errors"]["ill_formed"], 1);
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let mut config = ServerConfig::default();
        config.http.shutdown_grace = Duration::from_millis(100);
        let mut service = harness_service(config);
        let handle = service.shutdown_handle().unwrap();
        assert!(service.shutdown_handle().is_none());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(service.serve(listener));
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
