//! # HTTP Transport
//!
//! The full stack: `SyncService::from_config` over an installed data
//! directory, driven through the router and through a real TCP listener.

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use nubo_sync::admin;
    use nubo_sync::domain::error::codes;
    use nubo_sync::test_utils::{
        decode_response, encode_request, error_code, init_params, TEST_PASSWORD,
    };
    use nubo_sync::{RequestEnvelope, ResponseMap, ServerConfig, SqliteStoreProvider, SyncService};
    use rmpv::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tower::ServiceExt;

    fn installed_config() -> (TempDir, ServerConfig) {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.storage.data_dir = tmp.path().join("data");
        config.security.password_rounds = 16;
        config.http.shutdown_grace = Duration::from_millis(200);
        admin::install(
            &config,
            &SqliteStoreProvider::new(config.database_path()),
            TEST_PASSWORD,
        )
        .unwrap();
        (tmp, config)
    }

    async fn post(router: &Router, envelope: &RequestEnvelope) -> ResponseMap {
        let request = Request::post("/sync")
            .body(Body::from(encode_request(envelope)))
            .unwrap();
        let response = router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/x-msgpack");
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        decode_response(&body)
    }

    #[tokio::test]
    async fn test_session_over_router() {
        let (_tmp, config) = installed_config();
        let router = SyncService::from_config(config).unwrap().router();

        let init = post(
            &router,
            &RequestEnvelope::new("init").with_params(init_params(TEST_PASSWORD, "laptop", "home")),
        )
        .await;
        let auth = init.get("auth").cloned().unwrap();

        let echoed = post(
            &router,
            &RequestEnvelope::new("test")
                .with_auth(auth.clone())
                .with_params(Value::from("over http")),
        )
        .await;
        assert_eq!(echoed.get("test"), Some(&Value::from("over http")));
        let renewed = echoed.get("auth").cloned().unwrap();
        assert_ne!(renewed, auth);

        // Unknown commands are still answered with the fixed envelope.
        let unknown = post(&router, &RequestEnvelope::new("phpinfo").with_auth(renewed)).await;
        assert_eq!(error_code(&unknown), Some(codes::BAD_COMMAND));
    }

    #[tokio::test]
    async fn test_uninstalled_server_reports_database() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.storage.data_dir = tmp.path().join("never-installed");
        let router = SyncService::from_config(config).unwrap().router();

        let response = post(
            &router,
            &RequestEnvelope::new("init").with_params(init_params("pw", "c", "h")),
        )
        .await;
        assert_eq!(error_code(&response), Some(codes::DATABASE));
    }

    /// One HTTP/1.1 exchange over a raw socket.
    async fn raw_post(addr: std::net::SocketAddr, body: &[u8]) -> (String, Vec<u8>) {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let head = format!(
            "POST /sync HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(body).await.unwrap();

        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let split = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        let head = String::from_utf8_lossy(&raw[..split]).to_string();
        (head, raw[split + 4..].to_vec())
    }

    #[tokio::test]
    async fn test_real_listener() {
        let (_tmp, config) = installed_config();
        let mut service = SyncService::from_config(config).unwrap();
        let stop = service.shutdown_handle().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(service.serve(listener));

        let envelope =
            RequestEnvelope::new("init").with_params(init_params(TEST_PASSWORD, "laptop", "home"));
        let (head, body) = raw_post(addr, &encode_request(&envelope)).await;
        let head = head.to_ascii_lowercase();
        assert!(head.starts_with("http/1.1 200"), "{head}");
        assert!(head.contains("cache-control: no-cache, must-revalidate"));
        assert!(head.contains("expires: sat, 26 jul 1997 05:00:00 gmt"));
        assert!(head.contains("content-type: application/x-msgpack"));
        assert!(decode_response(&body).get("auth").is_some());

        let (head, body) = raw_post(addr, b"\xc1 not msgpack").await;
        assert!(head.to_ascii_lowercase().starts_with("http/1.1 200"));
        assert_eq!(error_code(&decode_response(&body)), Some(codes::ILL_FORMED));

        stop.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
