//! Local HTTP API for browsing a decrypted archive.
//!
//! Binds to localhost by default, allows CORS only from the configured
//! frontend origins and optionally serves the built frontend at `/`.

pub mod errors;
pub mod paths;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::config::ServerConfig;
use crate::session::SessionManager;

pub use errors::{ApiError, ApiResult};

/// State shared by all handlers
pub struct AppState {
    pub sessions: SessionManager,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(sessions: SessionManager, config: ServerConfig) -> Self {
        Self { sessions, config }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// Build the application router
pub fn router(state: Arc<AppState>) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes()));

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/status", get(routes::status))
        .route("/api/default-signal-path", get(routes::default_path))
        .route("/api/upload", post(routes::upload))
        .route("/api/init-volume", post(routes::init_volume))
        .route("/api/logout", post(routes::logout))
        .route("/api/conversations", get(routes::conversations))
        .route("/api/conversations/{id}/messages", get(routes::messages))
        .route("/api/conversations/{id}/stats", get(routes::conversation_stats))
        .route("/api/search", post(routes::search))
        .layer(middleware)
        .with_state(Arc::clone(&state));

    match &state.config.static_dir {
        Some(dir) if dir.is_dir() => {
            log::info!("Serving static files from {:?}", dir);
            app.fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
        }
        Some(dir) => {
            log::warn!("Static files not found at {:?}. Frontend will not be served.", dir);
            app
        }
        None => app,
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    log::info!("Signal archive server shutting down");
}

/// Serve the API until Ctrl-C, then release the session
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("Signal archive server started on http://{}", listener.local_addr()?);

    axum::serve(listener, router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.sessions.logout().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StaticCredentialStore;
    use crate::test_support::{create_signal_db, create_signal_dir, write_config, zero_key};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(
            SessionManager::new(Arc::new(StaticCredentialStore::new("unused"))),
            ServerConfig::default(),
        ))
    }

    async fn send(state: &Arc<AppState>, request: Request<Body>) -> Response {
        router(Arc::clone(state)).oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn init_volume(state: &Arc<AppState>, dir: &std::path::Path) -> Response {
        let uri = format!("/api/init-volume?signal_path={}", dir.display());
        send(state, post_empty(&uri)).await
    }

    const BOUNDARY: &str = "signal-archive-test-boundary";

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, filename, content) in parts {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    BOUNDARY, name, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(parts: &[(&str, &str, &[u8])]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(&test_state(), get_request("/api/health")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_status_uninitialized() {
        let response = send(&test_state(), get_request("/api/status")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["initialized"], false);
        assert!(body["mode"].is_null());
        assert!(body["conversation_count"].is_null());
    }

    #[tokio::test]
    async fn test_data_endpoints_unavailable_without_session() {
        let state = test_state();
        for uri in [
            "/api/conversations",
            "/api/conversations/conv-alice/messages",
            "/api/conversations/conv-alice/stats",
        ] {
            let response = send(&state, get_request(uri)).await;
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "{}", uri);
            let body = json_body(response).await;
            assert!(body["detail"].as_str().unwrap().contains("not initialized"));
        }

        let response = send(&state, post_json("/api/search", serde_json::json!({"query": "x"}))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_init_volume_and_browse() {
        let temp = TempDir::new().unwrap();
        create_signal_dir(temp.path());
        let state = test_state();

        let response = init_volume(&state, temp.path()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["conversation_count"], 3);

        let body = json_body(send(&state, get_request("/api/status")).await).await;
        assert_eq!(body["initialized"], true);
        assert_eq!(body["mode"], "volume");

        let body = json_body(send(&state, get_request("/api/conversations?limit=2")).await).await;
        let conversations = body.as_array().unwrap();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0]["id"], "conv-alice");
        assert_eq!(conversations[0]["type"], "private");
        assert_eq!(conversations[0]["message_count"], 5);

        let response = send(
            &state,
            get_request("/api/conversations/conv-alice/messages?page=1&page_size=2"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["total"], 5);
        assert_eq!(body["has_more"], true);
        assert_eq!(body["messages"][0]["id"], "msg-a5");
        assert_eq!(body["messages"][0]["timestamp"], "2023-11-14T22:13:25Z");

        let body = json_body(send(&state, get_request("/api/conversations/conv-alice/stats")).await).await;
        assert_eq!(body["total_messages"], 5);
        assert_eq!(body["talk_more_percentage"], 40);

        let response = send(
            &state,
            post_json("/api/search", serde_json::json!({"query": "lunch"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let results = json_body(response).await;
        assert_eq!(results.as_array().unwrap().len(), 1);
        assert_eq!(results[0]["has_attachments"], true);
    }

    #[tokio::test]
    async fn test_bad_pagination_and_search_bodies() {
        let temp = TempDir::new().unwrap();
        create_signal_dir(temp.path());
        let state = test_state();
        assert_eq!(init_volume(&state, temp.path()).await.status(), StatusCode::OK);

        for uri in [
            "/api/conversations/conv-alice/messages?page=0",
            "/api/conversations/conv-alice/messages?page_size=0",
            "/api/conversations/conv-alice/messages?page_size=501",
            "/api/conversations/conv-alice/messages?page=abc",
        ] {
            let response = send(&state, get_request(uri)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert!(json_body(response).await["detail"].is_string());
        }

        for body in [
            serde_json::json!({"query": ""}),
            serde_json::json!({"query": "x", "limit": 201}),
            serde_json::json!({"limit": 10}),
        ] {
            let response = send(&state, post_json("/api/search", body.clone())).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        }
    }

    #[tokio::test]
    async fn test_stats_for_empty_conversation_is_404() {
        let temp = TempDir::new().unwrap();
        create_signal_dir(temp.path());
        let state = test_state();
        init_volume(&state, temp.path()).await;

        let response = send(&state, get_request("/api/conversations/nobody/stats")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_init_volume_missing_files() {
        let temp = TempDir::new().unwrap();
        let state = test_state();

        let response = init_volume(&state, temp.path()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.starts_with("config.json not found at"));

        write_config(temp.path(), &"0".repeat(64));
        let response = init_volume(&state, temp.path()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.starts_with("db.sqlite not found at"));
    }

    #[tokio::test]
    async fn test_init_volume_bad_key_is_500() {
        let temp = TempDir::new().unwrap();
        create_signal_db(temp.path(), &zero_key());
        write_config(temp.path(), "abc");
        let state = test_state();

        let response = init_volume(&state, temp.path()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.starts_with("Failed to initialize from volume:"));
        assert!(detail.contains("got 3"));
    }

    #[tokio::test]
    async fn test_upload_and_logout() {
        let temp = TempDir::new().unwrap();
        let db_path = create_signal_db(temp.path(), &zero_key());
        let db_bytes = std::fs::read(db_path).unwrap();
        let config = format!(r#"{{"key":"{}"}}"#, "0".repeat(64));
        let state = test_state();

        let response = send(
            &state,
            upload_request(&[
                ("config", "config.json", config.as_bytes()),
                ("database", "db.sqlite", &db_bytes),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["conversation_count"], 3);
        assert_eq!(
            body["message"],
            "Successfully loaded Signal database with 3 conversations"
        );

        let body = json_body(send(&state, get_request("/api/status")).await).await;
        assert_eq!(body["mode"], "upload");

        let response = send(&state, post_empty("/api/logout")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["initialized"], false);
        assert_eq!(body["message"], "Logged out successfully");

        // Idempotent
        assert_eq!(send(&state, post_empty("/api/logout")).await.status(), StatusCode::OK);
        let response = send(&state, get_request("/api/conversations")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_upload_failures_are_400() {
        let state = test_state();

        let response = send(
            &state,
            upload_request(&[("config", "config.json", br#"{"key":"abc"}"#)]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.starts_with("Failed to process uploaded files:"));
        assert!(detail.contains("database"));

        let temp = TempDir::new().unwrap();
        let db_bytes = std::fs::read(create_signal_db(temp.path(), &zero_key())).unwrap();
        let response = send(
            &state,
            upload_request(&[
                ("config", "config.json", br#"{"key":"abc"}"#),
                ("database", "db.sqlite", &db_bytes),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
        assert!(detail.contains("got 3"));

        let response = send(&state, post_empty("/api/upload")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_default_signal_path() {
        let response = send(&test_state(), get_request("/api/default-signal-path")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert!(body["os"].is_string());
    }

    #[tokio::test]
    async fn test_cors_allows_only_configured_origins() {
        let state = test_state();
        let preflight = |origin: &str| {
            Request::builder()
                .method("OPTIONS")
                .uri("/api/status")
                .header(header::ORIGIN, origin)
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .body(Body::empty())
                .unwrap()
        };

        let response = send(&state, preflight("http://localhost:5173")).await;
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:5173"
        );

        let response = send(&state, preflight("http://evil.example")).await;
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_static_dir_fallback() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("index.html"), "<h1>archive</h1>").unwrap();
        let state = Arc::new(AppState::new(
            SessionManager::new(Arc::new(StaticCredentialStore::new("unused"))),
            ServerConfig {
                static_dir: Some(temp.path().to_path_buf()),
                ..ServerConfig::default()
            },
        ));

        let response = send(&state, get_request("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<h1>archive</h1>");
    }
}
