//! HTTP health and status endpoints.
//!
//! Served on their own listener next to the WebSocket port. Both endpoints are
//! read-only and unauthenticated.

use crate::config::ServerConfig;
use crate::connection::SessionManager;
use crate::registry::RoomRegistry;
use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::System;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

const SERVICE_NAME: &str = "onlyroll-websocket";

/// How long `/status` waits for the store to answer a ping.
pub const STORE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state of the status handlers.
#[derive(Debug, Clone)]
pub struct StatusState {
    pub sessions: Arc<SessionManager>,
    pub registry: RoomRegistry,
    pub config: Arc<ServerConfig>,
    pub started_at: Instant,
    /// A store slower than this is reported as disconnected
    pub store_timeout: Duration,
}

/// Memory used by this process, in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub rss: u64,
    #[serde(rename = "virtual")]
    pub virtual_memory: u64,
}

impl MemoryUsage {
    /// Samples the current process. Zeroes when the platform does not report it.
    pub fn current() -> Self {
        let Ok(pid) = sysinfo::get_current_pid() else {
            return Self::default();
        };
        let mut system = System::new();
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|process| Self {
                rss: process.memory(),
                virtual_memory: process.virtual_memory(),
            })
            .unwrap_or_default()
    }
}

/// Builds the status router.
pub fn router(state: StatusState) -> Router {
    let cors = cors_layer(state.config.allowed_origin.as_deref());
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET]);
    match allowed_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => layer.allow_origin(AllowOrigin::exact(origin)),
        Some(Err(e)) => {
            warn!("Ignoring unusable CORS origin: {}", e);
            layer
        }
        None => layer.allow_origin(AllowOrigin::any()),
    }
}

fn uptime_secs(state: &StatusState) -> f64 {
    state.started_at.elapsed().as_secs_f64()
}

async fn health_handler(State(state): State<StatusState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime": uptime_secs(&state),
        "memory": MemoryUsage::current(),
        "environment": state.config.environment,
        "connections": state.sessions.connection_count(),
    }))
}

async fn status_handler(State(state): State<StatusState>) -> Json<Value> {
    let store = state.registry.store();
    let connected = matches!(
        tokio::time::timeout(state.store_timeout, store.ping()).await,
        Ok(Ok(()))
    );

    Json(json!({
        "status": "operational",
        "timestamp": Utc::now(),
        "service": SERVICE_NAME,
        "store": {
            "connected": connected,
            "backend": store.backend_name(),
            "endpoint": store.endpoint(),
        },
        "websocket": {
            "enabled": true,
            "address": state.config.bind_address.to_string(),
            "corsOrigin": state.config.allowed_origin.as_deref().unwrap_or("*"),
        },
        "backend": {
            "url": state.config.backend_url,
            "apiUrl": state.config.backend_api_url,
        },
        "environment": state.config.environment,
        "uptime": uptime_secs(&state),
        "memory": MemoryUsage::current(),
        "pid": std::process::id(),
        "connections": state.sessions.connection_count(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemoryStore, RoomStore};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state(store: Arc<dyn RoomStore>) -> StatusState {
        StatusState {
            sessions: Arc::new(SessionManager::new()),
            registry: RoomRegistry::new(store, 100, 50),
            config: Arc::new(ServerConfig {
                environment: "test".to_string(),
                allowed_origin: Some("https://onlyroll.example".to_string()),
                ..ServerConfig::default()
            }),
            started_at: Instant::now(),
            store_timeout: Duration::from_millis(100),
        }
    }

    /// A store that accepts connections but never answers.
    #[derive(Debug)]
    struct HungStore;

    #[async_trait]
    impl RoomStore for HungStore {
        async fn hash_set(&self, _: &str, _: &str, _: String) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn hash_delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn hash_get_all(&self, _: &str) -> Result<HashMap<String, String>, StoreError> {
            std::future::pending().await
        }

        async fn list_push_capped(&self, _: &str, _: String, _: usize) -> Result<(), StoreError> {
            std::future::pending().await
        }

        async fn list_range(&self, _: &str, _: usize) -> Result<Vec<String>, StoreError> {
            std::future::pending().await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            std::future::pending().await
        }

        fn backend_name(&self) -> &'static str {
            "hung"
        }

        fn endpoint(&self) -> String {
            "nowhere".to_string()
        }
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = router(state(Arc::new(MemoryStore::new())));
        let body = get_json(app, "/health").await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], SERVICE_NAME);
        assert_eq!(body["environment"], "test");
        assert_eq!(body["connections"], 0);
        assert!(body["uptime"].as_f64().unwrap() >= 0.0);
        assert!(body["memory"]["rss"].is_u64());
        assert!(body["memory"]["virtual"].is_u64());
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_status_reports_store() {
        let store = Arc::new(MemoryStore::new());
        let body = get_json(router(state(store.clone())), "/status").await;
        assert_eq!(body["status"], "operational");
        assert_eq!(body["store"]["connected"], true);
        assert_eq!(body["store"]["backend"], "memory");
        assert_eq!(body["websocket"]["corsOrigin"], "https://onlyroll.example");
        assert_eq!(body["backend"]["apiUrl"], "http://backend:8000/api");
        assert_eq!(body["pid"], std::process::id());

        store.set_available(false);
        let body = get_json(router(state(store)), "/status").await;
        assert_eq!(body["store"]["connected"], false);
    }

    #[tokio::test]
    async fn test_status_survives_hung_store() {
        let app = router(state(Arc::new(HungStore)));
        let body = tokio::time::timeout(Duration::from_secs(2), get_json(app, "/status"))
            .await
            .expect("status must answer while the store hangs");
        assert_eq!(body["status"], "operational");
        assert_eq!(body["store"]["connected"], false);
        assert_eq!(body["store"]["backend"], "hung");
    }

    #[tokio::test]
    async fn test_unknown_path() {
        let app = router(state(Arc::new(MemoryStore::new())));
        let response = app
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_memory_sample() {
        let usage = MemoryUsage::current();
        let encoded = serde_json::to_value(usage).unwrap();
        assert!(encoded.get("rss").is_some());
        assert!(encoded.get("virtual").is_some());
    }
}
