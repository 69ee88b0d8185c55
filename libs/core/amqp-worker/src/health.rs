//! Health check handlers for the consumer process.
//!
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`): 200 only while consuming
//! - Consumer status (`/consumer/status`)
//! - Prometheus metrics (`/metrics`)

use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::event::{ConsumerPhase, StatusHandle};
use crate::metrics;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    pub app_name: String,
    pub app_version: String,
    pub queue: String,
    pub status: StatusHandle,
}

impl HealthState {
    pub fn new(
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        queue: impl Into<String>,
        status: StatusHandle,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            app_version: app_version.into(),
            queue: queue.into(),
            status,
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" if responding.
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready only while the consumer is attached to its queue; reconnecting or
/// stopped consumers report 503 so traffic/rollouts can react.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let status = state.status.get();

    if status.is_running && status.phase == ConsumerPhase::Consuming {
        Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": {
                    "broker": "consuming"
                }
            })),
        ))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": {
                    "broker": status.phase.as_str(),
                    "reconnect_attempts": status.reconnect_attempts
                }
            })),
        ))
    }
}

/// Consumer status for monitoring.
pub async fn consumer_status_handler(State(state): State<HealthState>) -> Json<Value> {
    let status = state.status.get();
    Json(json!({
        "queue": state.queue,
        "is_running": status.is_running,
        "reconnect_attempts": status.reconnect_attempts,
        "phase": status.phase,
    }))
}

/// Prometheus metrics endpoint handler.
pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call metrics::init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create the health router.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/consumer/status", get(consumer_status_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ConnectionState;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state() -> HealthState {
        HealthState::new("email-worker", "0.1.0", "email_queue", StatusHandle::default())
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            name: "email-worker".to_string(),
            version: "1.0.0".to_string(),
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"healthy\""));
        assert!(json.contains("\"name\":\"email-worker\""));
    }

    #[tokio::test]
    async fn test_liveness_always_ok() {
        let (status, body) = get(health_router(state()), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_not_ready_until_consuming() {
        let state = state();
        let (status, body) = get(health_router(state.clone()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["broker"], "stopped");

        state.status.update(|s| {
            *s = ConnectionState {
                is_running: true,
                reconnect_attempts: 0,
                phase: ConsumerPhase::Consuming,
            }
        });
        let (status, body) = get(health_router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[tokio::test]
    async fn test_consumer_status() {
        let state = state();
        state.status.update(|s| {
            s.phase = ConsumerPhase::Reconnecting;
            s.reconnect_attempts = 4;
        });

        let (status, body) = get(health_router(state), "/consumer/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue"], "email_queue");
        assert_eq!(body["phase"], "reconnecting");
        assert_eq!(body["reconnect_attempts"], 4);
    }
}
