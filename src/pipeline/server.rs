//! HTTP ingestion boundary
//!
//! Routes:
//! - `POST /push` - sensor batch (`SensorPacket`)
//! - `GET /health` - liveness
//! - `GET /status` - store row counts and outbox backlog

use super::db::EntityStore;
use super::error::IngestError;
use super::ingestion::ingest;
use super::types::{SensorPacket, StoreSummary};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
}

/// Status object returned by every endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl StatusResponse {
    fn ok(stored: Option<usize>) -> Self {
        Self {
            status: "ok".to_string(),
            stored,
            detail: None,
        }
    }

    fn err(detail: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            stored: None,
            detail: Some(detail.into()),
        }
    }
}

fn error_response(code: StatusCode, detail: impl Into<String>) -> Response {
    (code, Json(StatusResponse::err(detail))).into_response()
}

/// Build the node's HTTP router
pub fn router(store: Arc<dyn EntityStore>) -> Router {
    Router::new()
        .route("/push", post(push_data))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(AppState { store })
}

async fn push_data(
    State(state): State<AppState>,
    body: Result<Json<SensorPacket>, JsonRejection>,
) -> Response {
    let Json(packet) = match body {
        Ok(packet) => packet,
        Err(rejection) => {
            log::warn!("⚠️  Rejected malformed packet: {}", rejection.body_text());
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let received_at = chrono::Utc::now().timestamp();

    match ingest(state.store.as_ref(), &packet, received_at).await {
        Ok(receipt) => {
            log::info!("✅ Measurements stored successfully ({})", receipt.stored);
            (StatusCode::OK, Json(StatusResponse::ok(Some(receipt.stored)))).into_response()
        }
        Err(IngestError::InvalidInput(detail)) => {
            log::warn!("⚠️  Rejected packet: {}", detail);
            error_response(StatusCode::BAD_REQUEST, detail)
        }
        Err(IngestError::Store(e)) => {
            log::error!(
                "❌ Error processing data from sensor {}: {}",
                packet.sensor_id,
                e
            );
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn health() -> Json<StatusResponse> {
    Json(StatusResponse::ok(None))
}

async fn status(State(state): State<AppState>) -> Result<Json<StoreSummary>, Response> {
    state.store.summary().await.map(Json).map_err(|e| {
        log::error!("❌ Failed to read store summary: {}", e);
        error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::SqliteStore;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::NamedTempFile;
    use tower::ServiceExt;

    fn create_test_app() -> (NamedTempFile, Arc<SqliteStore>, Router) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = Arc::new(SqliteStore::open(temp_file.path()).unwrap());
        let app = router(store.clone());
        (temp_file, store, app)
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_push_stores_batch() {
        let (_temp, store, app) = create_test_app();

        let response = app
            .oneshot(post_json(
                "/push",
                r#"{"sensor_id":"s1","measurements":[{"fill_level":55.5,"timestamp":1700000000},{"fill_level":56,"timestamp":1700000003}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["stored"], 2);

        assert_eq!(store.raw_measurements("container_s1").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_push_rejects_empty_measurements() {
        let (_temp, store, app) = create_test_app();

        let response = app
            .oneshot(post_json("/push", r#"{"sensor_id":"s1","measurements":[]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["status"], "error");
        assert!(json["detail"].as_str().unwrap().contains("no measurements"));
        assert_eq!(store.summary().await.unwrap().sensors, 0);
    }

    #[tokio::test]
    async fn test_push_rejects_missing_sensor_id() {
        let (_temp, store, app) = create_test_app();

        let response = app
            .oneshot(post_json(
                "/push",
                r#"{"measurements":[{"fill_level":1,"timestamp":1}]}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "error");
        assert_eq!(store.summary().await.unwrap().raw_measurements, 0);
    }

    #[tokio::test]
    async fn test_push_rejects_garbage() {
        let (_temp, _store, app) = create_test_app();

        let response = app.oneshot(post_json("/push", "not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_and_status() {
        let (_temp, _store, app) = create_test_app();

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");

        app.clone()
            .oneshot(post_json(
                "/push",
                r#"{"sensor_id":"s9","measurements":[{"fill_level":5,"timestamp":1700000000}]}"#,
            ))
            .await
            .unwrap();

        let response = app
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["containers"], 1);
        assert_eq!(json["sensors"], 1);
        assert_eq!(json["raw_measurements"], 1);
        assert_eq!(json["pending_deliveries"], 0);
    }
}
