//! HTTP surface: job submission, status polling and health.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::jobs::{Dataset, JobId, JobKind, JobRequest, StatusReport};
use crate::service::JobService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
}

/// Build the Axum router with job and health routes.
pub fn job_routes(service: Arc<JobService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/api/jobs/adjust", post(submit_adjust))
        .route("/api/jobs/load", post(submit_load))
        .route("/api/jobs/ask", post(submit_ask))
        .route("/api/jobs/release", post(submit_release))
        .route("/api/status/{id}", get(job_status))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let summary = state.service.summary().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": "tuneserve",
        "backend": state.service.backend_name(),
        "resource": state.service.resource_phase().to_string(),
        "queued_operations": state.service.queued_operations(),
        "jobs": summary,
    }))
}

// ── Submission ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AdjustBody {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
    #[serde(default)]
    output_model: Option<String>,
}

#[derive(Deserialize)]
struct LoadBody {
    model_name: String,
}

#[derive(Deserialize)]
struct AskBody {
    question: String,
}

async fn submit_adjust(
    State(state): State<AppState>,
    body: Result<Json<AdjustBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return malformed(JobKind::Adjust, rejection),
    };
    let request = JobRequest::Adjust {
        dataset: Dataset::new(body.columns, body.rows),
        output_model: body.output_model,
    };
    accepted(state.service.submit(request).await)
}

async fn submit_load(
    State(state): State<AppState>,
    body: Result<Json<LoadBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return malformed(JobKind::LoadModel, rejection),
    };
    let request = JobRequest::LoadModel {
        model_name: body.model_name,
    };
    accepted(state.service.submit(request).await)
}

async fn submit_ask(
    State(state): State<AppState>,
    body: Result<Json<AskBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => return malformed(JobKind::Ask, rejection),
    };
    let request = JobRequest::Ask {
        question: body.question,
    };
    accepted(state.service.submit(request).await)
}

async fn submit_release(State(state): State<AppState>) -> Response {
    accepted(state.service.submit(JobRequest::Release).await)
}

fn accepted(result: Result<JobId, ValidationError>) -> Response {
    match result {
        Ok(job_id) => (
            StatusCode::ACCEPTED,
            [(header::LOCATION, format!("/api/status/{job_id}"))],
            Json(serde_json::json!({"job_id": job_id})),
        )
            .into_response(),
        Err(e) => rejected(e),
    }
}

fn malformed(kind: JobKind, rejection: JsonRejection) -> Response {
    rejected(ValidationError::MalformedBody {
        kind: kind.to_string(),
        reason: rejection.body_text(),
    })
}

fn rejected(error: ValidationError) -> Response {
    warn!(error = %error, "Rejected job submission");
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": error.to_string()})),
    )
        .into_response()
}

// ── Status ──────────────────────────────────────────────────────────────

async fn job_status(State(state): State<AppState>, Path(id): Path<String>) -> Json<StatusReport> {
    // Any identifier that was never issued reads as not started, malformed
    // ones included.
    let report = match Uuid::parse_str(&id) {
        Ok(job_id) => state.service.status(job_id).await,
        Err(_) => {
            debug!(id = %id, "Status requested for malformed job id");
            StatusReport::pending()
        }
    };
    Json(report)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::config::ServiceConfig;

    fn app() -> Router {
        let config = ServiceConfig {
            stage_delay: Duration::ZERO,
            ..ServiceConfig::default()
        };
        let service = JobService::start(&config, Arc::new(SimulatedBackend::new(Duration::ZERO)));
        job_routes(service)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Option<String>, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let location = response
            .headers()
            .get(header::LOCATION)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, location, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_resource_phase() {
        let app = app();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "tuneserve");
        assert_eq!(body["resource"], "unloaded");
        assert_eq!(body["queued_operations"], 0);
        assert_eq!(body["jobs"]["total"], 0);
    }

    #[tokio::test]
    async fn submission_returns_accepted_with_location() {
        let app = app();
        let (status, location, body) = send(
            &app,
            post_json("/api/jobs/load", serde_json::json!({"model_name": "demo-model"})),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        let job_id = body["job_id"].as_str().unwrap();
        assert_eq!(location.unwrap(), format!("/api/status/{job_id}"));
    }

    #[tokio::test]
    async fn empty_question_is_bad_request() {
        let app = app();
        let (status, _, body) = send(
            &app,
            post_json("/api/jobs/ask", serde_json::json!({"question": ""})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Question must not be empty");
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let app = app();
        let (status, _, body) =
            send(&app, post_json("/api/jobs/load", serde_json::json!({}))).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("load_model"));
    }

    #[tokio::test]
    async fn malformed_id_reads_as_pending() {
        let app = app();
        let request = Request::builder()
            .uri("/api/status/not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = send(&app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "PENDING");
        assert_eq!(body["current"], 0);
        assert_eq!(body["total"], 1);
        assert_eq!(body["status"], "Starting...");
    }
}
