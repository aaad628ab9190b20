use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use serde_json::Value;
use tracing::{info, warn};

use super::error_response;
use crate::models::{AppState, TrainingRequest};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/generate", post(generate_plan))
        .route("/api/generate/", post(generate_plan))
        .with_state(state)
}

fn invalid_input(details: String) -> Response {
    warn!("Invalid generate request: {}", details);
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "Invalid input data",
            "details": details
        })),
    )
        .into_response()
}

/// Runs the analyzer and planner stages for one InBody reading
async fn generate_plan(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => return invalid_input(rejection.body_text()),
    };
    let request: TrainingRequest = match serde_json::from_value(body) {
        Ok(request) => request,
        Err(e) => return invalid_input(e.to_string()),
    };

    info!(
        goal = %request.goal.goal_type,
        environment = %request.preferences.environment,
        "Received plan generation request"
    );

    match state.pipeline.run(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response("Plan generation", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::orchestrator::testing::successful_script;
    use crate::llm::testing::{text, ScriptedAdapter};
    use crate::models::fixtures::sample_request_json;
    use crate::routes::testing;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn post_json(app: Router, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/generate")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_generate_returns_report_and_plan() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(successful_script()));
        let state = testing::state(adapter.clone(), dir.path()).await;

        let mut body = sample_request_json();
        body["preferences"] = serde_json::json!({"environment": "home", "training_time_minutes": "30"});
        let (status, body) = post_json(router(state), body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analysis_report"]["risk_factors"][0], "lower back pain");
        assert!(!body["training_plan"]["weekly_schedule"].as_array().unwrap().is_empty());
        assert_eq!(adapter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_age_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        let state = testing::state(adapter.clone(), dir.path()).await;

        let mut body = sample_request_json();
        body["user_profile"]["age"] = serde_json::json!(5);
        let (status, body) = post_json(router(state), body.to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid input data");
        assert!(adapter.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_field_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(Arc::new(ScriptedAdapter::new(vec![])), dir.path()).await;

        let mut body = sample_request_json();
        body.as_object_mut().unwrap().remove("inbody_metrics");
        let (status, body) = post_json(router(state), body.to_string()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].as_str().unwrap().contains("inbody_metrics"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(Arc::new(ScriptedAdapter::new(vec![])), dir.path()).await;

        let (status, _) = post_json(router(state), "{not json".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![text("done"), text("")]));
        let state = testing::state(adapter, dir.path()).await;

        let (status, body) = post_json(router(state), sample_request_json().to_string()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["details"].is_string());
    }
}
