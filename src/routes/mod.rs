//! API Routes
//!
//! HTTP endpoints of the training service:
//! - `/api/` - Service information
//! - `/api/health` - Health check
//! - `/api/generate` - InBody analysis and training plan generation
//! - `/api/extract-inbody` - InBody sheet photo extraction

pub mod extract;
pub mod generate;
pub mod health;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::middleware::cors_layer;
use crate::models::AppState;
use crate::types::AppError;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    info!("Creating application router");

    let cors = cors_layer(&state.config.server.cors_allowed_origins);

    Router::new()
        .merge(health::router(state.clone()))
        .merge(generate::router(state.clone()))
        .merge(extract::router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Maps a pipeline error onto the JSON error body the API returns.
///
/// Caller mistakes become 400 with the validation details, everything else
/// is a 500 that still carries the failure description.
pub(crate) fn error_response(context: &str, err: &AppError) -> Response {
    if err.is_client_error() {
        warn!(context = %context, "Rejected request: {}", err);
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid input data",
                "details": err.to_string()
            })),
        )
            .into_response();
    }

    error!(context = %context, "Request failed: {}", err);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({
            "error": format!("{} failed", context),
            "details": err.to_string()
        })),
    )
        .into_response()
}
