use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::models::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api", get(service_info))
        .route("/api/", get(service_info))
        .route("/api/health", get(health_check))
        .with_state(state)
}

async fn service_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "message": "Project Trainer API",
        "version": env!("CARGO_PKG_VERSION"),
        "llm": {
            "provider": state.config.llm.provider,
            "model": state.config.llm.model
        },
        "endpoints": {
            "generate": "/api/generate",
            "extract_inbody": "/api/extract-inbody",
            "health": "/api/health"
        }
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "message": "Project Trainer API is running",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
