use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::post, Json, Router};
use tracing::{info, warn};

use super::error_response;
use crate::agents::extraction::ALLOWED_IMAGE_TYPES;
use crate::agents::InBodyExtractor;
use crate::models::AppState;

/// Upload ceiling for result sheet photos
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/extract-inbody", post(extract_inbody))
        .route("/api/extract-inbody/", post(extract_inbody))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .with_state(state)
}

fn bad_request(error: &str, details: Option<String>) -> Response {
    warn!("Rejected extraction upload: {}", error);
    let mut body = serde_json::json!({ "error": error });
    if let Some(details) = details {
        body["details"] = serde_json::Value::String(details);
    }
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

struct UploadedImage {
    media_type: String,
    bytes: Vec<u8>,
}

/// Pulls the `image` part out of the form, skipping other fields
async fn read_image(multipart: &mut Multipart) -> Result<Option<UploadedImage>, Response> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Ok(None),
            Err(e) => return Err(bad_request("Malformed multipart body", Some(e.body_text()))),
        };
        if field.name() != Some("image") {
            continue;
        }

        let media_type = field
            .content_type()
            .and_then(|ct| ct.parse::<mime::Mime>().ok())
            .map(|ct| ct.essence_str().to_ascii_lowercase())
            .unwrap_or_default();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request("Could not read image upload", Some(e.body_text())))?;
        return Ok(Some(UploadedImage {
            media_type,
            bytes: bytes.to_vec(),
        }));
    }
}

/// Reads the numbers off a photographed InBody result sheet
async fn extract_inbody(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let image = match read_image(&mut multipart).await {
        Ok(Some(image)) => image,
        Ok(None) => return bad_request("Image file is required", None),
        Err(response) => return response,
    };

    if !InBodyExtractor::is_supported(&image.media_type) {
        return bad_request(
            "Unsupported file type",
            Some(format!("Supported types: {}", ALLOWED_IMAGE_TYPES.join(", "))),
        );
    }

    info!(media_type = %image.media_type, bytes = image.bytes.len(), "Received InBody image");

    match state.extractor.extract(&image.bytes, &image.media_type).await {
        Ok(extraction) => (StatusCode::OK, Json(extraction)).into_response(),
        Err(e) => error_response("InBody extraction", &e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{text, ScriptedAdapter};
    use crate::routes::testing;
    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "trainer-test-boundary";

    fn multipart_body(name: &str, content_type: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"sheet\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn upload(app: Router, body: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/extract-inbody")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_extracts_uploaded_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            text("Weight 68.4 kg, PBF 18.9%"),
            text(r#"{"weight_kg": 68.4, "body_fat_percent": 18.9, "confidence": "medium"}"#),
        ]));
        let state = testing::state(adapter, dir.path()).await;

        let (status, body) = upload(router(state), multipart_body("image", "image/jpeg", b"\xff\xd8\xff")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["weight_kg"], 68.4);
        assert_eq!(body["confidence"], "medium");
    }

    #[tokio::test]
    async fn test_missing_image_field() {
        let dir = tempfile::tempdir().unwrap();
        let state = testing::state(Arc::new(ScriptedAdapter::new(vec![])), dir.path()).await;

        let (status, body) = upload(router(state), multipart_body("photo", "image/png", b"png")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Image file is required");
    }

    #[tokio::test]
    async fn test_unsupported_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        let state = testing::state(adapter.clone(), dir.path()).await;

        let (status, body) = upload(router(state), multipart_body("image", "application/pdf", b"%PDF")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Unsupported file type");
        assert!(adapter.requests().is_empty());
    }
}
