//! InBody sheet extraction.
//!
//! Two model calls: a vision pass transcribes the numbers on the photographed
//! result sheet, then a schema-constrained pass turns that transcript into an
//! `InBodyExtraction`. Values the model cannot read stay empty.

use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::structured::request_structured;
use crate::llm::LLM;
use crate::models::InBodyExtraction;
use crate::types::{AppError, AppResult, LLMMessage};

pub const STAGE: &str = "extraction";

pub const ALLOWED_IMAGE_TYPES: [&str; 4] = ["image/jpeg", "image/png", "image/webp", "image/heic"];

const VISION_PROMPT: &str = "This image is an InBody body composition result sheet.
Zoom in or crop mentally where needed and read the following values exactly:

- Weight (weight_kg), kg
- Muscle mass (muscle_mass_kg), kg
- Skeletal muscle mass (skeletal_muscle_mass_kg), kg
- Body fat percentage (body_fat_percent), %
- Segmental skeletal muscle: left arm, right arm, trunk, left leg, right leg (kg each)

Report every value you can read.";

pub fn extraction_schema() -> Value {
    let number = json!({"type": ["number", "null"]});
    json!({
        "type": "object",
        "properties": {
            "weight_kg": number,
            "muscle_mass_kg": number,
            "skeletal_muscle_mass_kg": number,
            "body_fat_percent": number,
            "segmental_lean": {
                "type": ["object", "null"],
                "properties": {
                    "right_arm": number,
                    "left_arm": number,
                    "trunk": number,
                    "right_leg": number,
                    "left_leg": number
                }
            },
            "confidence": {"type": "string", "enum": ["high", "medium", "low"]},
            "notes": {"type": ["string", "null"]}
        },
        "required": ["confidence"]
    })
}

pub struct InBodyExtractor {
    vision: LLM,
    structurer: LLM,
}

impl InBodyExtractor {
    pub fn new(llm: LLM) -> Self {
        Self {
            structurer: llm.clone().with_temperature(0.0),
            vision: llm,
        }
    }

    pub fn is_supported(media_type: &str) -> bool {
        ALLOWED_IMAGE_TYPES.contains(&media_type)
    }

    pub async fn extract(&self, image: &[u8], media_type: &str) -> AppResult<InBodyExtraction> {
        if !Self::is_supported(media_type) {
            return Err(AppError::InvalidRequest(format!(
                "Unsupported file type. Supported types: {}",
                ALLOWED_IMAGE_TYPES.join(", ")
            )));
        }
        if image.is_empty() {
            return Err(AppError::InvalidRequest("Image file is empty".to_string()));
        }

        info!(media_type = %media_type, bytes = image.len(), "Extracting InBody data from image");

        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let request = self
            .vision
            .request(vec![LLMMessage::user_with_base64_image(VISION_PROMPT, encoded, media_type)]);
        let transcript = self.vision.create_chat_completion(&request).await?.content;
        if transcript.trim().is_empty() {
            return Err(AppError::EmptyResult("vision model returned no text".to_string()));
        }
        debug!(chars = transcript.len(), "Vision transcript received");

        let prompt = format!(
            "Extract the numeric values from the following InBody reading:\n\n{}",
            transcript
        );
        request_structured(&self.structurer, STAGE, prompt, "InBodyData", extraction_schema()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::{text, ScriptedAdapter};
    use crate::models::Confidence;
    use crate::types::MessageContent;
    use std::sync::Arc;

    fn extractor(adapter: Arc<ScriptedAdapter>) -> InBodyExtractor {
        InBodyExtractor::new(LLM::with_adapter(adapter, "scripted", "vision-model"))
    }

    #[tokio::test]
    async fn test_extract_two_passes() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![
            text("Weight 70.2 kg, SMM 28.1 kg, PBF 21.5%"),
            text(r#"{"weight_kg": 70.2, "skeletal_muscle_mass_kg": 28.1, "body_fat_percent": 21.5, "confidence": "high"}"#),
        ]));
        let result = extractor(adapter.clone()).extract(b"\x89PNG", "image/png").await.unwrap();

        assert_eq!(result.weight_kg, Some(70.2));
        assert_eq!(result.muscle_mass_kg, None);
        assert_eq!(result.confidence, Confidence::High);

        let requests = adapter.requests();
        assert!(requests[0].messages[0].content.has_images());
        assert!(matches!(requests[1].messages[0].content, MessageContent::Text(ref t) if t.contains("PBF 21.5%")));
        assert_eq!(requests[1].temperature, Some(0.0));
        assert!(requests[1].response_schema.is_some());
    }

    #[tokio::test]
    async fn test_rejects_unsupported_type() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![]));
        let err = extractor(adapter.clone()).extract(b"GIF89a", "image/gif").await.unwrap_err();
        assert!(err.is_client_error());
        assert!(adapter.requests().is_empty());
    }

    #[tokio::test]
    async fn test_blank_transcript_is_empty_result() {
        let adapter = Arc::new(ScriptedAdapter::new(vec![text("  ")]));
        let err = extractor(adapter).extract(b"jpeg", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, AppError::EmptyResult(_)));
    }
}
