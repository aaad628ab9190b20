// Structured output requests and strict parsing of model JSON

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use validator::Validate;

use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, ResponseSchema};

/// Remove a surrounding markdown code fence, if any. Nothing else is altered.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    match body.find('\n') {
        Some(newline) => body[newline + 1..].trim(),
        None => body.trim(),
    }
}

/// Parse and validate model output. Missing fields, wrong types and failed
/// constraints are all rejected; nothing is coerced.
pub fn parse_structured<T>(stage: &str, content: &str) -> AppResult<T>
where
    T: DeserializeOwned + Validate,
{
    let body = strip_code_fences(content);
    if body.is_empty() {
        return Err(AppError::EmptyResult(format!("{} stage produced no output", stage)));
    }

    let value: T = serde_json::from_str(body).map_err(|e| AppError::StructuredOutput {
        stage: stage.to_string(),
        reason: format!("invalid JSON: {}", e),
    })?;
    value.validate().map_err(|e| AppError::StructuredOutput {
        stage: stage.to_string(),
        reason: e.to_string(),
    })?;
    Ok(value)
}

/// One schema-constrained completion over a single prompt
pub async fn request_structured<T>(
    llm: &LLM,
    stage: &str,
    prompt: String,
    schema_name: &str,
    schema: Value,
) -> AppResult<T>
where
    T: DeserializeOwned + Validate,
{
    let mut request = llm.request(vec![LLMMessage::user(prompt)]);
    request.response_schema = Some(ResponseSchema {
        name: schema_name.to_string(),
        schema,
    });

    let response = llm.create_chat_completion(&request).await?;
    debug!(stage = %stage, chars = response.content.len(), "Structured output received");

    parse_structured(stage, &response.content).inspect_err(|e| {
        warn!(stage = %stage, error = %e, "Structured output rejected");
    })
}
