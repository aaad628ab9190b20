// Google Gemini adapter (generateContent + embeddings)
// API Reference: https://ai.google.dev/api/generate-content
//
// Gemini function calls carry no call id, so ids are minted here when a
// response is parsed and mapped back to function names when tool results are
// sent in the next turn.

use crate::llm::provider::{EmbeddingAdapter, LLMAdapter};
use crate::types::{
    roles, AppError, AppResult, ContentPart, LLMMessage, LLMRequest, LLMResponse, MessageContent,
    TokenUsage, ToolCall,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    inline_data: Option<InlineData>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    function_call: Option<FunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    function_response: Option<FunctionResponse>,
    // Thinking models attach this to function calls and reject the next turn without it
    #[serde(skip_serializing_if = "Option::is_none", default)]
    thought_signature: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Serialize, Deserialize)]
struct FunctionResponse {
    name: String,
    response: Value,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

impl GoogleAdapter {
    pub fn with_client(client: Client, api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            base_url: base_url.unwrap_or(GEMINI_API_BASE).trim_end_matches('/').to_string(),
        }
    }

    fn text_part(text: String) -> Part {
        Part {
            text: Some(text),
            ..Part::default()
        }
    }

    fn convert_message(msg: &LLMMessage) -> Content {
        if msg.is_tool_result() {
            return Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    function_response: Some(FunctionResponse {
                        name: msg.name.clone().unwrap_or_default(),
                        response: json!({ "content": msg.text() }),
                    }),
                    ..Part::default()
                }],
            };
        }

        let role = if msg.role == roles::ASSISTANT { "model" } else { "user" };
        let mut parts: Vec<Part> = match &msg.content {
            MessageContent::Text(text) if text.is_empty() => Vec::new(),
            MessageContent::Text(text) => vec![Self::text_part(text.clone())],
            MessageContent::Multimodal(content_parts) => content_parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => Self::text_part(text.clone()),
                    ContentPart::ImageBase64 { base64, media_type } => Part {
                        inline_data: Some(InlineData {
                            mime_type: media_type.clone(),
                            data: base64.clone(),
                        }),
                        ..Part::default()
                    },
                })
                .collect(),
        };

        parts.extend(msg.tool_calls.iter().map(|call| Part {
            function_call: Some(FunctionCall {
                name: call.name.clone(),
                args: call.arguments.clone(),
            }),
            thought_signature: call.signature.clone(),
            ..Part::default()
        }));

        Content {
            role: Some(role.to_string()),
            parts,
        }
    }

    /// Gemini expects alternating turns, so consecutive turns of the same role
    /// (e.g. several function responses) are merged into one content.
    fn convert_messages(messages: &[LLMMessage]) -> Vec<Content> {
        let mut contents: Vec<Content> = Vec::new();
        for msg in messages.iter().filter(|m| m.role != roles::SYSTEM) {
            let converted = Self::convert_message(msg);
            match contents.last_mut() {
                Some(last) if last.role == converted.role => last.parts.extend(converted.parts),
                _ => contents.push(converted),
            }
        }
        contents
    }

    fn build_request(request: &LLMRequest) -> GenerateRequest {
        // System turns inside the history are folded into the system instruction
        let mut system_texts: Vec<String> = request.system_instruction.iter().cloned().collect();
        system_texts.extend(
            request
                .messages
                .iter()
                .filter(|m| m.role == roles::SYSTEM)
                .map(|m| m.text()),
        );

        let tools = if request.tools.is_empty() {
            Vec::new()
        } else {
            vec![json!({
                "functionDeclarations": request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }))
                    .collect::<Vec<_>>()
            })]
        };

        GenerateRequest {
            contents: Self::convert_messages(&request.messages),
            system_instruction: if system_texts.is_empty() {
                None
            } else {
                Some(Content {
                    role: None,
                    parts: vec![Self::text_part(system_texts.join("\n\n"))],
                })
            },
            tools,
            generation_config: GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request
                    .response_schema
                    .as_ref()
                    .map(|_| "application/json".to_string()),
                response_json_schema: request.response_schema.as_ref().map(|s| s.schema.clone()),
            },
        }
    }

    fn parse_response(response: GenerateResponse) -> AppResult<LLMResponse> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("Gemini returned no candidates".to_string()))?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(t) = part.text {
                text.push_str(&t);
            }
            if let Some(call) = part.function_call {
                let id = format!("call_{}", uuid::Uuid::new_v4().simple());
                tool_calls.push(ToolCall::new(id, call.name, call.args).with_signature(part.thought_signature));
            }
        }

        let usage = response
            .usage_metadata
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
                total_tokens: u.total_token_count,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: text,
            tool_calls,
            finish_reason: candidate.finish_reason.unwrap_or_else(|| "STOP".to_string()),
            usage,
        })
    }
}

async fn error_from_response(response: reqwest::Response) -> String {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorResponse>(&error_text) {
        Ok(parsed) => format!(
            "Gemini API error ({}): {} ({})",
            status,
            parsed.error.message,
            parsed.error.status.unwrap_or_default()
        ),
        Err(_) => format!("Gemini API error ({}): {}", status, error_text),
    }
}

#[async_trait]
impl LLMAdapter for GoogleAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::build_request(request))
            .send()
            .await
            .map_err(|e| AppError::LLMApi(format!("Gemini request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::LLMApi(error_from_response(response).await));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMApi(format!("Failed to parse Gemini response: {}", e)))?;

        Self::parse_response(parsed)
    }
}

/// Gemini embedding endpoint (batchEmbedContents / embedContent)
pub struct GoogleEmbeddings {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl GoogleEmbeddings {
    pub fn with_client(client: Client, api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            client,
            api_key: api_key.to_string(),
            model: model.trim_start_matches("models/").to_string(),
            base_url: base_url.unwrap_or(GEMINI_API_BASE).trim_end_matches('/').to_string(),
        }
    }

    fn embed_body(&self, text: &str, task_type: &str) -> Value {
        json!({
            "model": format!("models/{}", self.model),
            "content": { "parts": [{ "text": text }] },
            "taskType": task_type,
        })
    }

    async fn post(&self, method: &str, body: &Value) -> AppResult<reqwest::Response> {
        let url = format!("{}/models/{}:{}", self.base_url, self.model, method);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::Embedding(format!("Gemini embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Embedding(error_from_response(response).await));
        }
        Ok(response)
    }
}

#[async_trait]
impl EmbeddingAdapter for GoogleEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "requests": texts
                .iter()
                .map(|t| self.embed_body(t, "RETRIEVAL_DOCUMENT"))
                .collect::<Vec<_>>()
        });

        let parsed: BatchEmbedResponse = self
            .post("batchEmbedContents", &body)
            .await?
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to parse Gemini embeddings: {}", e)))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                parsed.embeddings.len()
            )));
        }
        Ok(parsed.embeddings.into_iter().map(|e| e.values).collect())
    }

    async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        let parsed: EmbedResponse = self
            .post("embedContent", &self.embed_body(text, "RETRIEVAL_QUERY"))
            .await?
            .json()
            .await
            .map_err(|e| AppError::Embedding(format!("Failed to parse Gemini embedding: {}", e)))?;
        Ok(parsed.embedding.values)
    }
}
