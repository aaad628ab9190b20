// OpenAI-compatible adapter (chat completions + embeddings)
// Also serves OpenRouter, which exposes the same dialect under a different base URL.
// API Reference: https://platform.openai.com/docs/api-reference/chat

use crate::llm::provider::{EmbeddingAdapter, LLMAdapter};
use crate::types::{
    roles, AppError, AppResult, ContentPart, LLMMessage, LLMRequest, LLMResponse, MessageContent,
    TokenUsage, ToolCall,
};
use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart, ChatCompletionTool,
    ChatCompletionTools, CreateChatCompletionRequest, CreateChatCompletionRequestArgs, FinishReason,
    FunctionCall, FunctionObjectArgs, ImageUrlArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::types::embeddings::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;

pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
pub const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

fn build_client(http: reqwest::Client, api_key: &str, base_url: Option<&str>) -> Client<OpenAIConfig> {
    let config = OpenAIConfig::new()
        .with_api_key(api_key)
        .with_api_base(base_url.unwrap_or(OPENAI_API_BASE).trim_end_matches('/'));
    Client::with_config(config).with_http_client(http)
}

fn llm_error(e: OpenAIError) -> AppError {
    AppError::LLMApi(format!("Chat completion failed: {}", e))
}

pub struct OpenAIAdapter {
    client: Client<OpenAIConfig>,
}

impl OpenAIAdapter {
    pub fn with_client(client: reqwest::Client, api_key: &str, base_url: Option<&str>) -> Self {
        Self {
            client: build_client(client, api_key, base_url),
        }
    }

    fn convert_message(msg: &LLMMessage) -> Result<ChatCompletionRequestMessage, OpenAIError> {
        let message: ChatCompletionRequestMessage = match msg.role.as_str() {
            roles::SYSTEM => ChatCompletionRequestSystemMessageArgs::default()
                .content(msg.content.as_text())
                .build()?
                .into(),
            roles::ASSISTANT => {
                let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                let text = msg.content.as_text();
                if !text.is_empty() || msg.tool_calls.is_empty() {
                    args.content(text);
                }
                if !msg.tool_calls.is_empty() {
                    args.tool_calls(
                        msg.tool_calls
                            .iter()
                            .map(|call| {
                                ChatCompletionMessageToolCalls::Function(ChatCompletionMessageToolCall {
                                    id: call.id.clone(),
                                    function: FunctionCall {
                                        name: call.name.clone(),
                                        arguments: call.arguments.to_string(),
                                    },
                                })
                            })
                            .collect::<Vec<_>>(),
                    );
                }
                args.build()?.into()
            }
            roles::TOOL => ChatCompletionRequestToolMessageArgs::default()
                .tool_call_id(msg.tool_call_id.clone().unwrap_or_default())
                .content(msg.content.as_text())
                .build()?
                .into(),
            _ => ChatCompletionRequestUserMessageArgs::default()
                .content(Self::user_content(&msg.content)?)
                .build()?
                .into(),
        };
        Ok(message)
    }

    fn user_content(content: &MessageContent) -> Result<ChatCompletionRequestUserMessageContent, OpenAIError> {
        match content {
            MessageContent::Text(text) => Ok(ChatCompletionRequestUserMessageContent::Text(text.clone())),
            MessageContent::Multimodal(parts) => {
                let mut converted = Vec::with_capacity(parts.len());
                for part in parts {
                    converted.push(match part {
                        ContentPart::Text { text } => ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartText { text: text.clone() },
                        ),
                        ContentPart::ImageBase64 { base64, media_type } => {
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImage {
                                    image_url: ImageUrlArgs::default()
                                        .url(format!("data:{};base64,{}", media_type, base64))
                                        .build()?,
                                },
                            )
                        }
                    });
                }
                Ok(ChatCompletionRequestUserMessageContent::Array(converted))
            }
        }
    }

    fn build_request(request: &LLMRequest) -> Result<CreateChatCompletionRequest, OpenAIError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system_instruction {
            messages.push(Self::convert_message(&LLMMessage::new(roles::SYSTEM, system.clone()))?);
        }
        for message in &request.messages {
            messages.push(Self::convert_message(message)?);
        }

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(request.model.clone()).messages(messages);
        if let Some(max_tokens) = request.max_tokens {
            args.max_completion_tokens(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            args.temperature(temperature);
        }
        if !request.tools.is_empty() {
            let mut tools = Vec::with_capacity(request.tools.len());
            for tool in &request.tools {
                tools.push(ChatCompletionTools::Function(ChatCompletionTool {
                    function: FunctionObjectArgs::default()
                        .name(tool.name.clone())
                        .description(tool.description.clone())
                        .parameters(tool.parameters.clone())
                        .build()?,
                }));
            }
            args.tools(tools);
        }
        if let Some(schema) = &request.response_schema {
            args.response_format(ResponseFormat::JsonSchema {
                json_schema: ResponseFormatJsonSchema {
                    description: None,
                    name: schema.name.clone(),
                    schema: Some(schema.schema.clone()),
                    strict: None,
                },
            });
        }
        args.build()
    }

    /// Tool arguments arrive as a JSON-encoded string; unparseable payloads are
    /// passed through as a raw string so the tool can report them.
    fn parse_arguments(raw: &str) -> serde_json::Value {
        if raw.trim().is_empty() {
            return serde_json::json!({});
        }
        serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
    }
}

fn finish_reason_label(reason: Option<FinishReason>) -> &'static str {
    match reason {
        Some(FinishReason::Length) => "length",
        Some(FinishReason::ToolCalls) | Some(FinishReason::FunctionCall) => "tool_calls",
        Some(FinishReason::ContentFilter) => "content_filter",
        Some(FinishReason::Stop) | None => "stop",
    }
}

#[async_trait]
impl LLMAdapter for OpenAIAdapter {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        let body = Self::build_request(request).map_err(llm_error)?;
        let response = self.client.chat().create(body).await.map_err(llm_error)?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLMApi("Chat completion returned no choices".to_string()))?;

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter_map(|call| match call {
                ChatCompletionMessageToolCalls::Function(call) => Some(ToolCall::new(
                    call.id,
                    call.function.name,
                    Self::parse_arguments(&call.function.arguments),
                )),
                // Custom grammar tools are never declared
                ChatCompletionMessageToolCalls::Custom(_) => None,
            })
            .collect();

        let usage = response
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(LLMResponse {
            content: choice.message.content.unwrap_or_default(),
            tool_calls,
            finish_reason: finish_reason_label(choice.finish_reason).to_string(),
            usage,
        })
    }
}

/// OpenAI embeddings endpoint
pub struct OpenAIEmbeddings {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIEmbeddings {
    pub fn with_client(client: reqwest::Client, api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            client: build_client(client, api_key, base_url),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for OpenAIEmbeddings {
    async fn embed_documents(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = CreateEmbeddingRequestArgs::default()
            .model(self.model.clone())
            .input(EmbeddingInput::StringArray(texts.to_vec()))
            .build()
            .map_err(|e| AppError::Embedding(format!("Invalid embedding request: {}", e)))?;

        let mut response = self
            .client
            .embeddings()
            .create(request)
            .await
            .map_err(|e| AppError::Embedding(format!("Embedding request failed: {}", e)))?;

        if response.data.len() != texts.len() {
            return Err(AppError::Embedding(format!(
                "Expected {} embeddings, received {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }

    async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("Embedding response was empty".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ResponseSchema, ToolSpec};

    fn request_with_tools() -> LLMRequest {
        LLMRequest {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            messages: vec![LLMMessage::user("analyze")],
            max_tokens: Some(256),
            temperature: Some(0.5),
            system_instruction: Some("You are an expert.".to_string()),
            tools: vec![ToolSpec {
                name: "retriever_tool".to_string(),
                description: "search".to_string(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            response_schema: None,
        }
    }

    #[test]
    fn test_build_request_prepends_system_instruction() {
        let request = OpenAIAdapter::build_request(&request_with_tools()).unwrap();
        let body = serde_json::to_value(request).unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "analyze");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "retriever_tool");
        assert_eq!(body["max_completion_tokens"], 256);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn test_build_request_attaches_json_schema() {
        let mut request = request_with_tools();
        request.tools.clear();
        request.response_schema = Some(ResponseSchema {
            name: "plan".to_string(),
            schema: serde_json::json!({"type": "object"}),
        });
        let body = serde_json::to_value(OpenAIAdapter::build_request(&request).unwrap()).unwrap();
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["response_format"]["json_schema"]["name"], "plan");
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn test_image_parts_become_data_urls() {
        let message = LLMMessage {
            role: roles::USER.to_string(),
            content: MessageContent::Multimodal(vec![
                ContentPart::Text { text: "read this".to_string() },
                ContentPart::ImageBase64 {
                    base64: "AAAA".to_string(),
                    media_type: "image/png".to_string(),
                },
            ]),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        };
        let value = serde_json::to_value(OpenAIAdapter::convert_message(&message).unwrap()).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][1]["type"], "image_url");
        assert_eq!(value["content"][1]["image_url"]["url"], "data:image/png;base64,AAAA");
    }

    #[test]
    fn test_tool_turns_serialize_with_ids() {
        let call = ToolCall::new("call_1", "retriever_tool", serde_json::json!({"query": "x"}));
        let assistant = OpenAIAdapter::convert_message(&LLMMessage::assistant_with_tools("", vec![call])).unwrap();
        let value = serde_json::to_value(assistant).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{\"query\":\"x\"}");

        let result =
            OpenAIAdapter::convert_message(&LLMMessage::tool_result("call_1", "retriever_tool", "ok")).unwrap();
        let value = serde_json::to_value(result).unwrap();
        assert_eq!(value["tool_call_id"], "call_1");
        assert_eq!(value["role"], "tool");
    }

    #[test]
    fn test_parse_arguments_keeps_malformed_payload() {
        assert_eq!(OpenAIAdapter::parse_arguments(""), serde_json::json!({}));
        assert_eq!(
            OpenAIAdapter::parse_arguments("{\"query\": \"legs\"}"),
            serde_json::json!({"query": "legs"})
        );
        assert_eq!(
            OpenAIAdapter::parse_arguments("not json"),
            serde_json::Value::String("not json".to_string())
        );
    }

    #[tokio::test]
    async fn test_chat_completion_parses_tool_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "chatcmpl-1",
                    "object": "chat.completion",
                    "created": 1700000000,
                    "model": "gpt-4o-mini",
                    "choices": [{
                        "index": 0,
                        "message": {
                            "role": "assistant",
                            "content": null,
                            "tool_calls": [
                                {"id": "call_a", "type": "function", "function": {"name": "calculate_smm_ratio", "arguments": "{\"weight_kg\": 70}"}},
                                {"id": "call_b", "type": "function", "function": {"name": "retriever_tool", "arguments": "{\"query\": \"lean\"}"}}
                            ]
                        },
                        "finish_reason": "tool_calls"
                    }],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }"#,
            )
            .create_async()
            .await;

        let adapter = OpenAIAdapter::with_client(reqwest::Client::new(), "test-key", Some(&server.url()));
        let response = adapter.create_chat_completion(&request_with_tools()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(response.content, "");
        assert_eq!(response.finish_reason, "tool_calls");
        assert_eq!(response.tool_calls.len(), 2);
        assert_eq!(response.tool_calls[0].id, "call_a");
        assert_eq!(response.tool_calls[1].arguments["query"], "lean");
        assert_eq!(response.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn test_chat_completion_surfaces_api_errors() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"message": "bad key"}}"#)
            .create_async()
            .await;

        let adapter = OpenAIAdapter::with_client(reqwest::Client::new(), "wrong", Some(&server.url()));
        let err = adapter.create_chat_completion(&request_with_tools()).await.unwrap_err();
        assert!(matches!(err, AppError::LLMApi(ref msg) if msg.contains("bad key")));
    }

    #[tokio::test]
    async fn test_embeddings_are_ordered_by_index() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "object": "list",
                    "model": "text-embedding-3-small",
                    "data": [
                        {"object": "embedding", "embedding": [0.0, 1.0], "index": 1},
                        {"object": "embedding", "embedding": [1.0, 0.0], "index": 0}
                    ],
                    "usage": {"prompt_tokens": 2, "total_tokens": 2}
                }"#,
            )
            .create_async()
            .await;

        let embedder = OpenAIEmbeddings::with_client(
            reqwest::Client::new(),
            "k",
            "text-embedding-3-small",
            Some(&server.url()),
        );
        let vectors = embedder
            .embed_documents(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }
}
