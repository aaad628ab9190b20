use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbeddingConfig, LLMConfig};
use crate::embeddings::HashingEmbedder;
use crate::types::{AppError, AppResult, LLMProvider, LLMRequest, LLMResponse};

#[async_trait]
pub trait LLMAdapter: Send + Sync {
    async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse>;
}

/// Text-in/vector-out embedding service
#[async_trait]
pub trait EmbeddingAdapter: Send + Sync {
    /// Embed corpus chunks for storage
    async fn embed_documents(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>>;

    /// Embed a search query
    async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>>;
}

/// Configuration for LLM provider (renamed to avoid conflict with LLMProvider enum in types.rs)
pub struct LLMProviderConfig {
    pub name: String,
    pub api_key: String,
    pub base_url: Option<String>,
    pub timeout: Duration,
}

fn build_client(timeout: Duration) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// A chat model bound to a provider, a model name and sampling settings
#[derive(Clone)]
pub struct LLM {
    adapter: Arc<dyn LLMAdapter>,
    provider_name: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl LLM {
    pub fn new(provider: LLMProviderConfig, model: impl Into<String>) -> AppResult<Self> {
        let client = build_client(provider.timeout)?;
        let adapter: Arc<dyn LLMAdapter> = match LLMProvider::from_id(&provider.name) {
            Some(LLMProvider::Google) => Arc::new(crate::llm::google::GoogleAdapter::with_client(
                client,
                &provider.api_key,
                provider.base_url.as_deref(),
            )),
            Some(LLMProvider::OpenAI) => Arc::new(crate::llm::openai::OpenAIAdapter::with_client(
                client,
                &provider.api_key,
                provider.base_url.as_deref(),
            )),
            // OpenRouter speaks the OpenAI chat completions dialect
            Some(LLMProvider::OpenRouter) => Arc::new(crate::llm::openai::OpenAIAdapter::with_client(
                client,
                &provider.api_key,
                Some(provider.base_url.as_deref().unwrap_or(crate::llm::openai::OPENROUTER_API_BASE)),
            )),
            None => {
                return Err(AppError::InvalidRequest(format!(
                    "Unsupported provider: {}",
                    provider.name
                )))
            }
        };

        Ok(Self::with_adapter(adapter, provider.name, model))
    }

    /// Build the chat model described by the configuration
    pub fn from_config(config: &LLMConfig) -> AppResult<Self> {
        let api_key = config.active_api_key().ok_or_else(|| {
            AppError::InvalidRequest(format!("No API key configured for provider {}", config.provider))
        })?;

        let llm = Self::new(
            LLMProviderConfig {
                name: config.provider.clone(),
                api_key,
                base_url: config.base_url.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            },
            config.model.clone(),
        )?;
        Ok(llm.with_max_tokens(config.max_tokens))
    }

    pub fn with_adapter(
        adapter: Arc<dyn LLMAdapter>,
        provider_name: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            provider_name: provider_name.into(),
            model: model.into(),
            temperature: 0.5,
            max_tokens: 8192,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Request skeleton carrying this model's provider and sampling settings
    pub fn request(&self, messages: Vec<crate::types::LLMMessage>) -> LLMRequest {
        LLMRequest {
            provider: self.provider_name.clone(),
            model: self.model.clone(),
            messages,
            max_tokens: Some(self.max_tokens),
            temperature: Some(self.temperature),
            system_instruction: None,
            tools: Vec::new(),
            response_schema: None,
        }
    }

    pub async fn create_chat_completion(&self, request: &LLMRequest) -> AppResult<LLMResponse> {
        self.adapter.create_chat_completion(request).await
    }
}

/// Build the embedding service described by the configuration
pub fn embedder_from_config(
    embeddings: &EmbeddingConfig,
    llm: &LLMConfig,
) -> AppResult<Arc<dyn EmbeddingAdapter>> {
    let timeout = Duration::from_secs(llm.timeout_secs);
    match embeddings.provider.as_str() {
        "local" | "hashing" => Ok(Arc::new(HashingEmbedder::new(embeddings.dimensions))),
        "google" | "gemini" => {
            if llm.google_api_key.is_empty() {
                return Err(AppError::InvalidRequest("GOOGLE_API_KEY is required for Google embeddings".to_string()));
            }
            Ok(Arc::new(crate::llm::google::GoogleEmbeddings::with_client(
                build_client(timeout)?,
                &llm.google_api_key,
                &embeddings.model,
                None,
            )))
        }
        "openai" => {
            if llm.openai_api_key.is_empty() {
                return Err(AppError::InvalidRequest("OPENAI_API_KEY is required for OpenAI embeddings".to_string()));
            }
            Ok(Arc::new(crate::llm::openai::OpenAIEmbeddings::with_client(
                build_client(timeout)?,
                &llm.openai_api_key,
                &embeddings.model,
                None,
            )))
        }
        other => Err(AppError::InvalidRequest(format!("Unsupported embedding provider: {}", other))),
    }
}
