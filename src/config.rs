use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub embeddings: EmbeddingConfig,
    pub knowledge: KnowledgeConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub model: String,
    pub google_api_key: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub base_url: Option<String>,
    pub analyzer_temperature: f32,
    pub planner_temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

impl LLMConfig {
    /// API key of the configured chat provider, if one is set
    pub fn active_api_key(&self) -> Option<String> {
        let key = match self.provider.as_str() {
            "google" | "gemini" => &self.google_api_key,
            "openai" => &self.openai_api_key,
            "openrouter" => &self.openrouter_api_key,
            _ => return None,
        };
        if key.is_empty() {
            None
        } else {
            Some(key.clone())
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeConfig {
    pub corpus_path: PathBuf,
    pub index_path: PathBuf,
    pub collection_name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub max_turns: usize,
    pub enforce_plan_constraints: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            enforce_plan_constraints: true,
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var_or(key, default)
        .parse()
        .with_context(|| format!("{} has an invalid value", key))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let provider = var_or("LLM_PROVIDER", "google").to_lowercase();
        let default_model = match provider.as_str() {
            "openai" => "gpt-4o-mini",
            "openrouter" => "google/gemini-2.5-flash",
            _ => "gemini-2.5-flash",
        };

        Ok(Self {
            server: ServerConfig {
                port: parse_var("PORT", "3000")?,
                host: var_or("HOST", "0.0.0.0"),
                cors_allowed_origins: var_or(
                    "ALLOWED_ORIGINS",
                    "http://localhost:3000,http://localhost:5173",
                )
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            llm: LLMConfig {
                model: var_or("LLM_MODEL", default_model),
                provider,
                google_api_key: env::var("GOOGLE_API_KEY").unwrap_or_default(),
                openai_api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
                openrouter_api_key: env::var("OPENROUTER_API_KEY").unwrap_or_default(),
                base_url: env::var("LLM_BASE_URL").ok().filter(|s| !s.is_empty()),
                analyzer_temperature: parse_var("ANALYZER_TEMPERATURE", "0.5")?,
                planner_temperature: parse_var("PLANNER_TEMPERATURE", "0.3")?,
                max_tokens: parse_var("LLM_MAX_TOKENS", "8192")?,
                timeout_secs: parse_var("LLM_TIMEOUT_SECS", "120")?,
            },
            embeddings: EmbeddingConfig {
                provider: var_or("EMBEDDING_PROVIDER", "google").to_lowercase(),
                model: var_or("EMBEDDING_MODEL", "gemini-embedding-001"),
                dimensions: parse_var("EMBEDDING_DIMENSIONS", "384")?,
                batch_size: parse_var("EMBEDDING_BATCH_SIZE", "64")?,
            },
            knowledge: KnowledgeConfig {
                corpus_path: PathBuf::from(var_or("KNOWLEDGE_FILE", "knowledge/expert_knowledge.md")),
                index_path: PathBuf::from(var_or("KNOWLEDGE_INDEX_PATH", "data/knowledge_index.json")),
                collection_name: var_or("KNOWLEDGE_COLLECTION", "inbody_knowledge"),
                chunk_size: parse_var("CHUNK_SIZE", "500")?,
                chunk_overlap: parse_var("CHUNK_OVERLAP", "20")?,
            },
            agent: AgentConfig {
                max_turns: parse_var("AGENT_MAX_TURNS", "25")?,
                enforce_plan_constraints: parse_var("ENFORCE_PLAN_CONSTRAINTS", "true")?,
            },
        })
    }
}
