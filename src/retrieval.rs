//! Retrieval service: MMR search over the knowledge index, rendered as
//! numbered text blocks for tool results.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::embeddings::{Document, KnowledgeIndex};
use crate::types::AppResult;

/// Relevance/diversity weight used when a caller has no preference
pub const DEFAULT_DIVERSITY: f32 = 0.5;

pub struct RetrievalService {
    index: Arc<KnowledgeIndex>,
    query_lock: Mutex<()>,
}

impl RetrievalService {
    pub fn new(index: Arc<KnowledgeIndex>) -> Self {
        Self {
            index,
            query_lock: Mutex::new(()),
        }
    }

    /// Fetch `fetch_k` nearest chunks, keep `k` of them by MMR and format
    /// them. `diversity` of 1.0 ranks by similarity alone.
    pub async fn search(&self, query: &str, k: usize, fetch_k: usize, diversity: f32) -> AppResult<String> {
        let diversity = diversity.clamp(0.0, 1.0);
        let documents = {
            let _guard = self.query_lock.lock().await;
            self.index.search_mmr(query, k, fetch_k, diversity).await?
        };
        debug!(query = %query, k, fetch_k, diversity, hits = documents.len(), "Knowledge search");
        Ok(format_results(query, &documents))
    }
}

/// Render hits as `[Result n]` blocks separated by blank lines. Zero hits
/// produce a fixed sentence naming the query.
pub fn format_results(query: &str, documents: &[Document]) -> String {
    if documents.is_empty() {
        return not_found_message(query);
    }
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[Result {}]\n{}", i + 1, doc.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn not_found_message(query: &str) -> String {
    format!("No expert knowledge was found for \"{}\".", query)
}
