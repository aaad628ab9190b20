// Knowledge corpus loading

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use super::text_chunker::{chunk_markdown, RecursiveSplitter};
use crate::types::{AppError, AppResult};

/// A chunk of the knowledge corpus with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Content digest, stable across rebuilds
    pub id: String,
    pub content: String,
    /// Heading path, outermost first
    #[serde(default)]
    pub headers: Vec<String>,
    pub source: String,
}

impl Document {
    pub fn new(content: impl Into<String>, headers: Vec<String>, source: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            id: content_id(&content),
            content,
            headers,
            source: source.into(),
        }
    }
}

pub fn content_id(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

pub struct DocumentProcessor {
    splitter: RecursiveSplitter,
}

impl DocumentProcessor {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            splitter: RecursiveSplitter::new(chunk_size, chunk_overlap),
        }
    }

    /// Chunk a markdown string
    pub fn process_markdown(&self, text: &str, source: &str) -> Vec<Document> {
        chunk_markdown(text, &self.splitter)
            .into_iter()
            .map(|chunk| {
                let headers = chunk.headers.into_iter().map(|(_, title)| title).collect();
                Document::new(chunk.content, headers, source)
            })
            .collect()
    }

    /// Read and chunk the corpus file. A missing file is reported as
    /// `KnowledgeSourceMissing` so callers can tell it apart from I/O faults.
    pub async fn load_corpus(&self, path: &Path) -> AppResult<Vec<Document>> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(AppError::KnowledgeSourceMissing(path.to_path_buf()));
        }

        let text = tokio::fs::read_to_string(path).await?;
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());

        let documents = self.process_markdown(&text, &source);
        debug!(source = %source, bytes = text.len(), "Read knowledge corpus");
        info!(source = %source, chunks = documents.len(), "Chunked knowledge corpus");
        Ok(documents)
    }
}
