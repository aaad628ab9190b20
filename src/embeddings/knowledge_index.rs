//! Persistent knowledge index over the expert corpus.
//!
//! The index is opened once per process and shared. It is built lazily:
//! the first search on an empty index chunks and embeds the corpus, and
//! concurrent first searches wait on a build lock so the corpus is embedded
//! exactly once. A non-empty persisted index is reused as-is. A corpus
//! without any chunks yields an empty index that answers every search with
//! no documents.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::document_processor::{Document, DocumentProcessor};
use super::vector_search::VectorStore;
use crate::config::KnowledgeConfig;
use crate::llm::EmbeddingAdapter;
use crate::types::AppResult;

pub struct KnowledgeIndex {
    config: KnowledgeConfig,
    embedder: Arc<dyn EmbeddingAdapter>,
    batch_size: usize,
    store: RwLock<VectorStore>,
    build_lock: Mutex<()>,
    /// Set once a build has run in this process, even if it stored nothing
    built: AtomicBool,
}

impl KnowledgeIndex {
    /// Open the index, loading any persisted collection. Does not build.
    pub async fn open(
        config: KnowledgeConfig,
        embedder: Arc<dyn EmbeddingAdapter>,
        batch_size: usize,
    ) -> AppResult<Self> {
        let store = VectorStore::load(&config.index_path, &config.collection_name).await?;
        info!(
            collection = %config.collection_name,
            path = %config.index_path.display(),
            documents = store.len(),
            "Opened knowledge index"
        );
        Ok(Self {
            config,
            embedder,
            batch_size: batch_size.max(1),
            store: RwLock::new(store),
            build_lock: Mutex::new(()),
            built: AtomicBool::new(false),
        })
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.is_empty()
    }

    /// Build from the corpus if the collection is empty. Returns the
    /// number of stored documents.
    pub async fn ensure_built(&self) -> AppResult<usize> {
        let current = self.len().await;
        if current > 0 || self.built.load(Ordering::Acquire) {
            return Ok(current);
        }

        let _guard = self.build_lock.lock().await;
        // Another task may have finished the build while we waited
        let current = self.len().await;
        if current > 0 || self.built.load(Ordering::Acquire) {
            return Ok(current);
        }
        self.build().await
    }

    /// Re-embed the corpus and replace the collection
    pub async fn rebuild(&self) -> AppResult<usize> {
        let _guard = self.build_lock.lock().await;
        self.build().await
    }

    async fn build(&self) -> AppResult<usize> {
        let processor = DocumentProcessor::new(self.config.chunk_size, self.config.chunk_overlap);
        let documents = processor.load_corpus(&self.config.corpus_path).await?;
        if documents.is_empty() {
            warn!(
                path = %self.config.corpus_path.display(),
                "Knowledge corpus produced no chunks; searches will find nothing"
            );
            *self.store.write().await = VectorStore::new(&self.config.collection_name);
            self.built.store(true, Ordering::Release);
            return Ok(0);
        }

        let mut store = VectorStore::new(&self.config.collection_name);
        for batch in documents.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.content.clone()).collect();
            let embeddings = self.embedder.embed_documents(&texts).await?;
            let added = store.add_documents(batch.to_vec(), embeddings)?;
            debug!(batch = batch.len(), added, "Embedded corpus batch");
        }

        store.save(&self.config.index_path).await?;
        let count = store.len();
        *self.store.write().await = store;
        self.built.store(true, Ordering::Release);

        info!(
            collection = %self.config.collection_name,
            documents = count,
            "Built knowledge index"
        );
        Ok(count)
    }

    /// MMR search over the collection, building it first if needed
    pub async fn search_mmr(
        &self,
        query: &str,
        k: usize,
        fetch_k: usize,
        lambda: f32,
    ) -> AppResult<Vec<Document>> {
        self.ensure_built().await?;
        let query_embedding = self.embedder.embed_query(query).await?;
        let store = self.store.read().await;
        Ok(store
            .mmr_search(&query_embedding, k, fetch_k, lambda)
            .into_iter()
            .map(|r| r.document)
            .collect())
    }
}
