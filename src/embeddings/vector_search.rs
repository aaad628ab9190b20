// In-process vector store with JSON persistence and MMR search

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, warn};

use super::document_processor::Document;
use crate::types::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub document: Document,
    pub embedding: Vec<f32>,
}

/// A named collection of embedded documents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VectorStore {
    pub collection: String,
    entries: Vec<StoredDocument>,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

impl VectorStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            entries: Vec::new(),
        }
    }

    /// Load a persisted collection. A missing file yields an empty store.
    pub async fn load(path: &Path, collection: &str) -> AppResult<Self> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "No persisted index, starting empty");
            return Ok(Self::new(collection));
        }

        let raw = tokio::fs::read_to_string(path).await?;
        let store: VectorStore = serde_json::from_str(&raw)?;
        if store.collection != collection {
            warn!(
                path = %path.display(),
                found = %store.collection,
                expected = %collection,
                "Persisted index belongs to another collection, starting empty"
            );
            return Ok(Self::new(collection));
        }
        Ok(store)
    }

    /// Write the collection to disk via a temporary file and rename
    pub async fn save(&self, path: &Path) -> AppResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    /// Add documents, skipping ids already present. Returns the number added.
    pub fn add_documents(&mut self, documents: Vec<Document>, embeddings: Vec<Vec<f32>>) -> AppResult<usize> {
        if documents.len() != embeddings.len() {
            return Err(AppError::Embedding(format!(
                "Got {} embeddings for {} documents",
                embeddings.len(),
                documents.len()
            )));
        }

        let mut seen: HashSet<String> = self.entries.iter().map(|e| e.document.id.clone()).collect();
        let mut dims = self.dimensions();
        let mut added = 0;

        for (document, embedding) in documents.into_iter().zip(embeddings) {
            if !seen.insert(document.id.clone()) {
                continue;
            }
            match dims {
                Some(d) if d != embedding.len() => {
                    return Err(AppError::Embedding(format!(
                        "Embedding dimension {} does not match collection dimension {}",
                        embedding.len(),
                        d
                    )));
                }
                None => dims = Some(embedding.len()),
                _ => {}
            }
            self.entries.push(StoredDocument { document, embedding });
            added += 1;
        }
        Ok(added)
    }

    /// Top `fetch_k` entries by cosine similarity, best first
    pub fn similarity_candidates(&self, query: &[f32], fetch_k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(fetch_k);
        scored
    }

    /// Fetch `fetch_k` nearest candidates, then pick `k` of them by MMR
    pub fn mmr_search(&self, query: &[f32], k: usize, fetch_k: usize, lambda: f32) -> Vec<SearchResult> {
        let candidates = self.similarity_candidates(query, fetch_k.max(k));
        let embeddings: Vec<&[f32]> = candidates
            .iter()
            .map(|(i, _)| self.entries[*i].embedding.as_slice())
            .collect();

        maximal_marginal_relevance(query, &embeddings, k, lambda)
            .into_iter()
            .map(|pos| {
                let (i, score) = candidates[pos];
                SearchResult {
                    document: self.entries[i].document.clone(),
                    score,
                }
            })
            .collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Select up to `k` candidate positions balancing query relevance against
/// redundancy: score = lambda * sim(query, c) - (1 - lambda) * max sim(c, selected).
/// The first pick is always the most relevant candidate.
pub fn maximal_marginal_relevance(query: &[f32], candidates: &[&[f32]], k: usize, lambda: f32) -> Vec<usize> {
    let limit = k.min(candidates.len());
    if limit == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates.iter().map(|c| cosine_similarity(query, c)).collect();
    let mut selected: Vec<usize> = Vec::with_capacity(limit);

    while selected.len() < limit {
        let mut best: Option<(usize, f32)> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            if selected.contains(&i) {
                continue;
            }
            let redundancy = selected
                .iter()
                .map(|&j| cosine_similarity(candidate, candidates[j]))
                .fold(f32::NEG_INFINITY, f32::max);
            let redundancy = if selected.is_empty() { 0.0 } else { redundancy };
            let score = lambda * relevance[i] - (1.0 - lambda) * redundancy;
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        match best {
            Some((i, _)) => selected.push(i),
            None => break,
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> Document {
        Document::new(text, vec![], "test.md")
    }

    #[test]
    fn test_cosine_similarity_edges() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_mmr_prefers_diverse_results() {
        let query = [1.0, 0.0];
        let near_a: &[f32] = &[0.99, 0.14];
        let near_a_dup: &[f32] = &[0.98, 0.2];
        let other: &[f32] = &[0.6, -0.8];
        let picks = maximal_marginal_relevance(&query, &[near_a, near_a_dup, other], 2, 0.5);
        assert_eq!(picks, vec![0, 2]);

        // Pure relevance keeps the near-duplicate
        let picks = maximal_marginal_relevance(&query, &[near_a, near_a_dup, other], 2, 1.0);
        assert_eq!(picks, vec![0, 1]);
    }

    #[test]
    fn test_mmr_limits() {
        let query = [1.0, 0.0];
        let only: &[f32] = &[1.0, 0.0];
        assert!(maximal_marginal_relevance(&query, &[], 3, 0.5).is_empty());
        assert_eq!(maximal_marginal_relevance(&query, &[only], 3, 0.5), vec![0]);
        assert!(maximal_marginal_relevance(&query, &[only], 0, 0.5).is_empty());
    }

    #[test]
    fn test_add_documents_dedups_by_id() {
        let mut store = VectorStore::new("c");
        let added = store
            .add_documents(vec![doc("a"), doc("b")], vec![vec![1.0, 0.0], vec![0.0, 1.0]])
            .unwrap();
        assert_eq!(added, 2);
        let added = store.add_documents(vec![doc("a")], vec![vec![1.0, 0.0]]).unwrap();
        assert_eq!(added, 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut store = VectorStore::new("c");
        store.add_documents(vec![doc("a")], vec![vec![1.0, 0.0]]).unwrap();
        let err = store.add_documents(vec![doc("b")], vec![vec![1.0]]).unwrap_err();
        assert!(matches!(err, AppError::Embedding(_)));
    }

    #[test]
    fn test_mmr_search_returns_documents() {
        let mut store = VectorStore::new("c");
        store
            .add_documents(
                vec![doc("squat"), doc("squat variation"), doc("stretching")],
                vec![vec![0.99, 0.14], vec![0.98, 0.2], vec![0.6, -0.8]],
            )
            .unwrap();
        let results = store.mmr_search(&[1.0, 0.0], 2, 3, 0.5);
        let texts: Vec<&str> = results.iter().map(|r| r.document.content.as_str()).collect();
        assert_eq!(texts, vec!["squat", "stretching"]);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("index.json");
        let mut store = VectorStore::new("inbody_knowledge");
        store.add_documents(vec![doc("a")], vec![vec![0.5, 0.5]]).unwrap();
        store.save(&path).await.unwrap();

        let loaded = VectorStore::load(&path, "inbody_knowledge").await.unwrap();
        assert_eq!(loaded.len(), 1);
        let other = VectorStore::load(&path, "something_else").await.unwrap();
        assert!(other.is_empty());
        let missing = VectorStore::load(&dir.path().join("none.json"), "x").await.unwrap();
        assert!(missing.is_empty());
    }
}
