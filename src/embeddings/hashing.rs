//! Offline feature-hashing embedder.
//!
//! Maps lower-cased word unigrams and bigrams into a fixed number of
//! buckets with FNV-1a and L2-normalises the result. Useful for local
//! development and tests where no embedding API key is available.

use async_trait::async_trait;

use crate::llm::EmbeddingAdapter;
use crate::types::AppResult;

const FNV_OFFSET: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn fnv1a(token: &str) -> u64 {
        token.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
        })
    }

    fn tokenize(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = Self::tokenize(text);

        let mut add = |feature: &str, weight: f32| {
            let hash = Self::fnv1a(feature);
            let bucket = (hash % self.dimensions as u64) as usize;
            // Top bit picks the sign so collisions tend to cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        };

        for token in &tokens {
            add(token, 1.0);
        }
        for pair in tokens.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingAdapter for HashingEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    async fn embed_query(&self, text: &str) -> AppResult<Vec<f32>> {
        Ok(self.embed(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::vector_search::cosine_similarity;

    #[test]
    fn test_embedding_is_normalised() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed("Hidden obesity needs resistance training");
        assert_eq!(v.len(), 64);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_empty_text_gives_zero_vector() {
        let embedder = HashingEmbedder::new(32);
        assert!(embedder.embed("  ...  ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_related_text_scores_higher() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed("squat technique for beginners");
        let close = embedder.embed("Beginners should learn squat technique with a box");
        let far = embedder.embed("Protein intake for recovery after cardio");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[tokio::test]
    async fn test_adapter_embeds_in_order() {
        let embedder = HashingEmbedder::new(16);
        let texts = vec!["a b".to_string(), "c d".to_string()];
        let vectors = embedder.embed_documents(&texts).await.unwrap();
        assert_eq!(vectors[1], embedder.embed("c d"));
        assert_eq!(embedder.embed_query("a b").await.unwrap(), vectors[0]);
    }
}
