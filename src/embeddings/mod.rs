// Embeddings, chunking and vector search for the expert knowledge corpus

pub mod document_processor;
pub mod hashing;
pub mod knowledge_index;
pub mod text_chunker;
pub mod vector_search;

pub use document_processor::{Document, DocumentProcessor};
pub use hashing::HashingEmbedder;
pub use knowledge_index::KnowledgeIndex;
pub use text_chunker::{chunk_markdown, split_markdown_sections, RecursiveSplitter};
pub use vector_search::{cosine_similarity, maximal_marginal_relevance, VectorStore};
