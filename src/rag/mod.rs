//! Retrieval-Augmented Function Search (C3) — embedding, vector index, and
//! the two-stage retrieve-then-rerank engine (spec.md §4.3).

pub mod embedding;
pub mod engine;
pub mod vector_store;

pub use embedding::{cosine_similarity, l2_normalize, Embedder, HashEmbedder};
pub use engine::{retrieve_with_timeout, Indexer, RagEngine, RagRetriever, RagStats, RetrievedFunction};
pub use vector_store::{InMemoryVectorIndex, VectorIndex, VectorMatch};
