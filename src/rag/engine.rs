//! RAG Retriever (C3) — two-stage retrieval: vector search, then rerank
//! (spec.md §4.3).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::RetrievalError;
use crate::rag::embedding::Embedder;
use crate::rag::vector_store::{VectorIndex, VectorMatch};
use crate::registry::types::FunctionSchema;

/// One retrieval hit with its similarity score.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievedFunction {
    pub function_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub score: f32,
}

/// Contract for §4.3: `retrieve`, `index`, `index_batch`, `delete`, `stats`.
#[async_trait]
pub trait RagRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        category_filter: Option<&str>,
        rerank: bool,
        k1: usize,
        k2: usize,
    ) -> Result<Vec<RetrievedFunction>, RetrievalError>;
}

/// Projects registry mutations into the vector index (used by the sync worker).
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, schema: &FunctionSchema) -> Result<(), RetrievalError>;
    async fn delete(&self, function_id: &str) -> Result<(), RetrievalError>;
}

#[derive(Debug, Clone, Default)]
pub struct RagStats {
    pub indexed_count: usize,
}

pub struct RagEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
}

impl RagEngine {
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        Self { embedder, index }
    }

    /// Embedding input for a function: `" | "`-joined fields, omitting
    /// empty ones (spec.md §4.3).
    pub fn embedding_input(schema: &FunctionSchema) -> String {
        let mut parts = Vec::new();
        if !schema.name.is_empty() {
            parts.push(format!("Function: {}", schema.name));
        }
        if !schema.description.is_empty() {
            parts.push(format!("Description: {}", schema.description));
        }
        if !schema.category.is_empty() {
            parts.push(format!("Category: {}", schema.category));
        }
        let params = schema.parameters.properties.keys().cloned().collect::<Vec<_>>().join(", ");
        if !params.is_empty() {
            parts.push(format!("Parameters: {params}"));
        }
        parts.join(" | ")
    }

    pub async fn vector_count(&self) -> usize {
        self.index.count().await.unwrap_or(0)
    }

    pub async fn stats(&self) -> RagStats {
        RagStats { indexed_count: self.vector_count().await }
    }

    fn token_overlap_ratio(query: &str, text: &str) -> f32 {
        let q: HashSet<&str> = query.split_whitespace().collect();
        let t: HashSet<&str> = text.split_whitespace().collect();
        let q_lower: HashSet<String> = q.iter().map(|s| s.to_lowercase()).collect();
        let t_lower: HashSet<String> = t.iter().map(|s| s.to_lowercase()).collect();
        let overlap = q_lower.intersection(&t_lower).count();
        overlap as f32 / (q_lower.len().max(1)) as f32
    }
}

#[async_trait]
impl RagRetriever for RagEngine {
    async fn retrieve(
        &self,
        query: &str,
        category_filter: Option<&str>,
        rerank: bool,
        k1: usize,
        k2: usize,
    ) -> Result<Vec<RetrievedFunction>, RetrievalError> {
        let query_embedding = self.embedder.embed(query).await?;
        let stage1: Vec<VectorMatch> = self.index.search(&query_embedding, k1, category_filter).await?;
        debug!(hits = stage1.len(), "stage-1 vector search complete");

        let mut candidates: Vec<RetrievedFunction> = stage1
            .into_iter()
            .map(|m| RetrievedFunction {
                function_id: m.id,
                name: m.name,
                description: m.description,
                category: m.category,
                score: m.score,
            })
            .collect();

        if rerank {
            for c in candidates.iter_mut() {
                let combined = format!("{} {}", c.name, c.description);
                let overlap = Self::token_overlap_ratio(query, &combined);
                c.score = 0.8 * c.score + 0.2 * overlap;
            }
            candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }
        candidates.truncate(k2);
        Ok(candidates)
    }
}

#[async_trait]
impl Indexer for RagEngine {
    async fn index(&self, schema: &FunctionSchema) -> Result<(), RetrievalError> {
        let input = Self::embedding_input(schema);
        let embedding = self.embedder.embed(&input).await?;
        self.index
            .insert(
                schema.function_id.clone(),
                embedding,
                schema.name.clone(),
                schema.description.clone(),
                schema.category.clone(),
            )
            .await
    }

    async fn delete(&self, function_id: &str) -> Result<(), RetrievalError> {
        self.index.delete_by_id(function_id).await
    }
}

/// Run an async `retrieve` with a wall-clock timeout, used by the Hybrid
/// Selector's RAG tier (spec.md §4.4).
pub async fn retrieve_with_timeout(
    engine: &dyn RagRetriever,
    query: &str,
    category_filter: Option<&str>,
    rerank: bool,
    k1: usize,
    k2: usize,
    timeout: Duration,
) -> Result<Vec<RetrievedFunction>, RetrievalError> {
    match tokio::time::timeout(timeout, engine.retrieve(query, category_filter, rerank, k1, k2)).await {
        Ok(result) => result,
        Err(_) => Err(RetrievalError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::embedding::HashEmbedder;
    use crate::rag::vector_store::InMemoryVectorIndex;
    use crate::registry::types::{ParameterSchema, UsageStats};
    use crate::types::HttpMethod;

    fn schema(id: &str, name: &str, description: &str, category: &str) -> FunctionSchema {
        FunctionSchema {
            function_id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
            endpoint: "https://x".to_string(),
            http_method: HttpMethod::Get,
            auth_required: false,
            parameters: ParameterSchema::default(),
            response_schema: None,
            cache_ttl_seconds: 0,
            timeout_seconds: 10,
            tags: vec![],
            deprecated: false,
            version: 1,
            usage: UsageStats::default(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn embedding_input_omits_empty_fields() {
        let mut f = schema("f1", "get_weather", "", "weather");
        f.description = String::new();
        let input = RagEngine::embedding_input(&f);
        assert_eq!(input, "Function: get_weather | Category: weather");
    }

    #[tokio::test]
    async fn retrieve_prefers_matching_function() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new());
        let engine = RagEngine::new(embedder, index);

        engine.index(&schema("get_weather", "get_weather", "Get current weather for a location", "weather")).await.unwrap();
        engine.index(&schema("get_news", "get_news", "Get latest news headlines", "news")).await.unwrap();

        let results = engine.retrieve("What's the weather in Hanoi?", None, true, 20, 5).await.unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].function_id, "get_weather");
    }

    #[tokio::test]
    async fn retrieve_honors_category_filter() {
        let embedder = Arc::new(HashEmbedder::new(64));
        let index = Arc::new(InMemoryVectorIndex::new());
        let engine = RagEngine::new(embedder, index);
        engine.index(&schema("get_weather", "get_weather", "weather lookup", "weather")).await.unwrap();
        engine.index(&schema("get_news", "get_news", "news lookup", "news")).await.unwrap();

        let results = engine.retrieve("lookup", Some("news"), true, 20, 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].function_id, "get_news");
    }
}
