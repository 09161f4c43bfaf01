//! Vector-index capability: `insert`, `search`, `delete_by_id`,
//! `count`, `clear`. Metric: cosine.
//!
//! Backend-agnostic trait so a LanceDB- or Qdrant-backed implementation
//! can be substituted without touching C3's retrieval logic. The default
//! implementation here is a plain in-memory index — a production vector
//! index is out of scope for this crate.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::RetrievalError;
use crate::rag::embedding::cosine_similarity;

/// A single hit returned by `VectorIndex::search`.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct VectorRecord {
    id: String,
    embedding: Vec<f32>,
    name: String,
    description: String,
    category: String,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn insert(
        &self,
        id: String,
        embedding: Vec<f32>,
        name: String,
        description: String,
        category: String,
    ) -> Result<(), RetrievalError>;

    async fn insert_batch(
        &self,
        items: Vec<(String, Vec<f32>, String, String, String)>,
    ) -> Result<(), RetrievalError> {
        for (id, embedding, name, description, category) in items {
            self.insert(id, embedding, name, description, category).await?;
        }
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        category_filter: Option<&str>,
    ) -> Result<Vec<VectorMatch>, RetrievalError>;

    async fn delete_by_id(&self, id: &str) -> Result<(), RetrievalError>;

    async fn count(&self) -> Result<usize, RetrievalError>;

    async fn clear(&self) -> Result<(), RetrievalError>;
}

/// In-memory cosine-similarity index.
pub struct InMemoryVectorIndex {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self { records: RwLock::new(Vec::new()) }
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn insert(
        &self,
        id: String,
        embedding: Vec<f32>,
        name: String,
        description: String,
        category: String,
    ) -> Result<(), RetrievalError> {
        let mut records = self.records.write().await;
        records.retain(|r| r.id != id);
        records.push(VectorRecord { id, embedding, name, description, category });
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        category_filter: Option<&str>,
    ) -> Result<Vec<VectorMatch>, RetrievalError> {
        let records = self.records.read().await;
        let mut scored: Vec<VectorMatch> = records
            .iter()
            .filter(|r| category_filter.map_or(true, |c| r.category == c))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                name: r.name.clone(),
                description: r.description.clone(),
                category: r.category.clone(),
                score: cosine_similarity(embedding, &r.embedding),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_id(&self, id: &str) -> Result<(), RetrievalError> {
        let mut records = self.records.write().await;
        records.retain(|r| r.id != id);
        Ok(())
    }

    async fn count(&self) -> Result<usize, RetrievalError> {
        Ok(self.records.read().await.len())
    }

    async fn clear(&self) -> Result<(), RetrievalError> {
        self.records.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_is_upsert_by_id() {
        let index = InMemoryVectorIndex::new();
        index
            .insert("a".into(), vec![1.0, 0.0], "A".into(), "desc".into(), "cat".into())
            .await
            .unwrap();
        index
            .insert("a".into(), vec![0.0, 1.0], "A2".into(), "desc2".into(), "cat".into())
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_missing_is_not_an_error() {
        let index = InMemoryVectorIndex::new();
        assert!(index.delete_by_id("missing").await.is_ok());
    }

    #[tokio::test]
    async fn search_filters_by_category() {
        let index = InMemoryVectorIndex::new();
        index.insert("a".into(), vec![1.0, 0.0], "A".into(), "".into(), "weather".into()).await.unwrap();
        index.insert("b".into(), vec![1.0, 0.0], "B".into(), "".into(), "news".into()).await.unwrap();
        let hits = index.search(&[1.0, 0.0], 10, Some("weather")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }
}
