//! Embedder capability (spec.md §6): `embed`, `embed_batch`, `dimension`.
//! Vectors are L2-normalized.

use async_trait::async_trait;

use crate::error::RetrievalError;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RetrievalError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimension(&self) -> usize;
}

/// Deterministic, offline embedder used as the default/test implementation.
///
/// Hashes overlapping character trigrams into fixed-width buckets (a
/// bag-of-trigrams sketch), then L2-normalizes. It is not a semantic
/// embedding model — the crate's non-goal is "implementing a vector
/// index"/embedder; this gives the retrieval pipeline something
/// deterministic to exercise in tests without a network call.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, RetrievalError> {
        let mut buckets = vec![0f32; self.dimension];
        let normalized = text.to_lowercase();
        let chars: Vec<char> = normalized.chars().collect();
        if chars.is_empty() {
            return Ok(buckets);
        }
        let trigram_len = 3usize.min(chars.len());
        for window in chars.windows(trigram_len) {
            let trigram: String = window.iter().collect();
            let hash = fnv1a(trigram.as_bytes());
            let bucket = (hash as usize) % self.dimension;
            buckets[bucket] += 1.0;
        }
        l2_normalize(&mut buckets);
        Ok(buckets)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
