//! Embedding seam for the memory store
//!
//! The semantic half of hybrid retrieval needs a vector per text. The HTTP
//! provider talks to an embeddings endpoint; the hash provider is fully
//! deterministic and serves embedded mode and tests.

use crate::error::{CouncilError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

#[async_trait::async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

//
// ================= HTTP Backend =================
//

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings-endpoint client (connection-pooled).
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: String, api_key: Option<String>, model: String) -> Self {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CouncilError::Embedding(format!("embedding request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(CouncilError::Embedding(format!(
                "embedding backend returned {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CouncilError::Embedding(format!("invalid embedding response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CouncilError::Embedding("empty embedding response".to_string()))
    }
}

//
// ================= Deterministic Local Backend =================
//

/// Feature-hashing embedder: each token is hashed into a fixed-size bucket
/// with a sign bit, and the result is L2-normalized. Identical text always
/// produces identical vectors.
pub struct HashEmbeddingProvider {
    dims: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(8) }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dims];

        for token in super::retrieval::tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(raw);

            let bucket = (hash % self.dims as u64) as usize;
            let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        debug!(dims = self.dims, "computed local embedding");
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedding_is_deterministic() {
        let embedder = HashEmbeddingProvider::default();
        let a = embedder.embed("tech sector volatility rising").await.unwrap();
        let b = embedder.embed("tech sector volatility rising").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn hash_embedding_is_normalized() {
        let embedder = HashEmbeddingProvider::default();
        let v = embedder.embed("strong bullish momentum").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_text_differs() {
        let embedder = HashEmbeddingProvider::default();
        let a = embedder.embed("bullish momentum").await.unwrap();
        let b = embedder.embed("bearish reversal").await.unwrap();
        assert_ne!(a, b);
    }
}
