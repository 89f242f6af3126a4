//! Schema Embedder
//!
//! Turns descriptive text into fixed-length vectors. The same embedder (same
//! model id and dimension) must be used to build an index and to query it.

use crate::error::{Result, SqlRagError};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier persisted with the index so a query-time model mismatch is caught.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Embedding>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Embedding client for an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, base_url: String, model: String, dimension: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            dimension,
        }
    }

    /// Only the `text-embedding-3` family accepts a requested dimension.
    fn request_body(&self, texts: &[String]) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        if self.model.starts_with("text-embedding-3") {
            body["dimensions"] = serde_json::json!(self.dimension);
        }
        body
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut batch = self.embed_batch(&[text.to_string()]).await?;
        batch
            .pop()
            .ok_or_else(|| SqlRagError::Embedding("No embedding data in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.request_body(texts))
            .send()
            .await
            .map_err(|e| SqlRagError::Embedding(format!("Embedding API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SqlRagError::Embedding(format!(
                "Embedding API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: serde_json::Value = response.json().await.map_err(|e| {
            SqlRagError::Embedding(format!("Failed to parse embedding response: {}", e))
        })?;

        let data = response_json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| SqlRagError::Embedding("No embedding data in response".to_string()))?;

        // The API may return items out of order; `index` restores input order.
        let mut indexed: Vec<(usize, Embedding)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            let embedding: Embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| {
                    SqlRagError::Embedding("No embedding vector in response".to_string())
                })?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if embedding.len() != self.dimension {
                return Err(SqlRagError::Embedding(format!(
                    "Model {} returned {} dimensions, expected {}",
                    self.model,
                    embedding.len(),
                    self.dimension
                )));
            }
            indexed.push((index, embedding));
        }
        if indexed.len() != texts.len() {
            return Err(SqlRagError::Embedding(format!(
                "Requested {} embeddings, received {}",
                texts.len(),
                indexed.len()
            )));
        }
        indexed.sort_by_key(|(index, _)| *index);
        Ok(indexed.into_iter().map(|(_, e)| e).collect())
    }
}

/// Deterministic offline embedder.
///
/// Hashes lowercase terms (and the sub-words of `camelCase`/`snake_case`
/// identifiers) into fixed buckets weighted by term frequency, then L2
/// normalises. Needs no network and always gives the same vector for the
/// same text, which keeps index builds and tests reproducible.
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model_id: format!("hashing-{}", dimension),
        }
    }

    fn hash_term(term: &str, dims: usize) -> usize {
        // FNV-1a
        let mut h: u64 = 0xcbf29ce484222325;
        for b in term.as_bytes() {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
        (h % dims as u64) as usize
    }

    fn tokenize(text: &str) -> Vec<String> {
        let mut terms = Vec::new();
        for raw in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if raw.is_empty() {
                continue;
            }
            let lowered = raw.to_lowercase();
            let parts = split_identifier(raw);
            if parts.len() > 1 {
                terms.extend(parts.into_iter().filter(|p| p.len() >= 2));
            }
            if lowered.len() >= 2 {
                terms.push(lowered);
            }
        }
        terms
    }

    /// Sorted so bucket sums add up in the same order in every process.
    fn term_counts(tokens: &[String]) -> BTreeMap<&str, f32> {
        let mut tf: BTreeMap<&str, f32> = BTreeMap::new();
        for tok in tokens {
            *tf.entry(tok.as_str()).or_default() += 1.0;
        }
        tf
    }

    fn vectorize(&self, text: &str) -> Embedding {
        let mut vec = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vec;
        }
        let tokens = Self::tokenize(text);
        if tokens.is_empty() {
            return vec;
        }

        let total = tokens.len() as f32;
        for (term, count) in Self::term_counts(&tokens) {
            let weight = (count / total) * (1.0 + (term.len() as f32).ln());
            vec[Self::hash_term(term, self.dimension)] += weight;
        }

        let norm: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vec {
                *v /= norm;
            }
        }
        vec
    }
}

/// Splits `inlBuilding_FRK` into `["inl", "building", "frk"]`.
fn split_identifier(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for chunk in raw.split('_').filter(|c| !c.is_empty()) {
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in chunk.chars() {
            if ch.is_uppercase() && prev_lower && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
            }
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            current.extend(ch.to_lowercase());
        }
        if !current.is_empty() {
            parts.push(current);
        }
    }
    parts
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        Ok(self.vectorize(text))
    }
}

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 1.0);

        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_split_identifier() {
        assert_eq!(
            split_identifier("inlBuilding_FRK"),
            vec!["inl".to_string(), "building".to_string(), "frk".to_string()]
        );
        assert_eq!(split_identifier("created_at"), vec!["created", "at"]);
    }

    #[tokio::test]
    async fn test_hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("incidents in building A").await.unwrap();
        let b = embedder.embed("incidents in building A").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hashing_embedder_shares_identifier_terms() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("building").await.unwrap();
        let related = embedder.embed("IncidentLog_TBL.inlBuilding_FRK (INTEGER)").await.unwrap();
        let unrelated = embedder.embed("Unit_TBL.untPhone (NVARCHAR)").await.unwrap();
        assert!(cosine_similarity(&query, &related) > cosine_similarity(&query, &unrelated));
    }

    #[test]
    fn test_term_counts_are_ordered() {
        let tokens = HashingEmbedder::tokenize("status building status area");
        let counts = HashingEmbedder::term_counts(&tokens);
        let terms: Vec<&str> = counts.keys().copied().collect();
        assert_eq!(terms, vec!["area", "building", "status"]);
        assert_eq!(counts["status"], 2.0);
    }

    #[test]
    fn test_openai_request_asks_for_configured_dimension() {
        let texts = vec!["incident".to_string()];
        let small = OpenAiEmbedder::new(
            "sk-test".to_string(),
            "https://api.openai.com/v1".to_string(),
            "text-embedding-3-small".to_string(),
            384,
        );
        assert_eq!(small.request_body(&texts)["dimensions"], 384);

        let ada = OpenAiEmbedder::new(
            "sk-test".to_string(),
            "https://api.openai.com/v1".to_string(),
            "text-embedding-ada-002".to_string(),
            1536,
        );
        assert!(ada.request_body(&texts).get("dimensions").is_none());
    }

    #[tokio::test]
    async fn test_empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(16);
        let v = embedder.embed("").await.unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
    }
}
