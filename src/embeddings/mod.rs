//! Embedding provider capability.
//!
//! The engine never computes embeddings itself; it consumes an
//! [`EmbeddingProvider`]. Two implementations ship with the crate:
//!
//! * [`MockEmbeddingProvider`] — deterministic bag-of-words vectors for tests
//!   and CI, no network.
//! * [`HttpEmbeddingProvider`] — OpenAI-compatible `/embeddings` endpoint via
//!   `reqwest`, covering most hosted and local (Ollama, vLLM, LM Studio)
//!   servers.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::RagError;

/// Produces fixed-length vectors for a named model.
///
/// Implementations must return vectors whose length matches the model's
/// declared dimension; the index build re-validates and rejects mismatches
/// with [`RagError::DimensionMismatch`].
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text. Used on the query path.
    async fn embed(&self, text: &str, model_key: &str) -> Result<Vec<f32>, RagError>;

    /// Embed a batch of texts, order-preserving. Used by offline ingestion.
    async fn embed_batch(
        &self,
        texts: &[String],
        model_key: &str,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text, model_key).await?);
        }
        Ok(vectors)
    }
}

/// Deterministic embedding provider for tests.
///
/// Vectors are normalized bag-of-words projections: each lowercase word is
/// hashed into one of `dimension` buckets. Texts sharing vocabulary get high
/// cosine similarity, unrelated texts land near zero, and identical inputs
/// always produce identical vectors.
#[derive(Clone, Debug, Default)]
pub struct MockEmbeddingProvider {
    dimensions: HashMap<String, usize>,
}

impl MockEmbeddingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the dimension used for `model_key`.
    #[must_use]
    pub fn with_model(mut self, model_key: impl Into<String>, dimension: usize) -> Self {
        self.dimensions.insert(model_key.into(), dimension);
        self
    }

    fn dimension_for(&self, model_key: &str) -> usize {
        self.dimensions.get(model_key).copied().unwrap_or(64)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Bag-of-words projection used by the mock provider, exposed for tests that
/// need raw vectors.
pub fn mock_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let mut vector = vec![0.0f32; dimension.max(1)];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = (fnv1a(word.to_lowercase().as_bytes()) as usize) % vector.len();
        vector[bucket] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str, model_key: &str) -> Result<Vec<f32>, RagError> {
        Ok(mock_embedding(text, self.dimension_for(model_key)))
    }
}

#[derive(Serialize)]
struct EmbeddingHttpRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingHttpResponse {
    data: Vec<EmbeddingHttpDatum>,
}

#[derive(Deserialize)]
struct EmbeddingHttpDatum {
    embedding: Vec<f32>,
}

/// OpenAI-compatible HTTP embedding provider.
///
/// Speaks the `POST {base_url}/embeddings` protocol with a JSON body of
/// `{"model": ..., "input": [...]}` and reads `data[*].embedding` from the
/// response.
#[derive(Clone, Debug)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Reuse an existing client (connection pooling across providers).
    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }

    async fn request(&self, texts: &[String], model_key: &str) -> Result<Vec<Vec<f32>>, RagError> {
        let body = EmbeddingHttpRequest {
            model: model_key,
            input: texts,
        };
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| RagError::Embedding {
                model: model_key.to_string(),
                reason: err.to_string(),
            })?;

        let parsed: EmbeddingHttpResponse =
            response.json().await.map_err(|err| RagError::Embedding {
                model: model_key.to_string(),
                reason: format!("invalid response body: {err}"),
            })?;

        if parsed.data.len() != texts.len() {
            return Err(RagError::Embedding {
                model: model_key.to_string(),
                reason: format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.data.len()
                ),
            });
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str, model_key: &str) -> Result<Vec<f32>, RagError> {
        let texts = [text.to_string()];
        let mut vectors = self.request(&texts, model_key).await?;
        vectors.pop().ok_or_else(|| RagError::Embedding {
            model: model_key.to_string(),
            reason: "empty embedding response".to_string(),
        })
    }

    async fn embed_batch(
        &self,
        texts: &[String],
        model_key: &str,
    ) -> Result<Vec<Vec<f32>>, RagError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts, model_key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_embeddings_are_deterministic() {
        let provider = MockEmbeddingProvider::new().with_model("m", 32);
        let a = provider.embed("hello world", "m").await.unwrap();
        let b = provider.embed("hello world", "m").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn similar_texts_score_higher_than_unrelated() {
        let dim = 128;
        let query = mock_embedding("how do I make a character jump", dim);
        let related = mock_embedding("press the jump button to make the character jump", dim);
        let unrelated = mock_embedding("configuring the database connection pool", dim);

        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&query, &related) > dot(&query, &unrelated));
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let provider = MockEmbeddingProvider::new().with_model("m", 16);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let batch = provider.embed_batch(&texts, "m").await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[1], provider.embed("two", "m").await.unwrap());
    }

    #[test]
    fn zero_text_embeds_to_zero_vector() {
        let vector = mock_embedding("", 8);
        assert!(vector.iter().all(|v| *v == 0.0));
    }
}
