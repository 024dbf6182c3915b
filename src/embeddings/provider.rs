//! HTTP embedding provider implementation
//!
//! Works against any OpenAI-compatible `/v1/embeddings` endpoint (Ollama,
//! OpenAI, LiteLLM, vLLM — just set the URL).
//!
//! Providers disagree on response shape: some return a bare vector, some a
//! list of vectors, some the OpenAI `{"data": [{"embedding": [...]}]}`
//! envelope. [`decode_embedding_response`] normalises all of these to one
//! `Vec<Vec<f32>>` preserving input order 1:1.

use super::traits::EmbeddingProvider;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

/// HTTP-based embedding provider using the OpenAI `/v1/embeddings` API format.
///
/// Thread-safe and cheaply cloneable (shares the reqwest client internally).
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

impl HttpEmbeddingProvider {
    /// Create a new HTTP embedding provider.
    ///
    /// # Arguments
    ///
    /// * `url` - The embedding API endpoint (e.g., `http://localhost:11434/v1/embeddings`)
    /// * `model` - The model name (e.g., `nomic-embed-text`)
    /// * `api_key` - Optional API key for authenticated endpoints
    pub fn new(url: String, model: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            url,
            model,
            api_key,
        }
    }

    async fn request_embeddings(&self, input: &[String]) -> Result<Vec<Vec<f32>>> {
        let request_body = EmbeddingRequest {
            model: &self.model,
            input,
        };

        let mut req = self.client.post(&self.url).json(&request_body);
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req
            .send()
            .await
            .with_context(|| format!("Failed to connect to embedding API at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding API returned {} — {}", status.as_u16(), body);
        }

        let value: serde_json::Value = response
            .json()
            .await
            .context("Failed to parse embedding API response")?;

        let embeddings = decode_embedding_response(&value)
            .context("Unrecognised embedding response shape")?;

        if embeddings.len() != input.len() {
            anyhow::bail!(
                "Embedding count mismatch: sent {} inputs, got {} vectors (model: {})",
                input.len(),
                embeddings.len(),
                self.model
            );
        }

        // All vectors within one call must agree on dimension
        if let Some(first) = embeddings.first() {
            for (i, emb) in embeddings.iter().enumerate() {
                if emb.len() != first.len() {
                    anyhow::bail!(
                        "Embedding dimension mismatch at index {}: expected {}, got {}",
                        i,
                        first.len(),
                        emb.len()
                    );
                }
            }
        }

        Ok(embeddings)
    }
}

/// Normalise the provider response into a list of `f32` vectors.
///
/// Accepted shapes, tried in order:
/// - `{"data": [{"embedding": [...], "index": n}, ...]}` (OpenAI; sorted by index)
/// - `{"embeddings": [[...], ...]}`
/// - `{"embedding": [...]}` (single vector)
/// - `[[...], ...]` (bare list of vectors)
/// - `[...]` (bare single vector)
pub fn decode_embedding_response(value: &serde_json::Value) -> Option<Vec<Vec<f32>>> {
    fn as_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
        let items = value.as_array()?;
        items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    }

    if let Some(data) = value.get("data").and_then(|d| d.as_array()) {
        let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for (pos, item) in data.iter().enumerate() {
            let embedding = as_vector(item.get("embedding")?)?;
            let index = item
                .get("index")
                .and_then(|i| i.as_u64())
                .map(|i| i as usize)
                .unwrap_or(pos);
            indexed.push((index, embedding));
        }
        indexed.sort_by_key(|(i, _)| *i);
        return Some(indexed.into_iter().map(|(_, e)| e).collect());
    }

    if let Some(embeddings) = value.get("embeddings") {
        let items = embeddings.as_array()?;
        return items.iter().map(as_vector).collect();
    }

    if let Some(embedding) = value.get("embedding") {
        return Some(vec![as_vector(embedding)?]);
    }

    if let Some(items) = value.as_array() {
        if items.first().map(|v| v.is_array()).unwrap_or(false) {
            return items.iter().map(as_vector).collect();
        }
        return Some(vec![as_vector(value)?]);
    }

    None
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.request_embeddings(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .context("Embedding API returned empty response")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Some providers have batch size limits; split into chunks of 50
        const BATCH_SIZE: usize = 50;
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let mut embeddings = self.request_embeddings(chunk).await?;
            all_embeddings.append(&mut embeddings);
        }

        Ok(all_embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
