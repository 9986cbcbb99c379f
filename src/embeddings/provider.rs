//! Embedding capability over HTTP
//!
//! Talks to any server speaking the OpenAI `/v1/embeddings` format. The
//! default config points at a local Ollama with `nomic-embed-text`; hosted
//! APIs only need `embedding.url` and `embedding.api_key`.
//!
//! Retries live one level up, in `EmbeddingStore`.

use super::traits::EmbeddingProvider;
use crate::EmbeddingConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Embedding client for an OpenAI-compatible endpoint. Clones share one
/// connection pool.
#[derive(Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

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

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl HttpEmbeddingProvider {
    pub fn new(
        url: String,
        model: String,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url,
            model,
            api_key,
            dimensions,
        })
    }

    /// Build a provider from the embedding config section.
    ///
    /// Returns `None` when the URL is empty or "disabled".
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        if config.url.is_empty() || config.url.eq_ignore_ascii_case("disabled") {
            return Ok(None);
        }
        Self::new(
            config.url.clone(),
            config.model.clone(),
            config.api_key.clone().filter(|k| !k.is_empty()),
            config.dimensions,
        )
        .map(Some)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let mut req = self.client.post(&self.url).json(&body);
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
            if let Ok(ErrorResponse {
                error: Some(detail),
            }) = serde_json::from_str::<ErrorResponse>(&body)
            {
                anyhow::bail!(
                    "Embedding API error ({}): {}",
                    status.as_u16(),
                    detail.message
                );
            }
            anyhow::bail!("Embedding API returned {}: {}", status.as_u16(), body);
        }

        let resp: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding API response")?;

        let embedding = resp
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .context("Embedding API returned empty response")?;

        if embedding.len() != self.dimensions {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {} (model: {})",
                self.dimensions,
                embedding.len(),
                self.model
            );
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
