use crate::error::EmbeddingError;
use crate::types::DenseVector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Source of dense semantic embeddings.
#[async_trait]
pub trait DenseEncoder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<DenseVector, EmbeddingError>;
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Client for an embedding service exposing `POST /embed`.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEmbedder {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/embed", base_url.trim_end_matches('/'));
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl DenseEncoder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<DenseVector, EmbeddingError> {
        let response = self.client.post(&self.endpoint).json(&EmbedRequest { text }).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EmbeddingError::Status(status.as_u16()));
        }
        let body: EmbedResponse = response.json().await?;
        if body.embedding.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        tracing::debug!(dimension = body.embedding.len(), "received embedding");
        Ok(body.embedding)
    }
}
