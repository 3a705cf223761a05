// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding function over Ollama's `/api/embed`, used by the
//! classifier's semantic stage.

use async_trait::async_trait;
use tracing::debug;
use vela_core::{AdapterType, EmbeddingFunction, HealthStatus, PluginAdapter, VelaError};

use crate::client::{http_client, status_error, transient};
use crate::types::{EmbedRequest, EmbedResponse};

pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: &str, model: &str) -> Result<Self, VelaError> {
        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl PluginAdapter for OllamaEmbedder {
    fn name(&self) -> &str {
        "ollama-embed"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        match self.embed("ping").await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(e.to_string())),
        }
    }
}

#[async_trait]
impl EmbeddingFunction for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VelaError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| transient("empty embeddings response"))
    }

    /// One request for the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VelaError> {
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| transient(format!("embed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| transient(format!("invalid embed response: {e}")))?;
        if body.embeddings.len() != texts.len() {
            return Err(transient(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.embeddings.len()
            )));
        }
        debug!(count = texts.len(), model = %self.model, "embedded batch");
        Ok(body.embeddings)
    }
}
