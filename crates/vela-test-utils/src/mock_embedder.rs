// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword-presence embedding function for semantic-stage tests.
//!
//! Each dimension is one vocabulary word: 1.0 when the lowercased text
//! contains it, else 0.0. Texts sharing keywords are therefore similar,
//! which is enough to steer the prototype stage deterministically.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use vela_core::{AdapterType, EmbeddingFunction, HealthStatus, PluginAdapter, VelaError};

pub struct MockEmbedder {
    vocabulary: Vec<String>,
    failing: AtomicBool,
    calls: AtomicU32,
}

impl MockEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            failing: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    /// An embedder whose every call fails.
    pub fn failing() -> Self {
        let embedder = Self::new(&[]);
        embedder.set_failing(true);
        embedder
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `embed` calls, batch members included.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PluginAdapter for MockEmbedder {
    fn name(&self) -> &str {
        "mock-embedder"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Embedding
    }

    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        if self.failing.load(Ordering::SeqCst) {
            Ok(HealthStatus::Unhealthy("mock embedder failing".into()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }
}

#[async_trait]
impl EmbeddingFunction for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VelaError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(VelaError::ClassificationUnavailable {
                message: "mock embedder failing".into(),
            });
        }
        let text = text.to_lowercase();
        Ok(self
            .vocabulary
            .iter()
            .map(|w| if text.contains(w.as_str()) { 1.0 } else { 0.0 })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dimensions_follow_vocabulary() {
        let embedder = MockEmbedder::new(&["weather", "recipe"]);
        assert_eq!(embedder.embed("Weather today?").await.unwrap(), vec![1.0, 0.0]);
        assert_eq!(embedder.embed("a recipe").await.unwrap(), vec![0.0, 1.0]);
        assert_eq!(embedder.calls(), 2);
    }

    #[tokio::test]
    async fn failing_embedder_errors() {
        let embedder = MockEmbedder::failing();
        assert!(embedder.embed("anything").await.is_err());
        assert!(matches!(
            embedder.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }
}
