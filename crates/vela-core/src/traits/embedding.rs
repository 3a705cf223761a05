// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Embedding function consumed by the classifier's semantic stage.

use async_trait::async_trait;

use crate::error::VelaError;
use crate::traits::adapter::PluginAdapter;

/// Maps text to a fixed-length vector.
///
/// Failures are never fatal to routing: the classifier absorbs them and
/// falls through to its default decision.
#[async_trait]
pub trait EmbeddingFunction: PluginAdapter {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, VelaError>;

    /// Embeds several texts. The default issues one call per text.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VelaError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}
