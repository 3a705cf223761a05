// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic prototype stage.
//!
//! A handful of curated example queries per tier are embedded once, on
//! first use, and cached. A query is scored against each tier by its best
//! cosine similarity to that tier's prototypes. The best-scoring tier is
//! accepted only if it clears its own threshold.
//!
//! Thresholds and prototypes are tuning knobs with no measured accuracy
//! behind them.

use std::sync::Arc;

use tokio::sync::OnceCell;
use vela_config::model::{ClassifierConfig, SemanticConfig};
use vela_core::{EmbeddingFunction, Tier, VelaError};

/// Prototype vectors for one tier.
#[derive(Debug, Clone)]
struct Prototypes {
    tier: Tier,
    vectors: Vec<Vec<f32>>,
}

/// Best-matching tier and its similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticMatch {
    pub tier: Tier,
    pub similarity: f64,
}

pub struct SemanticStage {
    embedder: Arc<dyn EmbeddingFunction>,
    examples: [(Tier, Vec<String>); 3],
    thresholds: [f64; 3],
    prototypes: OnceCell<Vec<Prototypes>>,
}

impl SemanticStage {
    pub fn new(embedder: Arc<dyn EmbeddingFunction>, config: &ClassifierConfig) -> Self {
        let SemanticConfig {
            fast_local_examples,
            mid_remote_examples,
            heavy_agent_examples,
            ..
        } = config.semantic.clone();
        Self {
            embedder,
            examples: [
                (Tier::FastLocal, fast_local_examples),
                (Tier::MidRemote, mid_remote_examples),
                (Tier::HeavyAgent, heavy_agent_examples),
            ],
            thresholds: [
                config.fast_local_threshold,
                config.mid_remote_threshold,
                config.heavy_agent_threshold,
            ],
            prototypes: OnceCell::new(),
        }
    }

    pub fn threshold(&self, tier: Tier) -> f64 {
        self.thresholds[tier.index()]
    }

    /// Embeds the prototype sets. A failed attempt leaves the cache empty
    /// so the next query tries again.
    async fn prototypes(&self) -> Result<&[Prototypes], VelaError> {
        let cached = self
            .prototypes
            .get_or_try_init(|| async {
                let mut out = Vec::with_capacity(self.examples.len());
                for (tier, examples) in &self.examples {
                    if examples.is_empty() {
                        continue;
                    }
                    let vectors = self.embedder.embed_batch(examples).await?;
                    out.push(Prototypes {
                        tier: *tier,
                        vectors,
                    });
                }
                Ok::<_, VelaError>(out)
            })
            .await?;
        Ok(cached.as_slice())
    }

    /// Scores `query` and returns the accepted match, if any.
    ///
    /// Embedding failures come back as
    /// [`VelaError::ClassificationUnavailable`] for the caller to absorb.
    pub async fn evaluate(&self, query: &str) -> Result<Option<SemanticMatch>, VelaError> {
        let unavailable = |e: VelaError| VelaError::ClassificationUnavailable {
            message: e.to_string(),
        };
        let prototypes = self.prototypes().await.map_err(unavailable)?;
        let query_vec = self.embedder.embed(query).await.map_err(unavailable)?;

        let best = prototypes
            .iter()
            .filter_map(|p| {
                let similarity = p
                    .vectors
                    .iter()
                    .filter_map(|v| cosine_similarity(&query_vec, v))
                    .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))?;
                Some(SemanticMatch {
                    tier: p.tier,
                    similarity,
                })
            })
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        Ok(best.filter(|m| m.similarity >= self.threshold(m.tier)))
    }
}

/// Cosine similarity, or `None` for mismatched lengths or a zero vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
