// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The classification cascade.
//!
//! Stages run in fixed priority order and the first match wins. Scores
//! from different stages are never merged:
//!
//! 1. safety patterns → heavy-agent @ 1.0, exempt from budget downgrades
//! 2. local-command patterns → fast-local @ 0.95
//! 3. complex-task patterns → heavy-agent @ 0.85
//! 4. length: short → fast-local @ 0.8, long → heavy-agent @ 0.75
//! 5. semantic prototypes, when an embedding function is configured
//! 6. default → mid-remote @ 0.5

use std::sync::Arc;

use tracing::{debug, warn};
use vela_config::model::ClassifierConfig;
use vela_core::tokens::word_count;
use vela_core::{BypassReason, EmbeddingFunction, RoutingDecision, Tier, VelaError};

use crate::patterns::{ReflexPatterns, normalize};
use crate::semantic::SemanticStage;

/// Category labels carried on [`RoutingDecision::category`].
pub mod category {
    pub const SAFETY: &str = "safety";
    pub const LOCAL_COMMAND: &str = "local_command";
    pub const COMPLEX_TASK: &str = "complex_task";
    pub const SHORT_QUERY: &str = "short_query";
    pub const LONG_QUERY: &str = "long_query";
    pub const SEMANTIC: &str = "semantic";
    pub const DEFAULT: &str = "default";
    pub const EMPTY: &str = "empty";
}

const SAFETY_CONFIDENCE: f64 = 1.0;
const LOCAL_COMMAND_CONFIDENCE: f64 = 0.95;
const COMPLEX_TASK_CONFIDENCE: f64 = 0.85;
const SHORT_QUERY_CONFIDENCE: f64 = 0.8;
const LONG_QUERY_CONFIDENCE: f64 = 0.75;
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Turns a query into a [`RoutingDecision`].
pub struct Classifier {
    patterns: ReflexPatterns,
    short_query_max_tokens: usize,
    long_query_min_tokens: usize,
    semantic: Option<SemanticStage>,
}

impl Classifier {
    /// Builds a classifier without a semantic stage.
    pub fn new(config: &ClassifierConfig) -> Result<Self, VelaError> {
        Ok(Self {
            patterns: ReflexPatterns::from_config(config)?,
            short_query_max_tokens: config.short_query_max_tokens,
            long_query_min_tokens: config.long_query_min_tokens,
            semantic: None,
        })
    }

    /// Builds a classifier whose semantic stage uses `embedder`, unless
    /// `[classifier.semantic] enabled = false`.
    pub fn with_embedder(
        config: &ClassifierConfig,
        embedder: Arc<dyn EmbeddingFunction>,
    ) -> Result<Self, VelaError> {
        let mut classifier = Self::new(config)?;
        if config.semantic.enabled {
            classifier.semantic = Some(SemanticStage::new(embedder, config));
        }
        Ok(classifier)
    }

    pub fn has_semantic_stage(&self) -> bool {
        self.semantic.is_some()
    }

    /// Runs the full cascade. Never fails: an unavailable semantic stage
    /// is skipped and the cascade falls through to the default.
    pub async fn classify(&self, query: &str) -> RoutingDecision {
        let normalized = normalize(query);
        if normalized.is_empty() {
            return RoutingDecision::new(Tier::MidRemote, 0.0, category::EMPTY);
        }

        if let Some(decision) = self.reflex(&normalized) {
            debug!(tier = %decision.tier, category = %decision.category, "reflex match");
            return decision;
        }

        if let Some(stage) = &self.semantic {
            match stage.evaluate(&normalized).await {
                Ok(Some(m)) => {
                    debug!(tier = %m.tier, similarity = m.similarity, "semantic match");
                    return RoutingDecision::new(m.tier, m.similarity, category::SEMANTIC);
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "semantic stage skipped"),
            }
        }

        RoutingDecision::new(Tier::MidRemote, DEFAULT_CONFIDENCE, category::DEFAULT)
    }

    /// Stages 1 to 4 over already-normalized text.
    pub fn reflex(&self, normalized: &str) -> Option<RoutingDecision> {
        if self.patterns.safety.is_match(normalized) {
            return Some(
                RoutingDecision::new(Tier::HeavyAgent, SAFETY_CONFIDENCE, category::SAFETY)
                    .with_bypass(BypassReason::SafetyKeyword),
            );
        }
        if self.patterns.local_command.is_match(normalized) {
            return Some(RoutingDecision::new(
                Tier::FastLocal,
                LOCAL_COMMAND_CONFIDENCE,
                category::LOCAL_COMMAND,
            ));
        }
        if self.patterns.complex_task.is_match(normalized) {
            return Some(RoutingDecision::new(
                Tier::HeavyAgent,
                COMPLEX_TASK_CONFIDENCE,
                category::COMPLEX_TASK,
            ));
        }

        let words = word_count(normalized);
        if words <= self.short_query_max_tokens {
            return Some(RoutingDecision::new(
                Tier::FastLocal,
                SHORT_QUERY_CONFIDENCE,
                category::SHORT_QUERY,
            ));
        }
        if words > self.long_query_min_tokens {
            return Some(RoutingDecision::new(
                Tier::HeavyAgent,
                LONG_QUERY_CONFIDENCE,
                category::LONG_QUERY,
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use vela_core::{AdapterType, HealthStatus, PluginAdapter};

    /// Maps text to a 3-d vector by keyword; fails on demand.
    struct KeywordEmbedder {
        fail: bool,
        calls: AtomicU32,
    }

    impl KeywordEmbedder {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PluginAdapter for KeywordEmbedder {
        fn name(&self) -> &str {
            "keyword"
        }
        fn version(&self) -> semver::Version {
            semver::Version::new(0, 1, 0)
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::Embedding
        }
        async fn health_check(&self) -> Result<HealthStatus, VelaError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl EmbeddingFunction for KeywordEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, VelaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(VelaError::Internal("embedding server down".into()));
            }
            let v = if text.contains("weather") {
                vec![1.0, 0.0, 0.0]
            } else if text.contains("recipe") {
                vec![0.0, 1.0, 0.0]
            } else if text.contains("marathon") {
                vec![0.0, 0.0, 1.0]
            } else {
                vec![1.0, 1.0, 1.0]
            };
            Ok(v)
        }
    }

    fn semantic_config() -> ClassifierConfig {
        let mut config = ClassifierConfig::default();
        config.semantic.fast_local_examples = vec!["weather today".into()];
        config.semantic.mid_remote_examples = vec!["a recipe please".into()];
        config.semantic.heavy_agent_examples = vec!["marathon training".into()];
        config
    }

    fn classifier() -> Classifier {
        Classifier::new(&ClassifierConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn timer_command_is_fast_local() {
        let d = classifier().classify("Set a timer for 5 minutes").await;
        assert_eq!(d.tier, Tier::FastLocal);
        assert!(d.confidence >= 0.9);
        assert_eq!(d.category, category::LOCAL_COMMAND);
    }

    #[tokio::test]
    async fn workout_plan_is_heavy_agent() {
        let d = classifier().classify("plan my workout for the week").await;
        assert_eq!(d.tier, Tier::HeavyAgent);
        assert_eq!(d.category, category::COMPLEX_TASK);
        assert_eq!(d.bypass_reason, None);
    }

    #[tokio::test]
    async fn safety_match_wins_over_everything() {
        // Also a local command and a short query; safety still comes first.
        let d = classifier().classify("EMERGENCY set a timer").await;
        assert_eq!(d.tier, Tier::HeavyAgent);
        assert_eq!(d.confidence, 1.0);
        assert!(d.is_safety());
    }

    #[tokio::test]
    async fn short_and_long_queries() {
        let c = classifier();
        let d = c.classify("hello there").await;
        assert_eq!((d.tier, d.category.as_str()), (Tier::FastLocal, category::SHORT_QUERY));

        let long = "tell me everything you know about ".to_string() + &"the history of rivers ".repeat(6);
        let d = c.classify(&long).await;
        assert_eq!((d.tier, d.category.as_str()), (Tier::HeavyAgent, category::LONG_QUERY));
        assert_eq!(d.confidence, 0.75);
    }

    #[tokio::test]
    async fn empty_query_defaults_with_zero_confidence() {
        let d = classifier().classify("   \n\t").await;
        assert_eq!(d.tier, Tier::MidRemote);
        assert_eq!(d.confidence, 0.0);
    }

    #[tokio::test]
    async fn unmatched_query_without_embedder_defaults_to_mid_remote() {
        let d = classifier().classify("why is the sky blue today").await;
        assert_eq!(d.tier, Tier::MidRemote);
        assert_eq!(d.confidence, 0.5);
        assert_eq!(d.category, category::DEFAULT);
    }

    #[tokio::test]
    async fn semantic_match_above_threshold_is_accepted() {
        let embedder = KeywordEmbedder::new(false);
        let c = Classifier::with_embedder(&semantic_config(), embedder.clone()).unwrap();
        assert!(c.has_semantic_stage());

        let d = c.classify("is the weather nice outside").await;
        assert_eq!(d.tier, Tier::FastLocal);
        assert_eq!(d.category, category::SEMANTIC);
        assert!((d.confidence - 1.0).abs() < 1e-9);

        let d = c.classify("any good marathon shoes around").await;
        assert_eq!(d.tier, Tier::HeavyAgent);
    }

    #[tokio::test]
    async fn semantic_match_below_threshold_falls_through() {
        let c = Classifier::with_embedder(&semantic_config(), KeywordEmbedder::new(false)).unwrap();
        // [1,1,1] vs a unit axis: similarity ~0.577, below every threshold.
        let d = c.classify("tell me about old cats").await;
        assert_eq!(d.tier, Tier::MidRemote);
        assert_eq!(d.category, category::DEFAULT);
    }

    #[tokio::test]
    async fn prototypes_are_embedded_once() {
        let embedder = KeywordEmbedder::new(false);
        let c = Classifier::with_embedder(&semantic_config(), embedder.clone()).unwrap();
        c.classify("is the weather nice outside").await;
        c.classify("is the weather nice inside").await;
        // Three prototypes once, plus one call per query.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn embedding_failure_is_absorbed() {
        let c = Classifier::with_embedder(&semantic_config(), KeywordEmbedder::new(true)).unwrap();
        let d = c.classify("is the weather nice outside").await;
        assert_eq!(d.tier, Tier::MidRemote);
        assert_eq!(d.confidence, 0.5);
    }

    #[tokio::test]
    async fn disabled_semantic_stage_ignores_embedder() {
        let mut config = semantic_config();
        config.semantic.enabled = false;
        let embedder = KeywordEmbedder::new(false);
        let c = Classifier::with_embedder(&config, embedder.clone()).unwrap();
        assert!(!c.has_semantic_stage());
        c.classify("is the weather nice outside").await;
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #[test]
        fn short_unmatched_queries_route_fast_local(words in prop::collection::vec("[v-z]{2,6}", 1..=3)) {
            let query = words.join(" ");
            let d = block_on(classifier().classify(&query));
            prop_assert_eq!(d.tier, Tier::FastLocal);
        }

        #[test]
        fn safety_queries_are_always_heavy_at_full_confidence(
            prefix in "[a-z ]{0,30}",
            suffix in "[a-z ]{0,30}",
        ) {
            let query = format!("{prefix} call an ambulance {suffix}");
            let d = block_on(classifier().classify(&query));
            prop_assert_eq!(d.tier, Tier::HeavyAgent);
            prop_assert_eq!(d.confidence, 1.0);
            prop_assert!(d.is_safety());
        }

        #[test]
        fn confidence_stays_in_unit_interval(query in ".{0,200}") {
            let d = block_on(classifier().classify(&query));
            prop_assert!((0.0..=1.0).contains(&d.confidence));
        }
    }
}
