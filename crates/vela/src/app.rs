// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Wiring shared by the subcommands: tracing, the ledger, the classifier,
//! and the dispatcher with its three tier clients.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};
use vela_agent::{DispatchSettings, Dispatcher, TierClients};
use vela_anthropic::AnthropicTierClient;
use vela_config::VelaConfig;
use vela_core::{
    AdapterType, EmbeddingFunction, GenerationRequest, HealthStatus, PluginAdapter, Tier,
    TierClient, TierStream, VelaError,
};
use vela_cost::BudgetLedger;
use vela_ollama::{OllamaEmbedder, OllamaTierClient};
use vela_process::AgentProcessClient;
use vela_resilience::{CircuitBreakerRegistry, RetryPolicy};
use vela_router::Classifier;
use vela_storage::Database;

pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vela={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

pub async fn open_budget(config: &VelaConfig) -> Result<Arc<BudgetLedger>, VelaError> {
    let db = Database::from_config(&config.storage).await?;
    Ok(Arc::new(BudgetLedger::new(db, &config.cost)))
}

/// Classifier with the Ollama-backed semantic stage when it is enabled.
pub fn build_classifier(config: &VelaConfig) -> Result<Classifier, VelaError> {
    if !config.classifier.semantic.enabled {
        return Classifier::new(&config.classifier);
    }
    let embedder: Arc<dyn EmbeddingFunction> = Arc::new(OllamaEmbedder::new(
        &config.fast_local.base_url,
        &config.classifier.semantic.embedding_model,
    )?);
    Classifier::with_embedder(&config.classifier, embedder)
}

pub async fn build_dispatcher(config: &VelaConfig) -> Result<Dispatcher, VelaError> {
    let budget = open_budget(config).await?;
    let classifier = Arc::new(build_classifier(config)?);

    let fast_local: Arc<dyn TierClient> = Arc::new(OllamaTierClient::new(&config.fast_local)?);
    let mid_remote: Arc<dyn TierClient> = match AnthropicTierClient::new(&config.mid_remote, None)
    {
        Ok(client) => Arc::new(client),
        Err(e) => {
            warn!(error = %e, "mid-remote tier unconfigured, its queries fall back to fast-local");
            Arc::new(UnconfiguredTier::new(Tier::MidRemote, e.to_string()))
        }
    };
    let heavy_agent: Arc<dyn TierClient> = Arc::new(AgentProcessClient::new(&config.heavy_agent));
    let clients = TierClients::new(fast_local, mid_remote, heavy_agent)?;

    let dispatcher = Dispatcher::new(
        classifier,
        budget,
        Arc::new(CircuitBreakerRegistry::from_config(&config.resilience)),
        RetryPolicy::from_config(&config.resilience),
        clients,
        DispatchSettings::from_config(config),
    );
    info!(agent = %config.agent.name, "dispatcher ready");
    Ok(dispatcher)
}

/// Stands in for a tier whose client could not be built. Every call fails
/// fatally, so the breaker opens on first use and later calls skip it.
struct UnconfiguredTier {
    tier: Tier,
    reason: String,
}

impl UnconfiguredTier {
    fn new(tier: Tier, reason: String) -> Self {
        Self { tier, reason }
    }
}

#[async_trait]
impl PluginAdapter for UnconfiguredTier {
    fn name(&self) -> &str {
        "unconfigured"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 0, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::TierClient
    }

    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        Ok(HealthStatus::Unhealthy(self.reason.clone()))
    }
}

#[async_trait]
impl TierClient for UnconfiguredTier {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn backend_id(&self) -> &str {
        "unconfigured"
    }

    fn first_fragment_timeout(&self) -> Duration {
        Duration::from_secs(1)
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<TierStream, VelaError> {
        Err(VelaError::BackendFatal {
            tier: self.tier,
            message: self.reason.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_tier_fails_fatally() {
        let tier = UnconfiguredTier::new(Tier::MidRemote, "no API key".into());
        let err = tier.stream(GenerationRequest::new("hi")).await.err().unwrap();
        assert!(err.is_fatal());
        assert!(matches!(
            tier.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
    }

    #[test]
    fn classifier_without_semantic_stage() {
        let mut config = VelaConfig::default();
        config.classifier.semantic.enabled = false;
        let classifier = build_classifier(&config).unwrap();
        assert!(!classifier.has_semantic_stage());
    }
}
