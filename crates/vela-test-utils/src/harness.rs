// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end dispatch testing.
//!
//! `TestHarness` assembles a complete dispatcher with one
//! [`MockTierClient`] per tier, a temp SQLite ledger, and fresh breakers.
//! Retry delays are shrunk to milliseconds so failure paths run fast.

use std::sync::Arc;
use std::time::Duration;

use vela_agent::{
    DispatchRequest, DispatchResponse, DispatchSettings, Dispatcher, TierClients,
};
use vela_config::VelaConfig;
use vela_core::{EmbeddingFunction, RoutingDecision, Tier, VelaError};
use vela_cost::{BudgetLedger, UsageRecord};
use vela_resilience::{CircuitBreakerRegistry, RetryPolicy};
use vela_router::Classifier;
use vela_storage::Database;

use crate::mock_embedder::MockEmbedder;
use crate::mock_tier::MockTierClient;

/// A completed record carrying only a cost, for seeding spend.
fn seed_record(tier: Tier, cost_usd: f64) -> UsageRecord {
    let decision = RoutingDecision::new(tier, 1.0, "seed");
    UsageRecord::new(tier, "seed", &decision).with_cost(cost_usd)
}

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    config: VelaConfig,
    fast_local: Option<MockTierClient>,
    mid_remote: Option<MockTierClient>,
    heavy_agent: Option<MockTierClient>,
    embedder: Option<Arc<MockEmbedder>>,
    retry: RetryPolicy,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            config: VelaConfig::default(),
            fast_local: None,
            mid_remote: None,
            heavy_agent: None,
            embedder: None,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
                retryable: VelaError::is_transient,
            },
        }
    }

    /// Start from a full configuration instead of the defaults.
    pub fn with_config(mut self, config: VelaConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_budget(mut self, daily_limit_usd: f64, monthly_limit_usd: f64) -> Self {
        self.config.cost.daily_limit_usd = daily_limit_usd;
        self.config.cost.monthly_limit_usd = monthly_limit_usd;
        self
    }

    pub fn with_fast_local(mut self, client: MockTierClient) -> Self {
        self.fast_local = Some(client);
        self
    }

    pub fn with_mid_remote(mut self, client: MockTierClient) -> Self {
        self.mid_remote = Some(client);
        self
    }

    pub fn with_heavy_agent(mut self, client: MockTierClient) -> Self {
        self.heavy_agent = Some(client);
        self
    }

    /// Enable the semantic stage with this embedder.
    pub fn with_embedder(mut self, embedder: MockEmbedder) -> Self {
        self.embedder = Some(Arc::new(embedder));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn build(self) -> Result<TestHarness, VelaError> {
        let temp_dir = tempfile::TempDir::new().map_err(|e| VelaError::Storage {
            source: Box::new(e),
        })?;
        let db_path = temp_dir.path().join("ledger.db").to_string_lossy().to_string();
        let db = Database::open(&db_path).await?;
        let budget = Arc::new(BudgetLedger::new(db, &self.config.cost));

        let classifier = match &self.embedder {
            Some(embedder) => Classifier::with_embedder(
                &self.config.classifier,
                Arc::clone(embedder) as Arc<dyn EmbeddingFunction>,
            )?,
            None => Classifier::new(&self.config.classifier)?,
        };

        let fast_local = Arc::new(
            self.fast_local
                .unwrap_or_else(|| MockTierClient::new(Tier::FastLocal)),
        );
        let mid_remote = Arc::new(
            self.mid_remote
                .unwrap_or_else(|| MockTierClient::new(Tier::MidRemote)),
        );
        let heavy_agent = Arc::new(
            self.heavy_agent
                .unwrap_or_else(|| MockTierClient::new(Tier::HeavyAgent)),
        );
        let clients = TierClients::new(
            fast_local.clone(),
            mid_remote.clone(),
            heavy_agent.clone(),
        )?;

        let breakers = Arc::new(CircuitBreakerRegistry::from_config(&self.config.resilience));
        let dispatcher = Dispatcher::new(
            Arc::new(classifier),
            Arc::clone(&budget),
            Arc::clone(&breakers),
            self.retry,
            clients,
            DispatchSettings::from_config(&self.config),
        );

        Ok(TestHarness {
            dispatcher,
            budget,
            breakers,
            fast_local,
            mid_remote,
            heavy_agent,
            embedder: self.embedder,
            config: self.config,
            db_path,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete dispatch environment with mock tiers and a temp ledger.
pub struct TestHarness {
    pub dispatcher: Dispatcher,
    pub budget: Arc<BudgetLedger>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub fast_local: Arc<MockTierClient>,
    pub mid_remote: Arc<MockTierClient>,
    pub heavy_agent: Arc<MockTierClient>,
    pub embedder: Option<Arc<MockEmbedder>>,
    pub config: VelaConfig,
    db_path: String,
    /// Kept alive so the database outlives the harness.
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub fn client(&self, tier: Tier) -> &Arc<MockTierClient> {
        match tier {
            Tier::FastLocal => &self.fast_local,
            Tier::MidRemote => &self.mid_remote,
            Tier::HeavyAgent => &self.heavy_agent,
        }
    }

    /// Dispatch `query`, drain the stream, and wait for its usage writes.
    pub async fn ask(&self, query: &str) -> Result<DispatchResponse, VelaError> {
        self.send(DispatchRequest::new(query)).await
    }

    pub async fn send(&self, request: DispatchRequest) -> Result<DispatchResponse, VelaError> {
        let result = self
            .dispatcher
            .route_and_stream(request)
            .await?
            .into_response()
            .await;
        self.dispatcher.flush().await;
        result
    }

    /// Record a completed, zero-token entry costing `cost_usd` today.
    pub async fn seed_spend(&self, tier: Tier, cost_usd: f64) -> Result<(), VelaError> {
        self.budget.record(&seed_record(tier, cost_usd)).await
    }

    /// Open a second ledger on the same database file, as a restarted
    /// process would.
    pub async fn reopen_budget(&self) -> Result<BudgetLedger, VelaError> {
        let db = Database::open(&self.db_path).await?;
        Ok(BudgetLedger::new(db, &self.config.cost))
    }
}
