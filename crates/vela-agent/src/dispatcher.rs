// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dispatcher: the single entry point that classifies a query, applies
//! budget and latency overrides, and streams the answer from a tier guarded
//! by its circuit breaker and retry policy.
//!
//! Every `route_and_stream` call spawns one producer task onto a
//! [`TaskTracker`]. The producer walks the tier cascade from the decided
//! tier toward cheaper ones, but only until the first output has been
//! delivered; after that a failure ends the stream. Each attempt against a
//! backend leaves exactly one usage record, written after the last fragment
//! so ledger I/O never delays delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use vela_config::VelaConfig;
use vela_core::tokens::estimate_tokens;
use vela_core::{
    BypassReason, GenerationRequest, HealthStatus, RoutingDecision, StreamTimer, Tier, TierClient,
    TierEvent, TierStream, TokenUsage, VelaError,
};
use vela_cost::{BudgetLedger, BudgetStatus, UsageOutcome, UsageRecord};
use vela_resilience::{BreakerSnapshot, CircuitBreakerRegistry, RetryPolicy};
use vela_router::Classifier;

use crate::routing::{apply_budget, apply_latency_budget};
use crate::stream::{DispatchEvent, DispatchRequest, DispatchStream, EventSender};

/// Fragments buffered between a producer and a slow consumer.
const CHANNEL_CAPACITY: usize = 64;

/// Tunables the dispatcher reads on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Thrifty mode downgrades mid-remote decisions below this confidence.
    pub thrifty_confidence_floor: f64,
    /// Heavy-agent startup cost weighed against a request's latency budget.
    pub heavy_startup_overhead: Duration,
    /// System prompt used when a request carries none.
    pub system_prompt: Option<String>,
}

impl DispatchSettings {
    pub fn from_config(config: &VelaConfig) -> Self {
        Self {
            thrifty_confidence_floor: config.cost.thrifty_confidence_floor,
            heavy_startup_overhead: Duration::from_millis(config.heavy_agent.startup_overhead_ms),
            system_prompt: config.agent.system_prompt.clone(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&VelaConfig::default())
    }
}

/// Exactly one client per tier.
#[derive(Clone)]
pub struct TierClients {
    clients: [Arc<dyn TierClient>; 3],
}

impl TierClients {
    /// Fails if a client reports a tier other than the slot it is given.
    pub fn new(
        fast_local: Arc<dyn TierClient>,
        mid_remote: Arc<dyn TierClient>,
        heavy_agent: Arc<dyn TierClient>,
    ) -> Result<Self, VelaError> {
        let clients = [fast_local, mid_remote, heavy_agent];
        for (slot, client) in Tier::ALL.iter().zip(&clients) {
            if client.tier() != *slot {
                return Err(VelaError::Config(format!(
                    "client '{}' serves {} but was registered for {slot}",
                    client.name(),
                    client.tier()
                )));
            }
        }
        Ok(Self { clients })
    }

    pub fn get(&self, tier: Tier) -> &Arc<dyn TierClient> {
        &self.clients[tier.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TierClient>> {
        self.clients.iter()
    }
}

/// Outcome of trying one tier.
enum Served {
    /// The tier took the request; the stream has been terminated.
    Handled,
    /// The tier could not take the request; fall back if possible.
    Unavailable(VelaError),
}

/// A stream whose first event has already been read.
struct OpenStream {
    stream: TierStream,
    first: TierEvent,
    timer: StreamTimer,
}

enum Step {
    Item(Option<Result<TierEvent, VelaError>>),
    Cancelled,
}

struct Inner {
    classifier: Arc<Classifier>,
    budget: Arc<BudgetLedger>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryPolicy,
    clients: TierClients,
    settings: DispatchSettings,
    /// Producers and detached usage writes.
    tracker: TaskTracker,
}

/// Routes queries to tiers and streams their answers.
///
/// Cheap to share behind an `Arc`; concurrent calls never serialize on
/// anything but the ledger's single writer.
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<Classifier>,
        budget: Arc<BudgetLedger>,
        breakers: Arc<CircuitBreakerRegistry>,
        retry: RetryPolicy,
        clients: TierClients,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                classifier,
                budget,
                breakers,
                retry,
                clients,
                settings,
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Routing metadata only; no backend is called.
    pub async fn classify(&self, query: &str) -> RoutingDecision {
        self.inner.classifier.classify(query).await
    }

    /// Classify and apply the budget and latency overrides.
    pub async fn route(&self, request: &DispatchRequest) -> Result<RoutingDecision, VelaError> {
        let settings = &self.inner.settings;
        let decision = self.inner.classifier.classify(&request.query).await;
        let status = self.inner.budget.status().await?;
        let decision = apply_budget(decision, &status, settings.thrifty_confidence_floor);
        Ok(apply_latency_budget(
            decision,
            request.latency_budget,
            settings.heavy_startup_overhead,
        ))
    }

    /// Route `request` and start streaming its answer.
    ///
    /// Returns once the routing decision is made; fragments, the usage
    /// trailer, or a terminal error then arrive on the returned stream.
    pub async fn route_and_stream(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchStream, VelaError> {
        let decision = self.route(&request).await?;
        info!(
            tier = %decision.tier,
            confidence = decision.confidence,
            category = %decision.category,
            bypass_reason = ?decision.bypass_reason,
            "query routed"
        );

        let generation = request.to_generation(self.inner.settings.system_prompt.as_deref());
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let inner = Arc::clone(&self.inner);
        let task_decision = decision.clone();
        let task_cancel = cancel.clone();
        self.inner.tracker.spawn(async move {
            inner
                .produce(task_decision, generation, tx, task_cancel)
                .await;
        });

        Ok(DispatchStream::new(decision, rx, cancel))
    }

    /// Wait for every in-flight producer, including its usage writes.
    pub async fn flush(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Number of producers and background usage writes still running.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn budget(&self) -> &Arc<BudgetLedger> {
        &self.inner.budget
    }

    pub async fn budget_status(&self) -> Result<BudgetStatus, VelaError> {
        self.inner.budget.status().await
    }

    pub fn configure_budget(
        &self,
        daily_limit_usd: f64,
        monthly_limit_usd: f64,
    ) -> Result<(), VelaError> {
        self.inner.budget.configure(daily_limit_usd, monthly_limit_usd)
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.inner.breakers.snapshots()
    }

    /// Health of each tier's backend, cheapest first.
    pub async fn health(&self) -> Vec<(Tier, HealthStatus)> {
        let mut out = Vec::with_capacity(3);
        for client in self.inner.clients.iter() {
            let status = match client.health_check().await {
                Ok(status) => status,
                Err(e) => HealthStatus::Unhealthy(e.to_string()),
            };
            out.push((client.tier(), status));
        }
        out
    }
}

impl Inner {
    async fn produce(
        &self,
        decision: RoutingDecision,
        request: GenerationRequest,
        tx: EventSender,
        cancel: CancellationToken,
    ) {
        let mut next_tier = Some(decision.tier);
        let mut last_error = None;

        while let Some(tier) = next_tier {
            if cancel.is_cancelled() {
                debug!(tier = %tier, "dispatch cancelled before tier selection");
                return;
            }
            match self.serve(tier, &decision, &request, &tx, &cancel).await {
                Served::Handled => return,
                Served::Unavailable(e) => {
                    next_tier = tier.cheaper();
                    if let Some(to) = next_tier {
                        warn!(from = %tier, to = %to, error = %e, "tier unavailable, falling back");
                    }
                    last_error = Some(e);
                }
            }
        }

        let error = terminal_error(&decision, last_error);
        warn!(kind = %error.kind(), error = %error, "dispatch failed");
        let _ = tx.send(Err(error)).await;
    }

    async fn serve(
        &self,
        tier: Tier,
        decision: &RoutingDecision,
        request: &GenerationRequest,
        tx: &EventSender,
        cancel: &CancellationToken,
    ) -> Served {
        let breaker = self.breakers.get(tier);
        if let Err(e) = breaker.allow() {
            return Served::Unavailable(e);
        }

        let client = self.clients.get(tier).as_ref();
        let in_flight = AtomicBool::new(false);
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.retry.run(tier, |attempt| {
                self.open_attempt(client, decision, request, attempt, &in_flight)
            }) => Some(result),
        };

        match opened {
            None => {
                breaker.release();
                if in_flight.load(Ordering::Acquire) {
                    let record = UsageRecord::new(tier, client.backend_id(), decision)
                        .with_outcome(UsageOutcome::Cancelled);
                    let record = self.persist(record).await;
                    let _ = tx.try_send(Ok(DispatchEvent::Completed(record)));
                }
                debug!(tier = %tier, "dispatch cancelled before first output");
                Served::Handled
            }
            Some(Ok(open)) => {
                self.deliver(client, decision, request, open, tx, cancel).await;
                Served::Handled
            }
            Some(Err(e)) => {
                if e.is_fatal() {
                    breaker.trip();
                } else {
                    breaker.record_failure();
                }
                Served::Unavailable(e)
            }
        }
    }

    /// One `stream()` call, bounded by the tier's first-fragment timeout.
    /// A failed attempt's record is written in the background so the retry
    /// loop and any fallback go ahead without waiting on the ledger.
    async fn open_attempt(
        &self,
        client: &dyn TierClient,
        decision: &RoutingDecision,
        request: &GenerationRequest,
        attempt: u32,
        in_flight: &AtomicBool,
    ) -> Result<OpenStream, VelaError> {
        let tier = client.tier();
        let deadline = client.first_fragment_timeout();
        let mut timer = StreamTimer::start();
        debug!(tier = %tier, backend_id = %client.backend_id(), attempt, "opening tier stream");

        in_flight.store(true, Ordering::Release);
        let opened = match tokio::time::timeout(deadline, first_event(client, request)).await {
            Ok(result) => result,
            Err(_) => Err(VelaError::Timeout {
                tier,
                duration: deadline,
            }),
        };
        in_flight.store(false, Ordering::Release);

        match opened {
            Ok((stream, first)) => {
                if matches!(first, TierEvent::Fragment(_)) {
                    timer.mark_fragment();
                }
                Ok(OpenStream {
                    stream,
                    first,
                    timer,
                })
            }
            Err(e) => {
                let record = UsageRecord::new(tier, client.backend_id(), decision)
                    .with_outcome(UsageOutcome::Failed)
                    .with_latency(timer.elapsed_ms(), None);
                self.persist_detached(record);
                Err(e)
            }
        }
    }

    /// Forward an opened stream to the caller until it completes, fails, or
    /// is cancelled.
    async fn deliver(
        &self,
        client: &dyn TierClient,
        decision: &RoutingDecision,
        request: &GenerationRequest,
        open: OpenStream,
        tx: &EventSender,
        cancel: &CancellationToken,
    ) {
        let OpenStream {
            mut stream,
            first,
            mut timer,
        } = open;
        let tier = client.tier();
        let breaker = self.breakers.get(tier);
        let mut emitted = String::new();

        let started = DispatchEvent::Started {
            tier,
            backend_id: client.backend_id().to_string(),
        };
        let mut pending = if send(tx, Ok(started), cancel).await {
            Some(Ok(first))
        } else {
            None
        };

        loop {
            let step = match pending.take() {
                Some(item) => Step::Item(Some(item)),
                None if cancel.is_cancelled() || tx.is_closed() => Step::Cancelled,
                None => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    item = stream.next() => Step::Item(item),
                },
            };

            match step {
                Step::Item(Some(Ok(TierEvent::Fragment(text)))) => {
                    timer.mark_fragment();
                    emitted.push_str(&text);
                    if !send(tx, Ok(DispatchEvent::Fragment(text)), cancel).await {
                        cancel.cancel();
                    }
                }
                Step::Item(Some(Ok(TierEvent::Done(summary)))) => {
                    drop(stream);
                    breaker.record_success();
                    let cost = self.budget.pricing().cost(tier, &summary.usage);
                    let record = UsageRecord::new(tier, client.backend_id(), decision)
                        .with_summary(&summary)
                        .with_cost(cost);
                    let record = self.persist(record).await;
                    let _ = tx.send(Ok(DispatchEvent::Completed(record))).await;
                    return;
                }
                Step::Item(failure) => {
                    drop(stream);
                    let e = match failure {
                        Some(Err(e)) => e,
                        _ => VelaError::BackendTransient {
                            tier,
                            message: "stream ended without a usage summary".into(),
                        },
                    };
                    if e.is_fatal() {
                        breaker.trip();
                    } else {
                        breaker.record_failure();
                    }
                    warn!(
                        tier = %tier,
                        error = %e,
                        emitted_chars = emitted.len(),
                        "tier failed mid-stream"
                    );
                    let record = self.partial_record(
                        client,
                        decision,
                        request,
                        &emitted,
                        &timer,
                        UsageOutcome::Failed,
                    );
                    self.persist(record).await;
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                Step::Cancelled => {
                    // Dropping the tier stream aborts the backend call.
                    drop(stream);
                    breaker.record_success();
                    let record = self.partial_record(
                        client,
                        decision,
                        request,
                        &emitted,
                        &timer,
                        UsageOutcome::Cancelled,
                    );
                    let record = self.persist(record).await;
                    info!(
                        tier = %tier,
                        output_tokens = record.output_tokens,
                        "dispatch cancelled, partial usage recorded"
                    );
                    let _ = tx.try_send(Ok(DispatchEvent::Completed(record)));
                    return;
                }
            }
        }
    }

    /// Usage for a stream that ended before its summary: tokens are
    /// estimated from the prompt and the text already emitted.
    fn partial_record(
        &self,
        client: &dyn TierClient,
        decision: &RoutingDecision,
        request: &GenerationRequest,
        emitted: &str,
        timer: &StreamTimer,
        outcome: UsageOutcome,
    ) -> UsageRecord {
        let tier = client.tier();
        let input = estimate_tokens(&request.prompt)
            + request.system.as_deref().map(estimate_tokens).unwrap_or(0);
        let usage = TokenUsage::new(input, estimate_tokens(emitted));
        UsageRecord::new(tier, client.backend_id(), decision)
            .with_usage(&usage)
            .with_outcome(outcome)
            .with_cost(self.budget.pricing().cost(tier, &usage))
            .with_latency(timer.elapsed_ms(), timer.first_fragment_ms())
    }

    async fn persist(&self, record: UsageRecord) -> UsageRecord {
        record_usage(&self.budget, record).await
    }

    /// Write `record` on the tracker; [`Dispatcher::flush`] waits for it.
    fn persist_detached(&self, record: UsageRecord) {
        let budget = Arc::clone(&self.budget);
        self.tracker.spawn(async move {
            record_usage(&budget, record).await;
        });
    }
}

async fn record_usage(budget: &BudgetLedger, record: UsageRecord) -> UsageRecord {
    match budget.record(&record).await {
        Ok(()) => info!(
            tier = %record.tier,
            backend_id = %record.backend_id,
            outcome = %record.outcome,
            input_tokens = record.input_tokens,
            output_tokens = record.output_tokens,
            cost_usd = record.cost_usd,
            latency_ms = record.latency_ms,
            "usage recorded"
        ),
        Err(e) => error!(
            tier = %record.tier,
            record_id = %record.id,
            error = %e,
            "failed to persist usage record"
        ),
    }
    record
}

async fn first_event(
    client: &dyn TierClient,
    request: &GenerationRequest,
) -> Result<(TierStream, TierEvent), VelaError> {
    let mut stream = client.stream(request.clone()).await?;
    match stream.next().await {
        Some(Ok(event)) => Ok((stream, event)),
        Some(Err(e)) => Err(e),
        None => Err(VelaError::BackendTransient {
            tier: client.tier(),
            message: "stream ended before any output".into(),
        }),
    }
}

/// Push one event, giving up if the caller cancels or goes away.
async fn send(
    tx: &EventSender,
    event: Result<DispatchEvent, VelaError>,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

/// The error surfaced once no tier is left to try.
fn terminal_error(decision: &RoutingDecision, last_error: Option<VelaError>) -> VelaError {
    if decision.bypass_reason == Some(BypassReason::BudgetExceeded) {
        return VelaError::BudgetExceeded {
            message: format!(
                "spend limit reached and {} could not serve the request",
                Tier::FastLocal
            ),
        };
    }
    match last_error {
        Some(e @ VelaError::BackendFatal { .. }) => e,
        _ => VelaError::AllTiersUnavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use vela_config::model::{ClassifierConfig, CostConfig};
    use vela_core::{AdapterType, PluginAdapter, UsageSummary};
    use vela_resilience::{BreakerSettings, CircuitState};
    use vela_storage::Database;

    #[derive(Clone)]
    enum Script {
        Reply(Vec<&'static str>, TokenUsage),
        Transient,
        Fatal,
        /// Emits the fragments, then never finishes.
        Stall(Vec<&'static str>),
        /// Emits the fragments, then ends without a summary.
        Truncated(Vec<&'static str>),
    }

    struct StubClient {
        tier: Tier,
        scripts: Mutex<VecDeque<Script>>,
        fallback: Script,
        calls: AtomicU32,
    }

    impl StubClient {
        fn new(tier: Tier, fallback: Script) -> Arc<Self> {
            Arc::new(Self {
                tier,
                scripts: Mutex::new(VecDeque::new()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PluginAdapter for StubClient {
        fn name(&self) -> &str {
            "stub"
        }
        fn version(&self) -> semver::Version {
            semver::Version::new(0, 0, 0)
        }
        fn adapter_type(&self) -> AdapterType {
            AdapterType::TierClient
        }
        async fn health_check(&self) -> Result<HealthStatus, VelaError> {
            Ok(HealthStatus::Healthy)
        }
    }

    #[async_trait]
    impl TierClient for StubClient {
        fn tier(&self) -> Tier {
            self.tier
        }
        fn backend_id(&self) -> &str {
            "stub-model"
        }
        fn first_fragment_timeout(&self) -> Duration {
            Duration::from_secs(2)
        }
        async fn stream(&self, _request: GenerationRequest) -> Result<TierStream, VelaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| self.fallback.clone());
            let tier = self.tier;
            match script {
                Script::Transient => Err(VelaError::BackendTransient {
                    tier,
                    message: "overloaded".into(),
                }),
                Script::Fatal => Err(VelaError::BackendFatal {
                    tier,
                    message: "invalid api key".into(),
                }),
                Script::Reply(fragments, usage) => {
                    let mut events: Vec<Result<TierEvent, VelaError>> = fragments
                        .into_iter()
                        .map(|f| Ok(TierEvent::Fragment(f.to_string())))
                        .collect();
                    events.push(Ok(TierEvent::Done(UsageSummary {
                        usage,
                        first_fragment_ms: Some(1),
                        total_ms: 2,
                    })));
                    Ok(Box::pin(futures::stream::iter(events)))
                }
                Script::Stall(fragments) => {
                    let head = futures::stream::iter(
                        fragments
                            .into_iter()
                            .map(|f| Ok(TierEvent::Fragment(f.to_string())))
                            .collect::<Vec<_>>(),
                    );
                    Ok(Box::pin(head.chain(futures::stream::pending())))
                }
                Script::Truncated(fragments) => Ok(Box::pin(futures::stream::iter(
                    fragments
                        .into_iter()
                        .map(|f| Ok(TierEvent::Fragment(f.to_string())))
                        .collect::<Vec<_>>(),
                ))),
            }
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        fast: Arc<StubClient>,
        mid: Arc<StubClient>,
        heavy: Arc<StubClient>,
        breakers: Arc<CircuitBreakerRegistry>,
        db: Database,
    }

    async fn fixture(fast: Script, mid: Script, heavy: Script) -> Fixture {
        let db = Database::open_in_memory().await.unwrap();
        let budget = Arc::new(BudgetLedger::new(db.clone(), &CostConfig::default()));
        let classifier = Arc::new(Classifier::new(&ClassifierConfig::default()).unwrap());
        let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerSettings {
            fail_max: 3,
            reset_timeout: Duration::from_secs(60),
        }));
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            retryable: VelaError::is_transient,
        };
        let fast = StubClient::new(Tier::FastLocal, fast);
        let mid = StubClient::new(Tier::MidRemote, mid);
        let heavy = StubClient::new(Tier::HeavyAgent, heavy);
        let clients = TierClients::new(fast.clone(), mid.clone(), heavy.clone()).unwrap();
        let dispatcher = Dispatcher::new(
            classifier,
            budget,
            breakers.clone(),
            retry,
            clients,
            DispatchSettings::default(),
        );
        Fixture {
            dispatcher,
            fast,
            mid,
            heavy,
            breakers,
            db,
        }
    }

    fn reply(fragments: Vec<&'static str>) -> Script {
        Script::Reply(fragments, TokenUsage::new(230, 150))
    }

    const MID_QUERY: &str = "what is the tallest mountain in europe";

    #[tokio::test]
    async fn completed_stream_records_usage_and_cost() {
        let f = fixture(reply(vec!["a"]), reply(vec!["Mont ", "Blanc"]), reply(vec![])).await;
        let stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap();
        assert_eq!(stream.decision().tier, Tier::MidRemote);

        let response = stream.into_response().await.unwrap();
        assert_eq!(response.text, "Mont Blanc");
        assert_eq!(response.record.tier, Tier::MidRemote);
        assert_eq!(response.record.outcome, UsageOutcome::Completed);
        assert!((response.record.cost_usd - 0.00098).abs() < 1e-9);

        f.dispatcher.flush().await;
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(f.fast.calls(), 0);
    }

    #[tokio::test]
    async fn started_precedes_fragments() {
        let f = fixture(reply(vec!["ok"]), reply(vec![]), reply(vec![])).await;
        let mut stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new("set a timer for 5 minutes"))
            .await
            .unwrap();
        let first = stream.next_event().await.unwrap().unwrap();
        assert_eq!(
            first,
            DispatchEvent::Started {
                tier: Tier::FastLocal,
                backend_id: "stub-model".into()
            }
        );
        assert_eq!(
            stream.next_event().await.unwrap().unwrap(),
            DispatchEvent::Fragment("ok".into())
        );
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_one_tier() {
        let f = fixture(reply(vec!["local"]), Script::Transient, reply(vec![])).await;
        let response = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap();
        assert_eq!(response.text, "local");
        assert_eq!(response.record.tier, Tier::FastLocal);
        assert_eq!(f.mid.calls(), 3);

        f.dispatcher.flush().await;
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        let failed = recent
            .iter()
            .filter(|r| r.outcome == UsageOutcome::Failed && r.tier == Tier::MidRemote)
            .count();
        assert_eq!(failed, 3, "one record per attempt");
        assert_eq!(f.breakers.get(Tier::MidRemote).snapshot().failure_count, 1);
    }

    #[tokio::test]
    async fn failed_attempt_writes_do_not_delay_fallback() {
        use futures::FutureExt;

        let f = fixture(reply(vec!["local"]), Script::Transient, reply(vec![])).await;
        let mut stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap();

        // Park the ledger's writer thread until released.
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let parked = f
            .db
            .connection()
            .call(move |_conn| -> Result<(), std::io::Error> {
                let _ = release_rx.recv();
                Ok(())
            })
            .now_or_never();
        assert!(parked.is_none());

        let started = tokio::time::timeout(Duration::from_secs(1), stream.next_event())
            .await
            .expect("fallback waited on the ledger")
            .unwrap()
            .unwrap();
        assert!(matches!(
            started,
            DispatchEvent::Started {
                tier: Tier::FastLocal,
                ..
            }
        ));
        let fragment = tokio::time::timeout(Duration::from_secs(1), stream.next_event())
            .await
            .expect("fallback waited on the ledger")
            .unwrap()
            .unwrap();
        assert!(matches!(fragment, DispatchEvent::Fragment(ref text) if text == "local"));

        release_tx.send(()).unwrap();
        let response = stream.into_response().await.unwrap();
        assert_eq!(response.record.tier, Tier::FastLocal);

        f.dispatcher.flush().await;
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        let failed = recent
            .iter()
            .filter(|r| r.outcome == UsageOutcome::Failed && r.tier == Tier::MidRemote)
            .count();
        assert_eq!(failed, 3);
        assert_eq!(f.dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn fatal_error_trips_breaker_without_retry() {
        let f = fixture(reply(vec!["local"]), Script::Fatal, reply(vec![])).await;
        let response = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap();
        assert_eq!(response.record.tier, Tier::FastLocal);
        assert_eq!(f.mid.calls(), 1);
        assert_eq!(f.breakers.get(Tier::MidRemote).state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_breaker_is_skipped_without_a_call() {
        let f = fixture(reply(vec!["local"]), reply(vec!["remote"]), reply(vec![])).await;
        f.breakers.get(Tier::MidRemote).trip();

        let response = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap();
        assert_eq!(response.text, "local");
        assert_eq!(f.mid.calls(), 0);
    }

    #[tokio::test]
    async fn all_breakers_open_is_terminal() {
        let f = fixture(reply(vec![]), reply(vec![]), reply(vec![])).await;
        for tier in Tier::ALL {
            f.breakers.get(tier).trip();
        }
        let err = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap_err();
        assert!(matches!(err, VelaError::AllTiersUnavailable));
        assert_eq!(f.fast.calls() + f.mid.calls() + f.heavy.calls(), 0);
    }

    #[tokio::test]
    async fn forced_fast_tier_failure_surfaces_budget_exceeded() {
        let f = fixture(Script::Transient, reply(vec![]), reply(vec![])).await;
        f.dispatcher.configure_budget(0.0, 0.0).unwrap();

        let stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap();
        assert_eq!(
            stream.decision().bypass_reason,
            Some(BypassReason::BudgetExceeded)
        );
        let err = stream.into_response().await.unwrap_err();
        assert!(matches!(err, VelaError::BudgetExceeded { .. }));
        assert_eq!(f.mid.calls(), 0);
    }

    #[tokio::test]
    async fn mid_stream_failure_ends_the_stream() {
        let f = fixture(
            reply(vec!["local"]),
            Script::Truncated(vec!["half an ans"]),
            reply(vec![]),
        )
        .await;
        let err = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap()
            .into_response()
            .await
            .unwrap_err();
        assert!(matches!(err, VelaError::BackendTransient { .. }));
        assert_eq!(f.fast.calls(), 0, "no fallback after output was delivered");

        f.dispatcher.flush().await;
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, UsageOutcome::Failed);
        assert!(recent[0].output_tokens > 0);
    }

    #[tokio::test]
    async fn cancellation_records_partial_usage() {
        let f = fixture(
            reply(vec![]),
            Script::Stall(vec!["The first part of a long answer"]),
            reply(vec![]),
        )
        .await;
        let mut stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap();

        assert!(matches!(
            stream.next_event().await,
            Some(Ok(DispatchEvent::Started { .. }))
        ));
        assert!(matches!(
            stream.next_event().await,
            Some(Ok(DispatchEvent::Fragment(_)))
        ));
        stream.cancel();

        let trailer = stream.next_event().await.unwrap().unwrap();
        let DispatchEvent::Completed(record) = trailer else {
            panic!("expected cancelled trailer, got {trailer:?}");
        };
        assert_eq!(record.outcome, UsageOutcome::Cancelled);
        assert!(record.output_tokens > 0);
        assert!(record.cost_usd > 0.0);

        f.dispatcher.flush().await;
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, UsageOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropping_the_stream_still_records() {
        let f = fixture(
            reply(vec![]),
            Script::Stall(vec!["partial"]),
            reply(vec![]),
        )
        .await;
        let mut stream = f
            .dispatcher
            .route_and_stream(DispatchRequest::new(MID_QUERY))
            .await
            .unwrap();
        let _ = stream.next_event().await;
        let _ = stream.next_event().await;
        drop(stream);

        f.dispatcher.flush().await;
        assert_eq!(f.dispatcher.in_flight(), 0);
        let recent = f.dispatcher.budget().ledger().recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].outcome, UsageOutcome::Cancelled);
    }

    #[test]
    fn misregistered_client_is_rejected() {
        let fast = StubClient::new(Tier::FastLocal, Script::Transient);
        let mid = StubClient::new(Tier::MidRemote, Script::Transient);
        let result = TierClients::new(mid.clone(), fast.clone(), mid);
        assert!(matches!(result, Err(VelaError::Config(_))));
    }
}
