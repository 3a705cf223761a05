// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted tier client for deterministic dispatcher tests.
//!
//! `MockTierClient` implements [`TierClient`] by replaying queued
//! [`MockBehavior`]s, one per `stream()` call, falling back to a default
//! behavior once the queue is empty. It counts attempts so tests can assert
//! that an open breaker kept traffic away from a backend.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use vela_core::{
    AdapterType, GenerationRequest, HealthStatus, PluginAdapter, StreamTimer, Tier, TierClient,
    TierEvent, TierStream, TokenUsage, VelaError,
};

/// What one `stream()` call does.
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    /// Stream the fragments, then a summary with `usage`.
    Reply {
        fragments: Vec<String>,
        usage: TokenUsage,
    },
    /// Fail the call with a transient error (e.g. a rate limit).
    Transient,
    /// Fail the call with a fatal error (e.g. a rejected API key).
    Fatal,
    /// Open a stream that never yields.
    Hang,
    /// Like `Reply`, sleeping `delay` before every fragment.
    Slow {
        fragments: Vec<String>,
        usage: TokenUsage,
        delay: Duration,
    },
    /// Stream the fragments, then end without a summary.
    Truncated(Vec<String>),
}

impl MockBehavior {
    /// Reply with `text` split on spaces into word fragments, with 10 input
    /// and one output token per fragment.
    pub fn reply(text: &str) -> Self {
        let fragments = split_words(text);
        let usage = TokenUsage::new(10, fragments.len() as u64);
        MockBehavior::Reply { fragments, usage }
    }

    pub fn reply_with_usage(text: &str, usage: TokenUsage) -> Self {
        MockBehavior::Reply {
            fragments: split_words(text),
            usage,
        }
    }

    /// Stream `text` word by word, pausing `delay` before each word.
    pub fn slow(text: &str, delay: Duration) -> Self {
        let fragments = split_words(text);
        let usage = TokenUsage::new(10, fragments.len() as u64);
        MockBehavior::Slow {
            fragments,
            usage,
            delay,
        }
    }
}

fn split_words(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split(' ').collect();
    let last = words.len().saturating_sub(1);
    words
        .iter()
        .enumerate()
        .map(|(i, w)| if i < last { format!("{w} ") } else { w.to_string() })
        .filter(|w| !w.is_empty())
        .collect()
}

/// A tier client that replays scripted behaviors.
pub struct MockTierClient {
    tier: Tier,
    backend_id: String,
    first_fragment_timeout: Duration,
    queue: Mutex<VecDeque<MockBehavior>>,
    default: Mutex<MockBehavior>,
    requests: Mutex<Vec<GenerationRequest>>,
    attempts: AtomicU32,
}

impl MockTierClient {
    /// A client for `tier` that answers every call with a short reply.
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            backend_id: format!("mock-{tier}"),
            first_fragment_timeout: Duration::from_secs(2),
            queue: Mutex::new(VecDeque::new()),
            default: Mutex::new(MockBehavior::reply(&format!("response from {tier}"))),
            requests: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
        }
    }

    /// Behavior used once the queue is empty.
    pub fn with_default(self, behavior: MockBehavior) -> Self {
        *lock(&self.default) = behavior;
        self
    }

    pub fn with_first_fragment_timeout(mut self, timeout: Duration) -> Self {
        self.first_fragment_timeout = timeout;
        self
    }

    /// Queue a behavior for the next unscripted call.
    pub fn push(&self, behavior: MockBehavior) {
        lock(&self.queue).push_back(behavior);
    }

    pub fn set_default(&self, behavior: MockBehavior) {
        *lock(&self.default) = behavior;
    }

    /// Number of `stream()` calls so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Requests received, oldest first.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        lock(&self.requests).clone()
    }

    fn next_behavior(&self) -> MockBehavior {
        lock(&self.queue)
            .pop_front()
            .unwrap_or_else(|| lock(&self.default).clone())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

fn fragments_then(
    fragments: Vec<String>,
    tail: Option<(TokenUsage, StreamTimer)>,
) -> Vec<Result<TierEvent, VelaError>> {
    let mut events: Vec<Result<TierEvent, VelaError>> = fragments
        .into_iter()
        .map(|f| Ok(TierEvent::Fragment(f)))
        .collect();
    if let Some((usage, mut timer)) = tail {
        timer.mark_fragment();
        events.push(Ok(TierEvent::Done(timer.summary(usage))));
    }
    events
}

#[async_trait]
impl PluginAdapter for MockTierClient {
    fn name(&self) -> &str {
        "mock-tier"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::TierClient
    }

    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl TierClient for MockTierClient {
    fn tier(&self) -> Tier {
        self.tier
    }

    fn backend_id(&self) -> &str {
        &self.backend_id
    }

    fn first_fragment_timeout(&self) -> Duration {
        self.first_fragment_timeout
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TierStream, VelaError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        lock(&self.requests).push(request);
        let timer = StreamTimer::start();
        let tier = self.tier;

        match self.next_behavior() {
            MockBehavior::Reply { fragments, usage } => Ok(Box::pin(stream::iter(
                fragments_then(fragments, Some((usage, timer))),
            ))),
            MockBehavior::Transient => Err(VelaError::BackendTransient {
                tier,
                message: "mock overload".into(),
            }),
            MockBehavior::Fatal => Err(VelaError::BackendFatal {
                tier,
                message: "mock authentication failure".into(),
            }),
            MockBehavior::Hang => Ok(Box::pin(stream::pending())),
            MockBehavior::Slow {
                fragments,
                usage,
                delay,
            } => {
                let events = fragments_then(fragments, Some((usage, timer)));
                Ok(Box::pin(stream::iter(events).then(move |event| async move {
                    if matches!(event, Ok(TierEvent::Fragment(_))) {
                        tokio::time::sleep(delay).await;
                    }
                    event
                })))
            }
            MockBehavior::Truncated(fragments) => {
                Ok(Box::pin(stream::iter(fragments_then(fragments, None))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(client: &MockTierClient) -> Result<Vec<TierEvent>, VelaError> {
        let mut stream = client.stream(GenerationRequest::new("hi")).await?;
        let mut out = Vec::new();
        while let Some(event) = stream.next().await {
            out.push(event?);
        }
        Ok(out)
    }

    #[test]
    fn reply_splits_words_keeping_spaces() {
        let MockBehavior::Reply { fragments, usage } = MockBehavior::reply("one two three") else {
            panic!("expected Reply");
        };
        assert_eq!(fragments, vec!["one ", "two ", "three"]);
        assert_eq!(usage.output_tokens, 3);
    }

    #[tokio::test]
    async fn queue_then_default() {
        let client = MockTierClient::new(Tier::MidRemote);
        client.push(MockBehavior::Transient);

        assert!(matches!(
            collect(&client).await,
            Err(VelaError::BackendTransient { .. })
        ));
        let events = collect(&client).await.unwrap();
        assert!(matches!(events.last(), Some(TierEvent::Done(_))));
        assert_eq!(client.attempts(), 2);
        assert_eq!(client.requests()[0].prompt, "hi");
    }

    #[tokio::test]
    async fn truncated_has_no_summary() {
        let client = MockTierClient::new(Tier::FastLocal)
            .with_default(MockBehavior::Truncated(vec!["half".into()]));
        let events = collect(&client).await.unwrap();
        assert_eq!(events, vec![TierEvent::Fragment("half".into())]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_waits_before_each_fragment() {
        let client = MockTierClient::new(Tier::HeavyAgent)
            .with_default(MockBehavior::slow("a b", Duration::from_millis(500)));
        let started = tokio::time::Instant::now();
        let events = collect(&client).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }
}
