// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and stream types of the dispatcher's public surface.
//!
//! A [`DispatchStream`] is the consumer end of a bounded channel fed by
//! the dispatcher's producer task. Fragments arrive in generation order and
//! the stream closes with a [`DispatchEvent::Completed`] trailer carrying
//! the persisted [`UsageRecord`], or with a terminal error.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use vela_core::{GenerationRequest, RoutingDecision, Tier, VelaError};
use vela_cost::UsageRecord;

/// One query as submitted to [`crate::Dispatcher::route_and_stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub query: String,
    /// Overrides the configured system prompt.
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// How long the caller is willing to wait for the first fragment.
    pub latency_budget: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        let defaults = GenerationRequest::new("");
        Self {
            query: query.into(),
            system: None,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            latency_budget: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = Some(budget);
        self
    }

    /// The tier-level request, with `default_system` used when none was given.
    pub(crate) fn to_generation(&self, default_system: Option<&str>) -> GenerationRequest {
        GenerationRequest {
            prompt: self.query.clone(),
            system: self.system.clone().or_else(|| default_system.map(str::to_string)),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// One item delivered to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// A tier produced its first output. Sent once, before any fragment.
    Started { tier: Tier, backend_id: String },
    Fragment(String),
    /// Trailer: the record written for the serving attempt.
    Completed(UsageRecord),
}

/// Full text and trailer of a stream drained by [`DispatchStream::into_response`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResponse {
    pub text: String,
    pub record: UsageRecord,
}

pub(crate) type EventSender = mpsc::Sender<Result<DispatchEvent, VelaError>>;

/// Cancellable stream of [`DispatchEvent`]s.
///
/// Dropping the stream cancels generation; the producer still writes a
/// partial usage record for whatever was emitted.
pub struct DispatchStream {
    decision: RoutingDecision,
    rx: mpsc::Receiver<Result<DispatchEvent, VelaError>>,
    cancel: CancellationToken,
}

impl DispatchStream {
    pub(crate) fn new(
        decision: RoutingDecision,
        rx: mpsc::Receiver<Result<DispatchEvent, VelaError>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            decision,
            rx,
            cancel,
        }
    }

    /// The routing decision after budget and latency overrides.
    pub fn decision(&self) -> &RoutingDecision {
        &self.decision
    }

    /// Stop generation. Events already queued can still be read, followed
    /// by a cancelled trailer.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this stream, for use from another task.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn next_event(&mut self) -> Option<Result<DispatchEvent, VelaError>> {
        self.rx.recv().await
    }

    /// Drain the stream into its text and usage trailer.
    pub async fn into_response(mut self) -> Result<DispatchResponse, VelaError> {
        let mut text = String::new();
        while let Some(event) = self.rx.recv().await {
            match event? {
                DispatchEvent::Started { .. } => {}
                DispatchEvent::Fragment(fragment) => text.push_str(&fragment),
                DispatchEvent::Completed(record) => return Ok(DispatchResponse { text, record }),
            }
        }
        Err(VelaError::Internal(
            "dispatch stream closed without a usage trailer".into(),
        ))
    }
}

impl Stream for DispatchStream {
    type Item = Result<DispatchEvent, VelaError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for DispatchStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
