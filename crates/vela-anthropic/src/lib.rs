// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mid-remote tier client backed by the Anthropic Messages API.
//!
//! Streams text deltas over SSE and closes each stream with a usage
//! summary assembled from `message_start` and `message_delta` reports.
//! When `cache_system_prompt` is on, the system prompt is sent as a block
//! marked for ephemeral caching so repeat calls read it at the cache rate.

pub mod client;
pub mod sse;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};
use vela_config::model::MidRemoteConfig;
use vela_core::{
    AdapterType, GenerationRequest, HealthStatus, PluginAdapter, StreamTimer, Tier, TierClient,
    TierEvent, TierStream, TokenUsage, VelaError,
};

use crate::client::AnthropicClient;
use crate::sse::{EventStream, StreamEvent};
use crate::types::{ApiMessage, MessageRequest, SseDelta, SystemContent};

pub struct AnthropicTierClient {
    client: AnthropicClient,
    model: String,
    system_prompt: Option<String>,
    cache_system_prompt: bool,
    first_fragment_timeout: Duration,
}

impl AnthropicTierClient {
    /// Builds the client from `[mid_remote]`.
    ///
    /// The API key comes from `mid_remote.api_key`, else `ANTHROPIC_API_KEY`.
    /// `system_prompt` is used for requests that carry none of their own.
    pub fn new(config: &MidRemoteConfig, system_prompt: Option<String>) -> Result<Self, VelaError> {
        let api_key = resolve_api_key(config.api_key.as_deref())?;
        let client = AnthropicClient::new(&api_key, &config.api_version, &config.base_url)?;
        info!(model = %config.model, "mid-remote tier client initialized");
        Ok(Self {
            client,
            model: config.model.clone(),
            system_prompt,
            cache_system_prompt: config.cache_system_prompt,
            first_fragment_timeout: Duration::from_millis(config.first_fragment_timeout_ms),
        })
    }

    fn to_message_request(&self, request: &GenerationRequest) -> MessageRequest {
        let system = request
            .system
            .clone()
            .or_else(|| self.system_prompt.clone())
            .filter(|s| !s.is_empty())
            .map(|text| {
                if self.cache_system_prompt {
                    SystemContent::cached(text)
                } else {
                    SystemContent::Text(text)
                }
            });

        MessageRequest {
            model: self.model.clone(),
            messages: vec![ApiMessage::user(request.prompt.clone())],
            system,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream: true,
        }
    }
}

#[async_trait]
impl PluginAdapter for AnthropicTierClient {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::TierClient
    }

    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        // A real probe would spend tokens.
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl TierClient for AnthropicTierClient {
    fn tier(&self) -> Tier {
        Tier::MidRemote
    }

    fn backend_id(&self) -> &str {
        &self.model
    }

    fn first_fragment_timeout(&self) -> Duration {
        self.first_fragment_timeout
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TierStream, VelaError> {
        let timer = StreamTimer::start();
        let events = self
            .client
            .stream_message(&self.to_message_request(&request))
            .await?;
        let state = SseState {
            events,
            usage: TokenUsage::default(),
            timer,
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, SseState::next_item)))
    }
}

/// Folds SSE events into tier events.
struct SseState {
    events: EventStream,
    usage: TokenUsage,
    timer: StreamTimer,
    finished: bool,
}

impl SseState {
    async fn next_item(mut self) -> Option<(Result<TierEvent, VelaError>, Self)> {
        if self.finished {
            return None;
        }
        loop {
            let item = match self.events.next().await {
                Some(Ok(event)) => match self.apply(event) {
                    Some(item) => item,
                    None => continue,
                },
                Some(Err(e)) => {
                    self.finished = true;
                    Err(e)
                }
                None => {
                    self.finished = true;
                    Err(VelaError::BackendTransient {
                        tier: Tier::MidRemote,
                        message: "stream closed before message_stop".into(),
                    })
                }
            };
            return Some((item, self));
        }
    }

    fn apply(&mut self, event: StreamEvent) -> Option<Result<TierEvent, VelaError>> {
        match event {
            StreamEvent::MessageStart(ms) => {
                ms.message.usage.merge_into(&mut self.usage);
                None
            }
            StreamEvent::ContentBlockDelta(delta) => match delta.delta {
                SseDelta::TextDelta { text } if !text.is_empty() => {
                    self.timer.mark_fragment();
                    Some(Ok(TierEvent::Fragment(text)))
                }
                _ => None,
            },
            StreamEvent::MessageDelta(md) => {
                if let Some(usage) = md.usage {
                    usage.merge_into(&mut self.usage);
                }
                None
            }
            StreamEvent::MessageStop => {
                self.finished = true;
                let summary = self.timer.summary(self.usage);
                debug!(
                    input_tokens = summary.usage.input_tokens,
                    output_tokens = summary.usage.output_tokens,
                    cache_read_tokens = summary.usage.cache_read_tokens,
                    "mid-remote stream complete"
                );
                Some(Ok(TierEvent::Done(summary)))
            }
            StreamEvent::KeepAlive => None,
            StreamEvent::Error(err) => {
                self.finished = true;
                let message = format!("{}: {}", err.error.type_, err.error.message);
                Some(Err(if err.error.is_transient() {
                    VelaError::BackendTransient {
                        tier: Tier::MidRemote,
                        message,
                    }
                } else {
                    VelaError::BackendFatal {
                        tier: Tier::MidRemote,
                        message,
                    }
                }))
            }
        }
    }
}

/// Resolves the API key from config or the `ANTHROPIC_API_KEY` environment variable.
pub fn resolve_api_key(config_key: Option<&str>) -> Result<String, VelaError> {
    if let Some(key) = config_key
        && !key.is_empty()
    {
        return Ok(key.to_string());
    }

    std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
        VelaError::Config(
            "Anthropic API key not found. Set mid_remote.api_key in config or the ANTHROPIC_API_KEY environment variable.".into(),
        )
    })
}
