// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Anthropic Messages API request types and SSE event payloads.

use serde::{Deserialize, Serialize};
use vela_core::TokenUsage;

// --- Cache control ---

/// Marker for Anthropic prompt caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheControlMarker {
    #[serde(rename = "type")]
    pub control_type: String,
}

impl CacheControlMarker {
    pub fn ephemeral() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
        }
    }
}

/// System prompt: plain text, or blocks when a block carries a cache marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemContent {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControlMarker>,
}

impl SystemContent {
    /// A single text block marked for ephemeral caching.
    pub fn cached(text: impl Into<String>) -> Self {
        Self::Blocks(vec![SystemBlock {
            block_type: "text".to_string(),
            text: text.into(),
            cache_control: Some(CacheControlMarker::ephemeral()),
        }])
    }
}

// --- Request ---

#[derive(Debug, Clone, Serialize)]
pub struct MessageRequest {
    pub model: String,
    pub messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContent>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

impl ApiMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

// --- Usage ---

/// Token usage as reported by the API. Any field may be absent on a
/// `message_delta`, so all default to zero.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
pub struct ApiUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl ApiUsage {
    /// Folds a later report into `usage`. Counts are cumulative, so a
    /// non-zero later value replaces the earlier one.
    pub fn merge_into(&self, usage: &mut TokenUsage) {
        let keep = |old: &mut u64, new: u64| {
            if new > 0 {
                *old = new;
            }
        };
        keep(&mut usage.input_tokens, self.input_tokens);
        keep(&mut usage.output_tokens, self.output_tokens);
        keep(&mut usage.cache_read_tokens, self.cache_read_input_tokens);
        keep(&mut usage.cache_write_tokens, self.cache_creation_input_tokens);
    }
}

// --- SSE events ---

/// `message_start`: only the usage and model are read.
#[derive(Debug, Clone, Deserialize)]
pub struct SseMessageStart {
    pub message: SseMessageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseMessageInfo {
    pub id: String,
    pub model: String,
    #[serde(default)]
    pub usage: ApiUsage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseContentBlockDelta {
    pub index: usize,
    pub delta: SseDelta,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SseDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    /// Tool input, thinking, and any future delta kinds carry no text for the caller.
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseMessageDelta {
    pub delta: SseMessageDeltaInfo,
    pub usage: Option<ApiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseMessageDeltaInfo {
    pub stop_reason: Option<String>,
}

/// Error body, shared by SSE `error` events and non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "type")]
    pub type_: String,
    pub message: String,
}

impl ApiErrorDetail {
    /// Overload, rate-limit, and generic server errors may clear on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.type_.as_str(),
            "overloaded_error" | "rate_limit_error" | "api_error" | "timeout_error"
        )
    }
}
