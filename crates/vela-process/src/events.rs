// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line events of the agent's `stream-json` output.
//!
//! Only what the tier needs is modelled: assistant text, optional partial
//! text deltas, and the closing `result` with its usage. Every other event
//! type parses as [`AgentLine::Other`].

use serde::Deserialize;
use vela_core::TokenUsage;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentLine {
    /// A complete assistant turn.
    Assistant { message: AssistantMessage },
    /// A partial message event, present with `--include-partial-messages`.
    StreamEvent { event: PartialEvent },
    /// The final line of a run.
    Result(ResultLine),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
}

impl AssistantMessage {
    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<PartialDelta>,
}

impl PartialEvent {
    /// Text carried by a `content_block_delta` / `text_delta`, if any.
    pub fn text_delta(&self) -> Option<&str> {
        if self.kind != "content_block_delta" {
            return None;
        }
        let delta = self.delta.as_ref()?;
        if delta.kind != "text_delta" {
            return None;
        }
        delta.text.as_deref()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartialDelta {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResultLine {
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub usage: Option<ResultUsage>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ResultUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

impl From<ResultUsage> for TokenUsage {
    fn from(u: ResultUsage) -> Self {
        TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            cache_read_tokens: u.cache_read_input_tokens,
            cache_write_tokens: u.cache_creation_input_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assistant_text_skips_tool_blocks() {
        let line: AgentLine = serde_json::from_str(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Step 1. "},{"type":"tool_use","id":"t","name":"x","input":{}},{"type":"text","text":"Done."}]}}"#,
        )
        .unwrap();
        match line {
            AgentLine::Assistant { message } => assert_eq!(message.text(), "Step 1. Done."),
            other => panic!("expected Assistant, got {other:?}"),
        }
    }

    #[test]
    fn partial_text_delta() {
        let line: AgentLine = serde_json::from_str(
            r#"{"type":"stream_event","event":{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}}"#,
        )
        .unwrap();
        match line {
            AgentLine::StreamEvent { event } => assert_eq!(event.text_delta(), Some("Hi")),
            other => panic!("expected StreamEvent, got {other:?}"),
        }
    }

    #[test]
    fn result_usage_converts() {
        let line: AgentLine = serde_json::from_str(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"ok","usage":{"input_tokens":12,"output_tokens":40,"cache_read_input_tokens":7}}"#,
        )
        .unwrap();
        match line {
            AgentLine::Result(r) => {
                assert!(!r.is_error);
                let usage: TokenUsage = r.usage.unwrap().into();
                assert_eq!(usage.output_tokens, 40);
                assert_eq!(usage.cache_read_tokens, 7);
            }
            other => panic!("expected Result, got {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_other() {
        let line: AgentLine =
            serde_json::from_str(r#"{"type":"system","subtype":"init","session_id":"s"}"#).unwrap();
        assert!(matches!(line, AgentLine::Other));
    }
}
