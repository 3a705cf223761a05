// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SSE stream parser for Anthropic Messages API streaming responses.
//!
//! Converts a reqwest response byte stream into typed [`StreamEvent`]s
//! using `eventsource-stream` for the SSE framing. Unknown event names are
//! skipped, matching the API's versioning policy.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures::stream::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use vela_core::{Tier, VelaError};

use crate::types::{ApiErrorResponse, SseContentBlockDelta, SseMessageDelta, SseMessageStart};

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, VelaError>> + Send>>;

/// Typed SSE events from the Anthropic streaming protocol.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    MessageStart(SseMessageStart),
    ContentBlockDelta(SseContentBlockDelta),
    MessageDelta(SseMessageDelta),
    MessageStop,
    /// `ping` and block start/stop markers.
    KeepAlive,
    Error(ApiErrorResponse),
}

fn parse<T: DeserializeOwned>(name: &str, data: &str) -> Result<T, VelaError> {
    serde_json::from_str(data).map_err(|e| VelaError::BackendTransient {
        tier: Tier::MidRemote,
        message: format!("failed to parse {name}: {e}"),
    })
}

/// Parses a streaming response into [`StreamEvent`]s.
pub fn parse_sse_stream(response: reqwest::Response) -> EventStream {
    let events = response.bytes_stream().eventsource();

    let mapped = events.filter_map(|result| async move {
        match result {
            Ok(event) => {
                let data = event.data.as_str();
                let parsed = match event.event.as_str() {
                    "message_start" => {
                        parse("message_start", data).map(StreamEvent::MessageStart)
                    }
                    "content_block_delta" => {
                        parse("content_block_delta", data).map(StreamEvent::ContentBlockDelta)
                    }
                    "message_delta" => {
                        parse("message_delta", data).map(StreamEvent::MessageDelta)
                    }
                    "message_stop" => Ok(StreamEvent::MessageStop),
                    "ping" | "content_block_start" | "content_block_stop" => {
                        Ok(StreamEvent::KeepAlive)
                    }
                    "error" => parse("error event", data).map(StreamEvent::Error),
                    _ => return None,
                };
                Some(parsed)
            }
            Err(e) => Some(Err(VelaError::BackendTransient {
                tier: Tier::MidRemote,
                message: format!("SSE stream error: {e}"),
            })),
        }
    });

    Box::pin(mapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SseDelta;

    async fn mock_sse_response(sse_text: &str) -> reqwest::Response {
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_text.to_string()),
            )
            .mount(&server)
            .await;

        reqwest::get(&server.uri()).await.unwrap()
    }

    #[tokio::test]
    async fn parse_text_delta() {
        let sse = "event: content_block_delta\ndata: {\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello\"}}\n\n";
        let mut stream = parse_sse_stream(mock_sse_response(sse).await);

        match stream.next().await.unwrap().unwrap() {
            StreamEvent::ContentBlockDelta(delta) => match delta.delta {
                SseDelta::TextDelta { text } => assert_eq!(text, "Hello"),
                other => panic!("expected TextDelta, got {other:?}"),
            },
            other => panic!("expected ContentBlockDelta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_events_are_skipped() {
        let sse = "event: unknown_future_event\ndata: {\"foo\":\"bar\"}\n\nevent: message_stop\ndata: {}\n\n";
        let mut stream = parse_sse_stream(mock_sse_response(sse).await);
        assert!(matches!(
            stream.next().await.unwrap().unwrap(),
            StreamEvent::MessageStop
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn parse_message_delta_usage() {
        let sse = "event: message_delta\ndata: {\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":25}}\n\n";
        let mut stream = parse_sse_stream(mock_sse_response(sse).await);

        match stream.next().await.unwrap().unwrap() {
            StreamEvent::MessageDelta(md) => {
                assert_eq!(md.delta.stop_reason.as_deref(), Some("end_turn"));
                assert_eq!(md.usage.unwrap().output_tokens, 25);
            }
            other => panic!("expected MessageDelta, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payload_is_a_transient_error() {
        let sse = "event: message_start\ndata: {not json\n\n";
        let mut stream = parse_sse_stream(mock_sse_response(sse).await);
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is_transient());
    }
}
