// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fast-local tier client over Ollama's streaming `/api/generate`.
//!
//! The response body is newline-delimited JSON. Bytes are adapted into an
//! `AsyncRead` and split with a [`LinesCodec`], one chunk per line.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::StatusCode;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;
use tracing::{debug, info};
use vela_config::model::FastLocalConfig;
use vela_core::{
    AdapterType, GenerationRequest, HealthStatus, PluginAdapter, StreamTimer, Tier, TierClient,
    TierEvent, TierStream, TokenUsage, VelaError,
};

use crate::types::{GenerateChunk, GenerateOptions, GenerateRequest, OllamaErrorBody};

/// Longest NDJSON line accepted from the server.
const MAX_LINE_BYTES: usize = 1 << 20;

type LineStream = Pin<Box<dyn Stream<Item = Result<String, LinesCodecError>> + Send>>;

pub(crate) fn transient(message: impl Into<String>) -> VelaError {
    VelaError::BackendTransient {
        tier: Tier::FastLocal,
        message: message.into(),
    }
}

/// Maps a non-2xx Ollama response. A missing model (404) or a bad request
/// will not fix itself, so both are fatal.
pub(crate) fn status_error(status: StatusCode, body: &str) -> VelaError {
    let detail = serde_json::from_str::<OllamaErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.to_string());
    let message = format!("{status}: {detail}");
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        transient(message)
    } else {
        VelaError::BackendFatal {
            tier: Tier::FastLocal,
            message,
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, VelaError> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| VelaError::Internal(format!("failed to build HTTP client: {e}")))
}

pub struct OllamaTierClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    first_fragment_timeout: Duration,
}

impl OllamaTierClient {
    pub fn new(config: &FastLocalConfig) -> Result<Self, VelaError> {
        info!(model = %config.model, url = %config.base_url, "fast-local tier client initialized");
        Ok(Self {
            client: http_client()?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            first_fragment_timeout: Duration::from_millis(config.first_fragment_timeout_ms),
        })
    }

    fn to_generate_request(&self, request: GenerationRequest) -> GenerateRequest {
        GenerateRequest {
            model: self.model.clone(),
            prompt: request.prompt,
            system: request.system,
            stream: true,
            options: GenerateOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        }
    }
}

#[async_trait]
impl PluginAdapter for OllamaTierClient {
    fn name(&self) -> &str {
        "ollama"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::TierClient
    }

    /// Lists local models; healthy only if the configured one is present.
    async fn health_check(&self) -> Result<HealthStatus, VelaError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => return Ok(HealthStatus::Unhealthy(format!("unreachable: {e}"))),
        };
        if !response.status().is_success() {
            return Ok(HealthStatus::Unhealthy(format!("status {}", response.status())));
        }
        let tags: serde_json::Value = response
            .json()
            .await
            .map_err(|e| transient(format!("invalid /api/tags body: {e}")))?;
        let present = tags["models"]
            .as_array()
            .is_some_and(|models| models.iter().any(|m| m["name"] == self.model.as_str()));
        Ok(if present {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded(format!("model {} not pulled", self.model))
        })
    }
}

#[async_trait]
impl TierClient for OllamaTierClient {
    fn tier(&self) -> Tier {
        Tier::FastLocal
    }

    fn backend_id(&self) -> &str {
        &self.model
    }

    fn first_fragment_timeout(&self) -> Duration {
        self.first_fragment_timeout
    }

    async fn stream(&self, request: GenerationRequest) -> Result<TierStream, VelaError> {
        let timer = StreamTimer::start();
        let body = self.to_generate_request(request);
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| transient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        debug!(status = %status, "generate response received");
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        let bytes = response.bytes_stream().map_err(io::Error::other);
        let lines: LineStream = Box::pin(FramedRead::new(
            StreamReader::new(bytes),
            LinesCodec::new_with_max_length(MAX_LINE_BYTES),
        ));
        let state = NdjsonState {
            lines,
            timer,
            finished: false,
        };
        Ok(Box::pin(futures::stream::unfold(state, NdjsonState::next_item)))
    }
}

struct NdjsonState {
    lines: LineStream,
    timer: StreamTimer,
    finished: bool,
}

impl NdjsonState {
    async fn next_item(mut self) -> Option<(Result<TierEvent, VelaError>, Self)> {
        if self.finished {
            return None;
        }
        loop {
            let item = match self.lines.next().await {
                Some(Ok(line)) if line.trim().is_empty() => continue,
                Some(Ok(line)) => match self.apply(&line) {
                    Some(item) => item,
                    None => continue,
                },
                Some(Err(e)) => {
                    self.finished = true;
                    Err(transient(format!("stream read failed: {e}")))
                }
                None => {
                    self.finished = true;
                    Err(transient("stream closed before done"))
                }
            };
            return Some((item, self));
        }
    }

    fn apply(&mut self, line: &str) -> Option<Result<TierEvent, VelaError>> {
        let chunk: GenerateChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.finished = true;
                return Some(Err(transient(format!("malformed chunk: {e}"))));
            }
        };
        if let Some(error) = chunk.error {
            self.finished = true;
            return Some(Err(transient(error)));
        }
        if chunk.done {
            self.finished = true;
            let usage = TokenUsage::new(
                chunk.prompt_eval_count.unwrap_or(0),
                chunk.eval_count.unwrap_or(0),
            );
            return Some(Ok(TierEvent::Done(self.timer.summary(usage))));
        }
        if chunk.response.is_empty() {
            return None;
        }
        self.timer.mark_fragment();
        Some(Ok(TierEvent::Fragment(chunk.response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OllamaTierClient {
        OllamaTierClient::new(&FastLocalConfig {
            base_url: server.uri(),
            ..FastLocalConfig::default()
        })
        .unwrap()
    }

    async fn mount_generate(server: &MockServer, status: u16, body: &str) {
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(status)
                    .insert_header("content-type", "application/x-ndjson")
                    .set_body_string(body.to_string()),
            )
            .mount(server)
            .await;
    }

    async fn collect(client: &OllamaTierClient) -> Vec<Result<TierEvent, VelaError>> {
        client
            .stream(GenerationRequest::new("hi"))
            .await
            .unwrap()
            .collect()
            .await
    }

    #[tokio::test]
    async fn streams_ndjson_chunks_with_usage() {
        let server = MockServer::start().await;
        mount_generate(
            &server,
            200,
            concat!(
                "{\"response\":\"Five \",\"done\":false}\n",
                "\n",
                "{\"response\":\"minutes.\",\"done\":false}\n",
                "{\"response\":\"\",\"done\":true,\"prompt_eval_count\":26,\"eval_count\":3}\n",
            ),
        )
        .await;

        let events = collect(&client(&server)).await;
        assert_eq!(events.len(), 3);
        assert_eq!(*events[0].as_ref().unwrap(), TierEvent::Fragment("Five ".into()));
        assert_eq!(*events[1].as_ref().unwrap(), TierEvent::Fragment("minutes.".into()));
        match events[2].as_ref().unwrap() {
            TierEvent::Done(s) => assert_eq!(s.usage, TokenUsage::new(26, 3)),
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sends_model_and_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "llama3.2:3b",
                "stream": true,
                "options": {"num_predict": 1024}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"done\":true}\n"))
            .expect(1)
            .mount(&server)
            .await;

        let events = collect(&client(&server)).await;
        assert!(matches!(events[0], Ok(TierEvent::Done(_))));
    }

    #[tokio::test]
    async fn missing_model_is_fatal() {
        let server = MockServer::start().await;
        mount_generate(&server, 404, "{\"error\":\"model \\\"llama3.2:3b\\\" not found\"}").await;

        let err = client(&server)
            .stream(GenerationRequest::new("hi"))
            .await
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        mount_generate(&server, 503, "busy").await;
        let err = client(&server)
            .stream(GenerationRequest::new("hi"))
            .await
            .err()
            .unwrap();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn in_band_error_ends_stream() {
        let server = MockServer::start().await;
        mount_generate(
            &server,
            200,
            "{\"response\":\"a\",\"done\":false}\n{\"error\":\"out of memory\"}\n{\"response\":\"b\"}\n",
        )
        .await;
        let events = collect(&client(&server)).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].as_ref().unwrap_err().to_string().contains("out of memory"));
    }

    #[tokio::test]
    async fn health_check_reports_missing_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "qwen2.5:0.5b"}]
            })))
            .mount(&server)
            .await;

        let status = client(&server).health_check().await.unwrap();
        assert!(matches!(status, HealthStatus::Degraded(_)));
    }
}
