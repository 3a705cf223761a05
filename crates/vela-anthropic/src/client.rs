// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Anthropic Messages API.
//!
//! One call is one attempt. Retry and backoff belong to the dispatcher's
//! retry policy; this client only sorts failures into transient and fatal.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::debug;
use vela_core::{Tier, VelaError};

use crate::sse::{self, EventStream};
use crate::types::{ApiErrorResponse, MessageRequest};

const MESSAGES_PATH: &str = "/v1/messages";

/// Connection-level timeout; generation may legitimately run much longer.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    client: reqwest::Client,
    url: String,
}

impl AnthropicClient {
    pub fn new(api_key: &str, api_version: &str, base_url: &str) -> Result<Self, VelaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|e| VelaError::Config(format!("invalid API key header value: {e}")))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_str(api_version).map_err(|e| {
                VelaError::Config(format!("invalid API version header value: {e}"))
            })?,
        );
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| VelaError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}{MESSAGES_PATH}", base_url.trim_end_matches('/')),
        })
    }

    /// Sends a streaming request. Resolves once response headers arrive.
    pub async fn stream_message(&self, request: &MessageRequest) -> Result<EventStream, VelaError> {
        let mut req = request.clone();
        req.stream = true;

        let response = self
            .client
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| VelaError::BackendTransient {
                tier: Tier::MidRemote,
                message: format!("HTTP request failed: {e}"),
            })?;

        let status = response.status();
        debug!(status = %status, "streaming response received");
        if status.is_success() {
            return Ok(sse::parse_sse_stream(response));
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// HTTP statuses worth another attempt.
pub fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
        || status.as_u16() == 529
}

/// Maps a non-2xx response to a typed error. Authentication and
/// validation failures (401, 403, 400, 404, 422) are fatal.
pub fn status_error(status: StatusCode, body: &str) -> VelaError {
    let message = match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api_err) => format!(
            "{status} {}: {}",
            api_err.error.type_, api_err.error.message
        ),
        Err(_) => format!("{status}: {body}"),
    };
    if is_transient_status(status) {
        VelaError::BackendTransient {
            tier: Tier::MidRemote,
            message,
        }
    } else {
        VelaError::BackendFatal {
            tier: Tier::MidRemote,
            message,
        }
    }
}
