// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ollama native API payloads.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/generate`.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub stream: bool,
    pub options: GenerateOptions,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GenerateOptions {
    pub temperature: f32,
    /// Ollama's name for the output token limit.
    pub num_predict: u32,
}

/// One NDJSON line of a streaming `/api/generate` response.
///
/// The final line has `done = true` and carries the token counts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body of `POST /api/embed`.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedRequest<'a> {
    pub model: &'a str,
    pub input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<Vec<f32>>,
}

/// Error body returned with non-2xx statuses.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn final_chunk_carries_counts() {
        let chunk: GenerateChunk = serde_json::from_str(
            r#"{"model":"llama3.2:3b","response":"","done":true,"done_reason":"stop","prompt_eval_count":26,"eval_count":12}"#,
        )
        .unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.prompt_eval_count, Some(26));
        assert_eq!(chunk.eval_count, Some(12));
    }

    #[test]
    fn request_uses_num_predict() {
        let req = GenerateRequest {
            model: "m".into(),
            prompt: "p".into(),
            system: None,
            stream: true,
            options: GenerateOptions {
                temperature: 0.5,
                num_predict: 64,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["options"]["num_predict"], 64);
        assert!(json.get("system").is_none());
    }
}
