// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ollama adapters: the fast-local [`OllamaTierClient`] and the
//! [`OllamaEmbedder`] that feeds the classifier's semantic stage.

pub mod client;
pub mod embed;
pub mod types;

pub use client::OllamaTierClient;
pub use embed::OllamaEmbedder;
