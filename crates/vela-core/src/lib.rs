// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Vela tiered dispatcher.
//!
//! This crate holds the error taxonomy, the routing and usage types, and
//! the two adapter traits every backend implements: [`TierClient`] for
//! generation and [`EmbeddingFunction`] for the classifier's semantic stage.

pub mod error;
pub mod tokens;
pub mod traits;
pub mod types;

pub use error::{ErrorKind, VelaError};
pub use types::{
    AdapterType, BypassReason, GenerationRequest, HealthStatus, RoutingDecision, StreamTimer,
    Tier, TierEvent, TokenUsage, UsageSummary,
};

pub use traits::{EmbeddingFunction, PluginAdapter, TierClient, TierStream};
