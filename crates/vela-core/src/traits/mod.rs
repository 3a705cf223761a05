// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter traits consumed by the dispatcher.
//!
//! Every adapter extends the [`PluginAdapter`] base trait and uses
//! `#[async_trait]` so it can be held as a trait object.

pub mod adapter;
pub mod embedding;
pub mod tier_client;

pub use adapter::PluginAdapter;
pub use embedding::EmbeddingFunction;
pub use tier_client::{TierClient, TierStream};
