// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Uniform streaming contract over the three execution backends.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::VelaError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{GenerationRequest, Tier, TierEvent};

/// An ordered, finite, non-restartable sequence of fragments closed by
/// [`TierEvent::Done`].
pub type TierStream = Pin<Box<dyn Stream<Item = Result<TierEvent, VelaError>> + Send>>;

/// A backend serving one [`Tier`].
///
/// `stream` resolves once the backend has accepted the call. Errors
/// returned from `stream` itself or yielded before the first fragment are
/// eligible for retry and fallback; errors after the first fragment end
/// the stream.
#[async_trait]
pub trait TierClient: PluginAdapter {
    fn tier(&self) -> Tier;

    /// Identifier recorded on every usage row (usually the model name).
    fn backend_id(&self) -> &str;

    /// Maximum wait for the first fragment before the attempt counts as failed.
    fn first_fragment_timeout(&self) -> Duration;

    async fn stream(&self, request: GenerationRequest) -> Result<TierStream, VelaError>;
}
