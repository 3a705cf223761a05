// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Vela integration tests.
//!
//! Provides mock adapters and test harness infrastructure for fast,
//! deterministic tests without Ollama, a network, or an agent binary.
//!
//! # Components
//!
//! - [`MockTierClient`] - scripted tier client with an attempt counter
//! - [`MockEmbedder`] - keyword-presence embedding function
//! - [`TestHarness`] - dispatcher wired to mocks and a temp ledger

pub mod harness;
pub mod mock_embedder;
pub mod mock_tier;

pub use harness::{TestHarness, TestHarnessBuilder};
pub use mock_embedder::MockEmbedder;
pub use mock_tier::{MockBehavior, MockTierClient};
