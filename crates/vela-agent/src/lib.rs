// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Dispatch layer for Vela.
//!
//! [`Dispatcher::route_and_stream`] is the execution entry point: it
//! classifies the query, applies budget and latency overrides, and streams
//! the answer from the chosen tier with circuit breaking, retry, and
//! fallback toward cheaper tiers. Usage is recorded for every attempt.

pub mod dispatcher;
pub mod routing;
pub mod shutdown;
pub mod stream;

pub use dispatcher::{DispatchSettings, Dispatcher, TierClients};
pub use routing::{apply_budget, apply_latency_budget};
pub use shutdown::{drain, install_signal_handler};
pub use stream::{DispatchEvent, DispatchRequest, DispatchResponse, DispatchStream};
