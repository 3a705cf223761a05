// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Heavy-agent tier client for Vela.
//!
//! [`AgentProcessClient`] spawns the configured agent command once per
//! call and streams its stdout, either as `stream-json` events or as
//! plain text lines.

pub mod client;
pub mod events;

pub use client::AgentProcessClient;
