// SPDX-FileCopyrightText: 2026 Vela Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Vela usage ledger.
//!
//! Provides WAL-mode SQLite storage with embedded migrations and a
//! single-writer concurrency model via `tokio-rusqlite`. Query code for
//! the ledger itself lives in `vela-cost`.

pub mod database;
pub mod migrations;

pub use database::{Database, map_tr_err};
